//! Frame payloads and decoded frames.
//!
//! Queue messages carry a JSON document `{"frame": "<base64 JPEG>"}`. A
//! decoded `Frame` is resized to the detector input and owned by the
//! consumption loop for exactly one iteration.

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use chrono::{DateTime, Local};
use image::imageops::FilterType;
use image::{ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};

/// Hard cap on the decoded JPEG size accepted from the queue.
pub const MAX_JPEG_BYTES: usize = 8 * 1024 * 1024;

/// Wire format of one queue message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FramePayload {
    /// Standard base64 of the JPEG-compressed image.
    pub frame: String,
}

impl FramePayload {
    pub fn from_jpeg(jpeg: &[u8]) -> Self {
        Self {
            frame: base64::engine::general_purpose::STANDARD.encode(jpeg),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("serialize frame payload")
    }

    pub fn parse(body: &[u8]) -> Result<Self> {
        serde_json::from_slice(body).map_err(|e| anyhow!("invalid frame payload: {}", e))
    }

    pub fn jpeg_bytes(&self) -> Result<Vec<u8>> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(self.frame.trim())
            .context("frame field is not valid base64")?;
        if bytes.is_empty() {
            return Err(anyhow!("frame field is empty"));
        }
        if bytes.len() > MAX_JPEG_BYTES {
            return Err(anyhow!(
                "frame is {} bytes; limit is {}",
                bytes.len(),
                MAX_JPEG_BYTES
            ));
        }
        Ok(bytes)
    }
}

/// One decoded frame at detector resolution.
pub struct Frame {
    image: RgbImage,
    received_at: DateTime<Local>,
}

impl Frame {
    pub fn new(image: RgbImage, received_at: DateTime<Local>) -> Self {
        Self { image, received_at }
    }

    /// Decode a queue message body and resize to `width` x `height`.
    pub fn decode(
        body: &[u8],
        received_at: DateTime<Local>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let jpeg = FramePayload::parse(body)?.jpeg_bytes()?;
        let image = decode_jpeg(&jpeg)?;
        Ok(Self::new(resize_to(image, width, height), received_at))
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn received_at(&self) -> DateTime<Local> {
        self.received_at
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

pub fn decode_jpeg(jpeg: &[u8]) -> Result<RgbImage> {
    let decoded = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg)
        .context("decode jpeg frame")?;
    Ok(decoded.to_rgb8())
}

pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut out = std::io::Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Jpeg)
        .context("encode jpeg frame")?;
    Ok(out.into_inner())
}

/// Exact (aspect-ignoring) resize, bilinear.
fn resize_to(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image;
    }
    image::imageops::resize(&image, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn jpeg_of(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb([40, 120, 200]));
        encode_jpeg(&img).unwrap()
    }

    #[test]
    fn decodes_and_resizes_payload() {
        let body = FramePayload::from_jpeg(&jpeg_of(320, 240)).to_json().unwrap();
        let frame = Frame::decode(&body, Local::now(), 640, 640).unwrap();
        assert_eq!((frame.width(), frame.height()), (640, 640));
    }

    #[test]
    fn keeps_frames_already_at_target_size() {
        let body = FramePayload::from_jpeg(&jpeg_of(64, 48)).to_json().unwrap();
        let frame = Frame::decode(&body, Local::now(), 64, 48).unwrap();
        assert_eq!((frame.width(), frame.height()), (64, 48));
    }

    #[test]
    fn ignores_extra_fields() {
        let b64 = base64::engine::general_purpose::STANDARD.encode(jpeg_of(8, 8));
        let body = format!(r#"{{"frame": "{}", "camera": "line-2"}}"#, b64);
        assert!(Frame::decode(body.as_bytes(), Local::now(), 8, 8).is_ok());
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert!(Frame::decode(b"not json", Local::now(), 8, 8).is_err());
        assert!(Frame::decode(br#"{"image": "abc"}"#, Local::now(), 8, 8).is_err());
        assert!(Frame::decode(br#"{"frame": "***"}"#, Local::now(), 8, 8).is_err());
        assert!(Frame::decode(br#"{"frame": ""}"#, Local::now(), 8, 8).is_err());

        let not_jpeg = FramePayload::from_jpeg(b"GIF89a....").to_json().unwrap();
        assert!(Frame::decode(&not_jpeg, Local::now(), 8, 8).is_err());
    }
}
