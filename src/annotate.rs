//! Best-effort overlay drawing on RGB frames.
//!
//! Every primitive clips to the image bounds, so callers may pass boxes that
//! extend past the frame edge.

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

pub const VIOLATION_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
pub const ROI_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
pub const SPLIT_COLOR: Rgb<u8> = Rgb([0, 0, 255]);

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;

/// Inclusive corners to a `Rect`, or `None` when the span is empty.
fn span(x1: i32, y1: i32, x2: i32, y2: i32) -> Option<Rect> {
    let (x1, x2) = (x1.min(x2), x1.max(x2));
    let (y1, y2) = (y1.min(y2), y1.max(y2));
    let width = u32::try_from(i64::from(x2) - i64::from(x1) + 1).ok()?;
    let height = u32::try_from(i64::from(y2) - i64::from(y1) + 1).ok()?;
    Some(Rect::at(x1, y1).of_size(width, height))
}

/// Filled rectangle, corners inclusive.
pub fn fill_rect(image: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
    // Clip first so the rect handed on stays small.
    let (x1, x2) = (x1.min(x2).max(0), x1.max(x2).min(image.width() as i32 - 1));
    let (y1, y2) = (y1.min(y2).max(0), y1.max(y2).min(image.height() as i32 - 1));
    if x1 > x2 || y1 > y2 {
        return;
    }
    if let Some(rect) = span(x1, y1, x2, y2) {
        draw_filled_rect_mut(image, rect, color);
    }
}

/// Rectangle outline growing inward by `thickness` pixels.
pub fn draw_rect(
    image: &mut RgbImage,
    x1: i32,
    y1: i32,
    x2: i32,
    y2: i32,
    color: Rgb<u8>,
    thickness: i32,
) {
    let (x1, x2) = (x1.min(x2), x1.max(x2));
    let (y1, y2) = (y1.min(y2), y1.max(y2));
    for t in 0..thickness.max(1) {
        let (l, r, top, bot) = (x1 + t, x2 - t, y1 + t, y2 - t);
        if l > r || top > bot {
            break;
        }
        if let Some(rect) = span(l, top, r, bot) {
            draw_hollow_rect_mut(image, rect, color);
        }
    }
}

/// Line segment; thickness widens it horizontally.
pub fn draw_line(
    image: &mut RgbImage,
    from: (i32, i32),
    to: (i32, i32),
    color: Rgb<u8>,
    thickness: i32,
) {
    let half = (thickness.max(1) - 1) / 2;
    let extra = (thickness.max(1) - 1) - half;
    for off in -half..=extra {
        let start = (from.0.saturating_add(off) as f32, from.1 as f32);
        let end = (to.0.saturating_add(off) as f32, to.1 as f32);
        draw_line_segment_mut(image, start, end, color);
    }
}

/// Draw upper-case text with a 5x7 bitmap font. Characters without a glyph
/// render as solid cells. Returns the rendered width in pixels.
pub fn draw_text(
    image: &mut RgbImage,
    x: i32,
    y: i32,
    text: &str,
    color: Rgb<u8>,
    scale: i32,
) -> i32 {
    let scale = scale.max(1);
    let mut cursor = x;
    for ch in text.chars() {
        let rows = glyph(ch.to_ascii_uppercase());
        for (row, bits) in rows.iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let px = cursor + col * scale;
                let py = y + row as i32 * scale;
                fill_rect(image, px, py, px + scale - 1, py + scale - 1, color);
            }
        }
        cursor += (GLYPH_WIDTH + 1) * scale;
    }
    cursor - x
}

pub fn text_height(scale: i32) -> i32 {
    GLYPH_HEIGHT * scale.max(1)
}

fn glyph(ch: char) -> [u8; 7] {
    match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'N' => [0b10001, 0b11001, 0b10101, 0b10011, 0b10001, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        ' ' => [0; 7],
        _ => [0b11111; 7],
    }
}
