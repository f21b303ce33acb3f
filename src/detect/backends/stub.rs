use std::collections::VecDeque;

use anyhow::{anyhow, Result};
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;

/// Deterministic backend for tests and model-less runs.
///
/// Plays back scripted per-frame outcomes first, then returns the fixed
/// detection list (empty by default) for every following frame.
#[derive(Default)]
pub struct StubBackend {
    fixed: Vec<Detection>,
    script: VecDeque<std::result::Result<Vec<Detection>, String>>,
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the same detections for every frame.
    pub fn fixed(detections: Vec<Detection>) -> Self {
        Self {
            fixed: detections,
            ..Self::default()
        }
    }

    /// Return one scripted outcome per frame, in order.
    pub fn scripted<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = std::result::Result<Vec<Detection>, String>>,
    {
        Self {
            script: outcomes.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<Detection>> {
        self.frames_seen += 1;
        match self.script.pop_front() {
            Some(Ok(detections)) => Ok(detections),
            Some(Err(message)) => Err(anyhow!("stub inference failure: {}", message)),
            None => Ok(self.fixed.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    #[test]
    fn stub_plays_script_then_fixed() {
        let hand = Detection::new("use-hand", BoundingBox::new(0, 0, 4, 4), 0.9);
        let mut backend = StubBackend::scripted(vec![
            Ok(vec![hand.clone()]),
            Err("model crashed".to_string()),
        ]);
        let frame = RgbImage::new(8, 8);

        assert_eq!(backend.detect(&frame).unwrap(), vec![hand]);
        let err = backend.detect(&frame).unwrap_err();
        assert!(err.to_string().contains("model crashed"));
        assert!(backend.detect(&frame).unwrap().is_empty());
        assert_eq!(backend.frames_seen(), 3);
    }

    #[test]
    fn stub_fixed_repeats() {
        let scoop = Detection::new("scooper", BoundingBox::new(1, 2, 3, 4), 0.7);
        let mut backend = StubBackend::fixed(vec![scoop.clone()]);
        let frame = RgbImage::new(2, 2);
        for _ in 0..3 {
            assert_eq!(backend.detect(&frame).unwrap(), vec![scoop.clone()]);
        }
    }
}
