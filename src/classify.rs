//! Violation classification for one frame.
//!
//! A detection is a violation when its label equals the configured violation
//! label and its box center falls inside the ROI's restricted half.

use chrono::{DateTime, Local};
use image::RgbImage;

use crate::annotate::{
    draw_line, draw_rect, draw_text, fill_rect, text_height, ROI_COLOR, SPLIT_COLOR,
    VIOLATION_COLOR,
};
use crate::detect::{BoundingBox, Detection};
use crate::frame::Frame;
use crate::geometry::Roi;

pub const DEFAULT_VIOLATION_LABEL: &str = "use-hand";

const BOX_THICKNESS: i32 = 2;
const TAG_SCALE: i32 = 2;
const TAG_PADDING: i32 = 2;
const TAG_TEXT: &str = "VIOLATION";

/// A qualifying detection in one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Violation {
    /// Arrival time of the frame the violation was found in.
    pub timestamp: DateTime<Local>,
    pub label: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Output of classifying one frame.
pub struct Classification {
    pub annotated: RgbImage,
    pub violation_count: usize,
    pub violations: Vec<Violation>,
}

#[derive(Clone, Debug)]
pub struct ViolationClassifier {
    roi: Roi,
    violation_label: String,
}

impl ViolationClassifier {
    pub fn new(roi: Roi, violation_label: impl Into<String>) -> Self {
        Self {
            roi,
            violation_label: violation_label.into(),
        }
    }

    pub fn roi(&self) -> &Roi {
        &self.roi
    }

    pub fn violation_label(&self) -> &str {
        &self.violation_label
    }

    pub fn is_violation(&self, detection: &Detection) -> bool {
        if detection.label != self.violation_label {
            return false;
        }
        let (cx, cy) = detection.bbox.center();
        self.roi.contains_point(cx, cy)
    }

    /// Classify every detection and render the overlay onto a copy of the frame.
    pub fn classify(&self, frame: &Frame, detections: &[Detection]) -> Classification {
        let mut annotated = frame.image().clone();

        let violations: Vec<Violation> = detections
            .iter()
            .filter(|d| self.is_violation(d))
            .map(|d| Violation {
                timestamp: frame.received_at(),
                label: d.label.clone(),
                bbox: d.bbox,
                confidence: d.confidence,
            })
            .collect();

        for violation in &violations {
            mark_violation(&mut annotated, &violation.bbox);
        }
        self.draw_zone(&mut annotated);

        Classification {
            annotated,
            violation_count: violations.len(),
            violations,
        }
    }

    /// Static overlay: ROI rectangle and tilted split line.
    pub fn draw_zone(&self, image: &mut RgbImage) {
        let roi = &self.roi;
        draw_rect(
            image,
            roi.x,
            roi.y,
            roi.right(),
            roi.bottom(),
            ROI_COLOR,
            BOX_THICKNESS,
        );
        let line = roi.split_line();
        draw_line(image, line.top, line.bottom, SPLIT_COLOR, BOX_THICKNESS);
    }
}

fn mark_violation(image: &mut RgbImage, bbox: &BoundingBox) {
    draw_rect(
        image,
        bbox.x1,
        bbox.y1,
        bbox.x2,
        bbox.y2,
        VIOLATION_COLOR,
        BOX_THICKNESS,
    );
    let tag_bottom = bbox.y1 - TAG_PADDING;
    let tag_top = tag_bottom - text_height(TAG_SCALE) - 2 * TAG_PADDING;
    let tag_width = (TAG_TEXT.len() as i32) * 6 * TAG_SCALE + 2 * TAG_PADDING;
    fill_rect(
        image,
        bbox.x1,
        tag_top,
        bbox.x1 + tag_width,
        tag_bottom,
        VIOLATION_COLOR,
    );
    draw_text(
        image,
        bbox.x1 + TAG_PADDING,
        tag_top + TAG_PADDING,
        TAG_TEXT,
        image::Rgb([255, 255, 255]),
        TAG_SCALE,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn blank_frame() -> Frame {
        Frame::new(RgbImage::from_pixel(640, 640, Rgb([10, 10, 10])), Local::now())
    }

    fn hand(x1: i32, y1: i32, x2: i32, y2: i32) -> Detection {
        Detection::new("use-hand", BoundingBox::new(x1, y1, x2, y2), 0.8)
    }

    fn classifier() -> ViolationClassifier {
        ViolationClassifier::new(Roi::default(), DEFAULT_VIOLATION_LABEL)
    }

    #[test]
    fn empty_detections_only_draw_static_overlay() {
        let frame = blank_frame();
        let result = classifier().classify(&frame, &[]);
        assert_eq!(result.violation_count, 0);
        assert!(result.violations.is_empty());

        let mut expected = frame.image().clone();
        classifier().draw_zone(&mut expected);
        assert_eq!(result.annotated, expected);
        assert_ne!(result.annotated, *frame.image());
    }

    #[test]
    fn steep_tilt_still_annotates() {
        let roi = Roi::new(132, 169, 127, 298, 0.52, 89.9999999999).unwrap();
        let c = ViolationClassifier::new(roi, DEFAULT_VIOLATION_LABEL);
        let result = c.classify(&blank_frame(), &[hand(150, 200, 170, 220)]);
        assert_eq!(result.violation_count, 1);
        assert_eq!(*result.annotated.get_pixel(198, 169), SPLIT_COLOR);
    }

    #[test]
    fn center_on_split_is_violation() {
        // split_x = 198; box centered at (198, 169)
        let result = classifier().classify(&blank_frame(), &[hand(196, 167, 200, 171)]);
        assert_eq!(result.violation_count, 1);
    }

    #[test]
    fn center_right_of_split_is_not() {
        let result = classifier().classify(&blank_frame(), &[hand(197, 167, 201, 171)]);
        assert_eq!(hand(197, 167, 201, 171).bbox.center(), (199, 169));
        assert_eq!(result.violation_count, 0);
    }

    #[test]
    fn other_labels_never_violate() {
        let dets = [
            Detection::new("use-scooper", BoundingBox::new(150, 200, 170, 220), 0.99),
            Detection::new("hand", BoundingBox::new(150, 200, 170, 220), 0.99),
            Detection::new("USE-HAND", BoundingBox::new(150, 200, 170, 220), 0.99),
            Detection::new("pizza", BoundingBox::new(132, 169, 198, 467), 0.99),
        ];
        let result = classifier().classify(&blank_frame(), &dets);
        assert_eq!(result.violation_count, 0);
    }

    #[test]
    fn reference_scenario() {
        let frame = blank_frame();
        let result = classifier().classify(&frame, &[hand(150, 200, 170, 220)]);
        assert_eq!(result.violation_count, 1);
        let v = &result.violations[0];
        assert_eq!(v.label, "use-hand");
        assert_eq!(v.bbox, BoundingBox::new(150, 200, 170, 220));
        assert_eq!(v.timestamp, frame.received_at());
        assert_eq!(*result.annotated.get_pixel(150, 210), VIOLATION_COLOR);
    }

    #[test]
    fn count_is_per_frame() {
        let c = classifier();
        let first = c.classify(
            &blank_frame(),
            &[hand(150, 200, 170, 220), hand(140, 300, 160, 320)],
        );
        assert_eq!(first.violation_count, 2);
        let second = c.classify(&blank_frame(), &[hand(150, 200, 170, 220)]);
        assert_eq!(second.violation_count, 1);
    }

    #[test]
    fn custom_label_is_honoured() {
        let c = ViolationClassifier::new(Roi::default(), "bare-hand");
        let dets = [
            Detection::new("bare-hand", BoundingBox::new(150, 200, 170, 220), 0.5),
            hand(150, 200, 170, 220),
        ];
        let result = c.classify(&blank_frame(), &dets);
        assert_eq!(result.violation_count, 1);
        assert_eq!(result.violations[0].label, "bare-hand");
    }
}
