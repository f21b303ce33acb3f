//! Post-processing for YOLOv8-style detector heads.
//!
//! The raw output is `[1, 4 + C, N]`: for each of `N` candidates the box as
//! `cx, cy, w, h` in input pixels followed by one score per class.

use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Detection};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
pub const DEFAULT_MAX_DETECTIONS: usize = 300;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct YoloParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            max_detections: DEFAULT_MAX_DETECTIONS,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
    class_id: usize,
}

/// Decode a flattened `[4 + C, N]` prediction block into labelled boxes.
///
/// Boxes are clamped to the frame and truncated to integer pixels.
pub fn decode_predictions(
    output: &[f32],
    num_attrs: usize,
    num_candidates: usize,
    frame_width: u32,
    frame_height: u32,
    class_names: &[String],
    params: &YoloParams,
) -> Result<Vec<Detection>> {
    if num_attrs < 5 {
        return Err(anyhow!(
            "detector output has {} attributes per candidate; expected at least 5",
            num_attrs
        ));
    }
    let expected = num_attrs
        .checked_mul(num_candidates)
        .ok_or_else(|| anyhow!("detector output dimensions overflow"))?;
    if output.len() != expected {
        return Err(anyhow!(
            "detector output length mismatch: expected {}, got {}",
            expected,
            output.len()
        ));
    }

    let at = |attr: usize, idx: usize| output[attr * num_candidates + idx];
    let max_x = frame_width as f32;
    let max_y = frame_height as f32;

    let mut candidates = Vec::new();
    for idx in 0..num_candidates {
        let (class_id, score) = (0..num_attrs - 4)
            .map(|c| (c, at(4 + c, idx)))
            .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score < params.confidence_threshold {
            continue;
        }
        let (cx, cy, w, h) = (at(0, idx), at(1, idx), at(2, idx), at(3, idx));
        candidates.push(Candidate {
            x1: (cx - w / 2.0).clamp(0.0, max_x),
            y1: (cy - h / 2.0).clamp(0.0, max_y),
            x2: (cx + w / 2.0).clamp(0.0, max_x),
            y2: (cy + h / 2.0).clamp(0.0, max_y),
            score,
            class_id,
        });
    }

    let kept = non_max_suppression(candidates, params.iou_threshold);

    Ok(kept
        .into_iter()
        .take(params.max_detections)
        .map(|c| {
            let label = class_names
                .get(c.class_id)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", c.class_id));
            Detection::new(
                label,
                BoundingBox::new(c.x1 as i32, c.y1 as i32, c.x2 as i32, c.y2 as i32),
                c.score,
            )
        })
        .collect())
}

/// Greedy per-class suppression, highest score first.
fn non_max_suppression(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<Candidate> = Vec::with_capacity(candidates.len());
    for cand in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == cand.class_id && iou(k, &cand) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

fn iou(a: &Candidate, b: &Candidate) -> f32 {
    let ix = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let iy = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = ix * iy;
    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}
