//! Region-of-interest geometry.
//!
//! The monitored zone is an axis-aligned rectangle split vertically at
//! `split_x = x + floor(width * split_ratio)`. Only the left part counts for
//! containment. The split is *drawn* tilted by `tilt_degrees` for operators,
//! but containment always uses the untilted vertical coordinate.

use anyhow::{anyhow, Result};
use serde::Deserialize;

pub const DEFAULT_ROI_X: i32 = 132;
pub const DEFAULT_ROI_Y: i32 = 169;
pub const DEFAULT_ROI_WIDTH: i32 = 127;
pub const DEFAULT_ROI_HEIGHT: i32 = 298;
pub const DEFAULT_SPLIT_RATIO: f64 = 0.52;
pub const DEFAULT_TILT_DEGREES: f64 = -4.0;
/// Cap on the split line's horizontal travel; wider than any frame.
pub const MAX_SPLIT_SHIFT: i32 = 1 << 15;

/// Immutable zone configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    split_ratio: f64,
    tilt_degrees: f64,
    split_x: i32,
}

/// Rendered split segment, top endpoint then bottom endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SplitLine {
    pub top: (i32, i32),
    pub bottom: (i32, i32),
}

/// ROI section of the JSON config file.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct RoiConfigFile {
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub split_ratio: Option<f64>,
    pub tilt_degrees: Option<f64>,
}

impl Roi {
    pub fn new(
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        split_ratio: f64,
        tilt_degrees: f64,
    ) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(anyhow!(
                "roi width and height must be positive (got {}x{})",
                width,
                height
            ));
        }
        if !(split_ratio > 0.0 && split_ratio < 1.0) {
            return Err(anyhow!(
                "roi split_ratio must be strictly between 0 and 1 (got {})",
                split_ratio
            ));
        }
        if !tilt_degrees.is_finite() || tilt_degrees.abs() >= 90.0 {
            return Err(anyhow!(
                "roi tilt_degrees must be finite and within (-90, 90) (got {})",
                tilt_degrees
            ));
        }
        let offset = (f64::from(width) * split_ratio).floor() as i32;
        let split_x = x
            .checked_add(offset)
            .ok_or_else(|| anyhow!("roi split coordinate overflows"))?;
        x.checked_add(width)
            .and_then(|_| y.checked_add(height))
            .ok_or_else(|| anyhow!("roi extent overflows"))?;

        Ok(Self {
            x,
            y,
            width,
            height,
            split_ratio,
            tilt_degrees,
            split_x,
        })
    }

    pub fn from_file(file: &RoiConfigFile) -> Result<Self> {
        Self::new(
            file.x.unwrap_or(DEFAULT_ROI_X),
            file.y.unwrap_or(DEFAULT_ROI_Y),
            file.width.unwrap_or(DEFAULT_ROI_WIDTH),
            file.height.unwrap_or(DEFAULT_ROI_HEIGHT),
            file.split_ratio.unwrap_or(DEFAULT_SPLIT_RATIO),
            file.tilt_degrees.unwrap_or(DEFAULT_TILT_DEGREES),
        )
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn split_ratio(&self) -> f64 {
        self.split_ratio
    }

    pub fn tilt_degrees(&self) -> f64 {
        self.tilt_degrees
    }

    /// Vertical split coordinate used by `contains_point`.
    pub fn split_x(&self) -> i32 {
        self.split_x
    }

    /// True when the point is inside the rectangle and on or left of the split.
    /// All bounds are inclusive.
    pub fn contains_point(&self, px: i32, py: i32) -> bool {
        self.x <= px && px <= self.split_x && self.y <= py && py <= self.bottom()
    }

    /// Display-only segment for the tilted split. Near-vertical tilts are
    /// capped at `MAX_SPLIT_SHIFT` pixels of horizontal travel.
    pub fn split_line(&self) -> SplitLine {
        let shift = (f64::from(self.height) * self.tilt_degrees.to_radians().tan()).trunc();
        let tilt_px = shift.clamp(-f64::from(MAX_SPLIT_SHIFT), f64::from(MAX_SPLIT_SHIFT)) as i32;
        SplitLine {
            top: (self.split_x, self.y),
            bottom: (self.split_x.saturating_add(tilt_px), self.bottom()),
        }
    }
}

impl Default for Roi {
    fn default() -> Self {
        let offset = (f64::from(DEFAULT_ROI_WIDTH) * DEFAULT_SPLIT_RATIO).floor() as i32;
        Self {
            x: DEFAULT_ROI_X,
            y: DEFAULT_ROI_Y,
            width: DEFAULT_ROI_WIDTH,
            height: DEFAULT_ROI_HEIGHT,
            split_ratio: DEFAULT_SPLIT_RATIO,
            tilt_degrees: DEFAULT_TILT_DEGREES,
            split_x: DEFAULT_ROI_X + offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_zone_split() {
        let roi = Roi::default();
        assert_eq!(roi.split_x(), 198);
        assert_eq!(roi.right(), 259);
        assert_eq!(roi.bottom(), 467);
        assert_eq!(Roi::from_file(&RoiConfigFile::default()).unwrap(), roi);
    }

    #[test]
    fn left_half_corners_are_inside() {
        let cases = [
            (10, 20, 100, 50, 0.5),
            (0, 0, 1, 1, 0.9),
            (132, 169, 127, 298, 0.52),
            (-40, -10, 33, 7, 0.25),
        ];
        for (x, y, w, h, ratio) in cases {
            let roi = Roi::new(x, y, w, h, ratio, 0.0).unwrap();
            let sx = roi.split_x();
            assert!(sx >= x && sx <= x + w);
            for (px, py) in [(x, y), (sx, y), (x, y + h), (sx, y + h)] {
                assert!(roi.contains_point(px, py), "({px},{py}) in {roi:?}");
            }
        }
    }

    #[test]
    fn right_half_corners_only_when_on_split() {
        let roi = Roi::new(10, 20, 100, 50, 0.5, 0.0).unwrap();
        let right = roi.right();
        for (px, py) in [(right, 20), (right, 70), (61, 20), (61, 70)] {
            assert!(!roi.contains_point(px, py));
        }
        assert!(roi.contains_point(60, 20));
        assert!(roi.contains_point(60, 70));
    }

    #[test]
    fn points_outside_vertical_bounds_rejected() {
        let roi = Roi::default();
        assert!(!roi.contains_point(160, 168));
        assert!(!roi.contains_point(160, 468));
        assert!(!roi.contains_point(131, 200));
    }

    #[test]
    fn tilt_moves_rendered_line_not_predicate() {
        let roi = Roi::default();
        let line = roi.split_line();
        assert_eq!(line.top, (198, 169));
        // 298 * tan(-4deg) = -20.84, truncated toward zero
        assert_eq!(line.bottom, (178, 467));
        // Right of the drawn line at the bottom but left of split_x still counts.
        assert!(roi.contains_point(190, 467));
    }

    #[test]
    fn near_vertical_tilt_stays_in_range() {
        for tilt in [89.9999999999, -89.9999999999] {
            let roi = Roi::new(132, 169, 127, 298, 0.52, tilt).unwrap();
            let line = roi.split_line();
            assert_eq!(line.top, (198, 169));
            assert_eq!((line.bottom.0 - 198).abs(), MAX_SPLIT_SHIFT);
            assert_eq!(line.bottom.1, 467);
        }
        let edge = Roi::new(i32::MAX - 20, 0, 10, 10, 0.5, 89.9).unwrap();
        assert_eq!(edge.split_line().bottom.0, i32::MAX);
    }

    #[test]
    fn invalid_zones_rejected() {
        assert!(Roi::new(0, 0, 0, 10, 0.5, 0.0).is_err());
        assert!(Roi::new(0, 0, 10, -1, 0.5, 0.0).is_err());
        assert!(Roi::new(0, 0, 10, 10, 0.0, 0.0).is_err());
        assert!(Roi::new(0, 0, 10, 10, 1.0, 0.0).is_err());
        assert!(Roi::new(0, 0, 10, 10, f64::NAN, 0.0).is_err());
        assert!(Roi::new(0, 0, 10, 10, 0.5, 90.0).is_err());
    }
}
