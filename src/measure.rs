//! Geometric measurement and severity classification.
//!
//! Area is derived from a fixed pixels-per-meter constant. No camera
//! intrinsics or distance-to-surface correction is applied, so estimates are
//! only comparable between images taken from a similar height and angle.

use serde::{Deserialize, Serialize};

pub const DEFAULT_PIXELS_PER_METER: f64 = 100.0;

/// Upper bound (exclusive) of the `low` tier in square meters.
pub const LOW_SEVERITY_MAX_M2: f64 = 0.1;
/// Upper bound (exclusive) of the `medium` tier in square meters.
pub const MEDIUM_SEVERITY_MAX_M2: f64 = 0.3;

const BASE_DEPTH_M: f64 = 0.05;
const DEPTH_PER_M2: f64 = 0.5;
const MAX_DEPTH_GAIN_M: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageShape {
    pub width: u32,
    pub height: u32,
}

impl ImageShape {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Converts mask pixel counts into square meters.
#[derive(Clone, Copy, Debug)]
pub struct AreaEstimator {
    pixels_per_meter: f64,
}

impl AreaEstimator {
    pub fn new(pixels_per_meter: f64) -> Self {
        Self { pixels_per_meter }
    }

    pub fn pixels_per_meter(&self) -> f64 {
        self.pixels_per_meter
    }

    /// Area covered by `mask_pixels` mask pixels, capped at the full frame.
    pub fn estimate_area(&self, mask_pixels: u64, shape: ImageShape) -> f64 {
        let covered = mask_pixels.min(shape.pixel_count());
        covered as f64 / (self.pixels_per_meter * self.pixels_per_meter)
    }
}

impl Default for AreaEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_PIXELS_PER_METER)
    }
}

/// Rough depth guess from surface area; bounded to `[0.05, 0.55]` meters.
pub fn estimate_depth(area_m2: f64) -> f64 {
    BASE_DEPTH_M + (area_m2 * DEPTH_PER_M2).min(MAX_DEPTH_GAIN_M)
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Half-open tiers: `[0, 0.1)` low, `[0.1, 0.3)` medium, `[0.3, inf)` high.
pub struct SeverityClassifier;

impl SeverityClassifier {
    pub fn classify(area_m2: f64) -> Severity {
        if area_m2 < LOW_SEVERITY_MAX_M2 {
            Severity::Low
        } else if area_m2 < MEDIUM_SEVERITY_MAX_M2 {
            Severity::Medium
        } else {
            Severity::High
        }
    }
}
