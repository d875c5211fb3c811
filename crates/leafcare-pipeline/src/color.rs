//! 8-bit HSV conversion and hue-band masks.
//!
//! Hue is stored in half-degrees (0–179) so it fits a byte; saturation
//! and value use the full 0–255 range. Band edges are inclusive.

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::types::{PipelineError, ensure_range};

/// One pixel in 8-bit HSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    /// Hue in half-degrees, 0–179.
    pub h: u8,
    /// Saturation, 0–255.
    pub s: u8,
    /// Value (max channel), 0–255.
    pub v: u8,
}

/// Convert one RGB pixel to 8-bit HSV.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn to_hsv(pixel: Rgb<u8>) -> Hsv {
    let [r, g, b] = pixel.0;
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    if v == min {
        return Hsv { h: 0, s: 0, v };
    }
    let diff = f64::from(v - min);

    let s = (255.0 * diff / f64::from(v)).round();
    let (r, g, b) = (f64::from(r), f64::from(g), f64::from(b));
    let mut degrees = if v == pixel.0[0] {
        60.0 * (g - b) / diff
    } else if v == pixel.0[1] {
        120.0 + 60.0 * (b - r) / diff
    } else {
        240.0 + 60.0 * (r - g) / diff
    };
    if degrees < 0.0 {
        degrees += 360.0;
    }
    let h = (degrees / 2.0).round() % 180.0;

    Hsv {
        h: h as u8,
        s: s as u8,
        v,
    }
}

/// An inclusive hue range with saturation and value floors.
///
/// The floors keep gray, black, and washed-out pixels out of a band
/// whose hue would otherwise be arbitrary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HueBand {
    /// Lowest hue in the band (half-degrees).
    pub hue_min: u8,
    /// Highest hue in the band (half-degrees).
    pub hue_max: u8,
    /// Minimum saturation for a pixel to count.
    pub min_saturation: u8,
    /// Minimum value for a pixel to count.
    pub min_value: u8,
}

impl HueBand {
    /// Green foliage: hue 35–85.
    pub const GREEN: Self = Self {
        hue_min: 35,
        hue_max: 85,
        min_saturation: 40,
        min_value: 40,
    };

    /// Brown and yellow foliage: hue 15–35.
    pub const BROWN: Self = Self {
        hue_min: 15,
        hue_max: 35,
        min_saturation: 40,
        min_value: 40,
    };

    /// Whether an HSV pixel falls inside the band.
    #[must_use]
    pub const fn contains(&self, hsv: Hsv) -> bool {
        hsv.h >= self.hue_min
            && hsv.h <= self.hue_max
            && hsv.s >= self.min_saturation
            && hsv.v >= self.min_value
    }

    /// Check the band is non-empty and within the 8-bit hue range.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] when `hue_min > hue_max`
    /// or `hue_max >= 180`.
    pub fn validate(&self, name: &str) -> Result<(), PipelineError> {
        ensure_range(
            &format!("{name}.hue_max"),
            f64::from(self.hue_max),
            f64::from(self.hue_min),
            179.0,
        )
    }
}

/// Per-image color statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStats {
    /// Fraction of pixels inside the green band.
    pub green_ratio: f64,
    /// Fraction of pixels inside the brown band.
    pub brown_ratio: f64,
    /// Mean saturation over all pixels (0–255).
    pub avg_saturation: f64,
}

/// Measure band coverage and mean saturation in one pass.
///
/// An empty image yields all zeros.
#[must_use]
pub fn color_stats(image: &RgbImage, green: &HueBand, brown: &HueBand) -> ColorStats {
    let mut green_count = 0_u64;
    let mut brown_count = 0_u64;
    let mut saturation_sum = 0_u64;
    let mut total = 0_u64;
    for pixel in image.pixels() {
        let hsv = to_hsv(*pixel);
        total += 1;
        saturation_sum += u64::from(hsv.s);
        green_count += u64::from(green.contains(hsv));
        brown_count += u64::from(brown.contains(hsv));
    }
    if total == 0 {
        return ColorStats {
            green_ratio: 0.0,
            brown_ratio: 0.0,
            avg_saturation: 0.0,
        };
    }
    #[allow(clippy::cast_precision_loss)]
    let ratio = |n: u64| n as f64 / total as f64;
    ColorStats {
        green_ratio: ratio(green_count),
        brown_ratio: ratio(brown_count),
        avg_saturation: ratio(saturation_sum),
    }
}
