//! Image quality assessment: sharpness, brightness, and contrast.
//!
//! The score starts at 1.0 and is multiplied by a fixed penalty for
//! each failed check, so it always lies in `(0, 1]`. Assessment never
//! fails: a uniform or empty image simply scores low.

use image::GrayImage;
use imageproc::filter::laplacian_filter;
use serde::{Deserialize, Serialize};

use crate::grayscale::{intensity_stats, mean_std};
use crate::types::{PipelineError, ensure_range};

/// Limits and penalties for quality assessment (8-bit intensity scale).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Laplacian variance below which the image counts as blurry.
    pub blur_threshold: f64,
    /// Mean intensity below which the image is too dark.
    pub min_brightness: f64,
    /// Mean intensity above which the image is too bright.
    pub max_brightness: f64,
    /// Intensity standard deviation below which contrast is low.
    pub min_contrast: f64,
    /// Score multiplier applied when the image is blurry.
    pub blur_penalty: f64,
    /// Score multiplier applied on a brightness issue.
    pub brightness_penalty: f64,
    /// Score multiplier applied on low contrast.
    pub contrast_penalty: f64,
}

impl QualityConfig {
    /// Default sharpness threshold.
    pub const DEFAULT_BLUR_THRESHOLD: f64 = 100.0;
    /// Default lower brightness limit.
    pub const DEFAULT_MIN_BRIGHTNESS: f64 = 50.0;
    /// Default upper brightness limit.
    pub const DEFAULT_MAX_BRIGHTNESS: f64 = 200.0;
    /// Default contrast limit.
    pub const DEFAULT_MIN_CONTRAST: f64 = 20.0;

    /// Check limits and penalties.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if a penalty is outside
    /// `(0, 1]` or the brightness band is inverted.
    pub fn validate(&self) -> Result<(), PipelineError> {
        for (name, penalty) in [
            ("quality.blur_penalty", self.blur_penalty),
            ("quality.brightness_penalty", self.brightness_penalty),
            ("quality.contrast_penalty", self.contrast_penalty),
        ] {
            ensure_range(name, penalty, f64::MIN_POSITIVE, 1.0)?;
        }
        ensure_range("quality.min_brightness", self.min_brightness, 0.0, 255.0)?;
        ensure_range(
            "quality.max_brightness",
            self.max_brightness,
            self.min_brightness,
            255.0,
        )?;
        ensure_range("quality.min_contrast", self.min_contrast, 0.0, 255.0)?;
        ensure_range("quality.blur_threshold", self.blur_threshold, 0.0, f64::MAX)
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            blur_threshold: Self::DEFAULT_BLUR_THRESHOLD,
            min_brightness: Self::DEFAULT_MIN_BRIGHTNESS,
            max_brightness: Self::DEFAULT_MAX_BRIGHTNESS,
            min_contrast: Self::DEFAULT_MIN_CONTRAST,
            blur_penalty: 0.5,
            brightness_penalty: 0.7,
            contrast_penalty: 0.8,
        }
    }
}

/// Result of [`assess`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Product of the penalties for every failed check, in `(0, 1]`.
    pub quality_score: f64,
    /// Sharpness fell below the blur threshold.
    pub is_blurry: bool,
    /// Mean brightness is outside the allowed band.
    pub brightness_issue: bool,
    /// Contrast fell below the contrast limit.
    pub low_contrast: bool,
    /// Variance of the 4-neighbour Laplacian response.
    pub sharpness: f64,
    /// Mean grayscale intensity (0–255).
    pub brightness: f64,
    /// Grayscale intensity standard deviation (0–255).
    pub contrast: f64,
}

/// Variance of the 4-neighbour Laplacian over a grayscale image.
///
/// Border pixels replicate their nearest neighbour. Empty images
/// return 0.
#[must_use]
pub fn laplacian_variance(gray: &GrayImage) -> f64 {
    if gray.width() == 0 || gray.height() == 0 {
        return 0.0;
    }
    let response = laplacian_filter(gray);
    let (_, std) = mean_std(response.as_raw().iter().map(|&v| f64::from(v)));
    std * std
}

/// Score the quality of a grayscale image.
#[must_use = "returns the quality report"]
pub fn assess(gray: &GrayImage, config: &QualityConfig) -> QualityReport {
    let sharpness = laplacian_variance(gray);
    let (brightness, contrast) = intensity_stats(gray);

    let is_blurry = sharpness < config.blur_threshold;
    let brightness_issue =
        brightness < config.min_brightness || brightness > config.max_brightness;
    let low_contrast = contrast < config.min_contrast;

    let mut quality_score = 1.0;
    if is_blurry {
        quality_score *= config.blur_penalty;
    }
    if brightness_issue {
        quality_score *= config.brightness_penalty;
    }
    if low_contrast {
        quality_score *= config.contrast_penalty;
    }

    QualityReport {
        quality_score,
        is_blurry,
        brightness_issue,
        low_contrast,
        sharpness,
        brightness,
        contrast,
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;
    use imageproc::filter::gaussian_blur_f32;

    use super::*;

    fn uniform(v: u8) -> GrayImage {
        GrayImage::from_fn(32, 32, |_, _| Luma([v]))
    }

    fn checkerboard(lo: u8, hi: u8) -> GrayImage {
        GrayImage::from_fn(32, 32, |x, y| Luma([if (x + y) % 2 == 0 { lo } else { hi }]))
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn sharp_well_exposed_image_scores_one() {
        let report = assess(&checkerboard(40, 215), &QualityConfig::default());
        assert!(!report.is_blurry);
        assert!(!report.brightness_issue);
        assert!(!report.low_contrast);
        assert_close(report.quality_score, 1.0);
    }

    #[test]
    fn uniform_gray_is_blurry_and_flat() {
        let report = assess(&uniform(128), &QualityConfig::default());
        assert!(report.is_blurry);
        assert!(!report.brightness_issue);
        assert!(report.low_contrast);
        assert_close(report.sharpness, 0.0);
        assert_close(report.quality_score, 0.5 * 0.8);
    }

    #[test]
    fn black_and_white_have_brightness_issue() {
        for v in [0, 255] {
            let report = assess(&uniform(v), &QualityConfig::default());
            assert!(report.brightness_issue, "value {v}");
            assert_close(report.quality_score, 0.5 * 0.7 * 0.8);
        }
    }

    #[test]
    fn empty_image_scores_low_without_failing() {
        let report = assess(&GrayImage::new(0, 0), &QualityConfig::default());
        assert!(report.quality_score > 0.0);
        assert!(report.is_blurry);
    }

    #[test]
    fn more_blur_never_raises_score() {
        let base = checkerboard(40, 215);
        let mut previous = assess(&base, &QualityConfig::default()).quality_score;
        for sigma in [0.5_f32, 1.0, 2.0, 4.0] {
            let score = assess(&gaussian_blur_f32(&base, sigma), &QualityConfig::default())
                .quality_score;
            assert!(score <= previous, "sigma {sigma}: {score} > {previous}");
            previous = score;
        }
    }

    #[test]
    fn zero_penalty_is_invalid() {
        let config = QualityConfig {
            blur_penalty: 0.0,
            ..QualityConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(QualityConfig::default().validate().is_ok());
    }

    #[test]
    fn darker_image_never_scores_higher() {
        let config = QualityConfig::default();
        let mut previous = f64::INFINITY;
        for hi in [215_u8, 160, 100, 60, 30] {
            let score = assess(&checkerboard(hi / 5, hi), &config).quality_score;
            assert!(score <= previous, "hi {hi}: {score} > {previous}");
            previous = score;
        }
    }

    #[test]
    fn thresholds_come_from_config() {
        let config = QualityConfig {
            min_contrast: 200.0,
            ..QualityConfig::default()
        };
        assert!(assess(&checkerboard(40, 215), &config).low_contrast);
    }
}
