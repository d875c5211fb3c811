//! Lighting and background advisories.
//!
//! Nothing here decides an outcome on its own. The flags feed the
//! stage-1 cutoff and the user-facing suggestions.

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::edge::edge_density;
use crate::types::{PipelineError, ensure_range};

/// Limits for the lighting and background checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// HSV value below which a pixel is in shadow.
    pub shadow_value: u8,
    /// HSV value above which a pixel is a highlight.
    pub highlight_value: u8,
    /// Shadow fraction above which `has_shadow` is set.
    pub shadow_ratio_limit: f64,
    /// Highlight fraction above which `has_highlight` is set.
    pub highlight_ratio_limit: f64,
    /// Edge density above which the background counts as complex.
    pub edge_density_limit: f64,
}

impl EnvironmentConfig {
    /// Check ratios and value limits.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if a ratio is outside
    /// `[0, 1]` or the shadow limit is not below the highlight limit.
    pub fn validate(&self) -> Result<(), PipelineError> {
        ensure_range("environment.shadow_ratio_limit", self.shadow_ratio_limit, 0.0, 1.0)?;
        ensure_range(
            "environment.highlight_ratio_limit",
            self.highlight_ratio_limit,
            0.0,
            1.0,
        )?;
        ensure_range("environment.edge_density_limit", self.edge_density_limit, 0.0, 1.0)?;
        ensure_range(
            "environment.highlight_value",
            f64::from(self.highlight_value),
            f64::from(self.shadow_value),
            255.0,
        )
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            shadow_value: 50,
            highlight_value: 230,
            shadow_ratio_limit: 0.15,
            highlight_ratio_limit: 0.10,
            edge_density_limit: 0.3,
        }
    }
}

/// Advisory lighting and background flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentReport {
    /// Fraction of pixels darker than the shadow limit.
    pub shadow_ratio: f64,
    /// Fraction of pixels brighter than the highlight limit.
    pub highlight_ratio: f64,
    /// Fraction of edge pixels in the shared edge map.
    pub edge_density: f64,
    /// Significant shadowed area.
    pub has_shadow: bool,
    /// Significant blown-out area.
    pub has_highlight: bool,
    /// Cluttered background.
    pub complex_background: bool,
}

impl EnvironmentReport {
    /// Whether any lighting advisory is raised.
    #[must_use]
    pub const fn lighting_issue(&self) -> bool {
        self.has_shadow || self.has_highlight
    }
}

/// Analyze lighting from the RGB image and clutter from the edge map.
#[must_use = "returns the environment report"]
pub fn analyze(image: &RgbImage, edges: &GrayImage, config: &EnvironmentConfig) -> EnvironmentReport {
    let mut shadow = 0_u64;
    let mut highlight = 0_u64;
    for pixel in image.pixels() {
        let value = pixel.0.iter().copied().max().unwrap_or(0);
        shadow += u64::from(value < config.shadow_value);
        highlight += u64::from(value > config.highlight_value);
    }
    let total = image.pixels().len();
    #[allow(clippy::cast_precision_loss)]
    let ratio = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 };

    let shadow_ratio = ratio(shadow);
    let highlight_ratio = ratio(highlight);
    let edge_density = edge_density(edges);

    let report = EnvironmentReport {
        shadow_ratio,
        highlight_ratio,
        edge_density,
        has_shadow: shadow_ratio > config.shadow_ratio_limit,
        has_highlight: highlight_ratio > config.highlight_ratio_limit,
        complex_background: edge_density > config.edge_density_limit,
    };
    log::debug!(
        "environment: shadow={:.3} highlight={:.3} edge_density={:.3}",
        report.shadow_ratio,
        report.highlight_ratio,
        report.edge_density,
    );
    report
}

#[cfg(test)]
mod tests {
    use image::{Luma, Rgb};

    use super::*;

    fn halves(left: Rgb<u8>, right: Rgb<u8>) -> RgbImage {
        RgbImage::from_fn(10, 10, |x, _| if x < 5 { left } else { right })
    }

    #[test]
    fn black_frame_is_all_shadow() {
        let img = RgbImage::new(10, 10);
        let r = analyze(&img, &GrayImage::new(10, 10), &EnvironmentConfig::default());
        assert!((r.shadow_ratio - 1.0).abs() < f64::EPSILON);
        assert!(r.has_shadow);
        assert!(!r.has_highlight);
        assert!(r.lighting_issue());
        assert!(!r.complex_background);
    }

    #[test]
    fn value_is_max_channel() {
        // Saturated blue is bright in HSV value even though its gray
        // level is low.
        let img = halves(Rgb([0, 0, 240]), Rgb([120, 120, 120]));
        let r = analyze(&img, &GrayImage::new(10, 10), &EnvironmentConfig::default());
        assert!((r.highlight_ratio - 0.5).abs() < f64::EPSILON);
        assert!(r.shadow_ratio.abs() < f64::EPSILON);
    }

    #[test]
    fn limits_are_strict() {
        // Exactly 10% highlights does not trip the > 0.10 limit.
        let img = RgbImage::from_fn(10, 10, |x, y| {
            if y == 0 && x < 10 {
                Rgb([255, 255, 255])
            } else {
                Rgb([120, 120, 120])
            }
        });
        let r = analyze(&img, &GrayImage::new(10, 10), &EnvironmentConfig::default());
        assert!((r.highlight_ratio - 0.1).abs() < 1e-12);
        assert!(!r.has_highlight);
    }

    #[test]
    fn dense_edges_mean_complex_background() {
        let img = RgbImage::from_pixel(10, 10, Rgb([120, 120, 120]));
        let edges = GrayImage::from_fn(10, 10, |x, _| Luma([if x % 2 == 0 { 255 } else { 0 }]));
        let r = analyze(&img, &edges, &EnvironmentConfig::default());
        assert!((r.edge_density - 0.5).abs() < f64::EPSILON);
        assert!(r.complex_background);
    }

    #[test]
    fn empty_image_reports_nothing() {
        let r = analyze(&RgbImage::new(0, 0), &GrayImage::new(0, 0), &EnvironmentConfig::default());
        assert!(!r.has_shadow && !r.has_highlight && !r.complex_background);
    }

    #[test]
    fn inverted_value_limits_are_invalid() {
        let config = EnvironmentConfig {
            shadow_value: 200,
            highlight_value: 100,
            ..EnvironmentConfig::default()
        };
        assert!(config.validate().is_err());
        assert!(EnvironmentConfig::default().validate().is_ok());
    }
}
