//! Shared types for the leafcare classification cascade.

use serde::{Deserialize, Serialize};

use crate::environment::EnvironmentConfig;
use crate::features::FeatureConfig;
use crate::gate::RejectionPolicyKind;
use crate::quality::QualityConfig;

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `RgbImage`: the decoded pixel grid every stage reads from.
pub use image::RgbImage;

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: f64,
    /// Vertical position (pixels from top edge).
    pub y: f64,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Dimensions {
    /// Dimensions of an image buffer.
    #[must_use]
    pub fn of<P: image::Pixel>(image: &image::ImageBuffer<P, Vec<P::Subpixel>>) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
        }
    }

    /// Total pixel count.
    #[must_use]
    pub const fn pixel_count(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Heuristic description of an image, extracted from raw pixels.
///
/// Every field is a deterministic function of the image and the
/// [`FeatureConfig`]: extracting twice yields bit-identical values.
///
/// Scales: ratios are fractions of all pixels in `[0, 1]`;
/// `avg_saturation` uses the 8-bit HSV scale (0–255); `brightness` is
/// the mean of all RGB samples divided by 255; `contrast` and
/// `blur_metric` are grayscale standard deviation and Laplacian variance
/// on the 8-bit intensity scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Fraction of pixels in the green hue band.
    pub green_ratio: f64,
    /// Fraction of pixels in the brown/yellow hue band.
    pub brown_ratio: f64,
    /// Mean HSV saturation (0–255).
    pub avg_saturation: f64,
    /// Mean response of the oriented texture filter bank.
    pub texture_score: f64,
    /// Number of straight segments found on the edge map.
    pub vein_count: u32,
    /// Contour area divided by convex hull area.
    pub solidity: f64,
    /// `4π·area / perimeter²` of the selected contour.
    pub circularity: f64,
    /// Bounding-box width divided by height of the selected contour.
    pub aspect_ratio: f64,
    /// Mean RGB sample value on a 0–1 scale.
    pub brightness: f64,
    /// Grayscale standard deviation (0–255 scale).
    pub contrast: f64,
    /// Laplacian variance of the grayscale image.
    pub blur_metric: f64,
    /// `true` when no usable external contour exists.
    ///
    /// Shape fields are all zero in that case and every rejection
    /// policy treats the image as not-a-leaf.
    pub no_contour: bool,
    /// Enclosed area of the selected contour in square pixels.
    pub contour_area: f64,
    /// Closed arc length of the selected contour in pixels.
    pub contour_perimeter: f64,
    /// Per-channel (R, G, B) standard deviation on the 0–255 scale.
    pub channel_std: [f64; 3],
}

/// Configuration for the pixel analysis half of the cascade.
///
/// All parameters have defaults matching the documented detector
/// constants; nothing in the extraction code hardcodes a band edge or
/// threshold.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Sharpness, brightness, and contrast limits.
    pub quality: QualityConfig,
    /// Color bands and detector parameters for feature extraction.
    pub features: FeatureConfig,
    /// Shadow, highlight, and background-complexity limits.
    pub environment: EnvironmentConfig,
    /// Which rejection policy the gate applies.
    pub rejection_policy: RejectionPolicyKind,
}

impl AnalysisConfig {
    /// Check cross-field invariants that `serde` cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] naming the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.quality.validate()?;
        self.features.validate()?;
        self.environment.validate()
    }
}

/// Errors raised while configuring the cascade or decoding its input.
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`
/// does not implement serde traits. The `ImageDecode` variant is
/// serialized as its `Display` string.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// A configuration value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Deployed artifacts disagree with each other, e.g. the label list
    /// does not match the classifier's class order.
    #[error("deployment configuration error: {0}")]
    DeploymentConfig(String),
}

/// Serde-compatible proxy for `PipelineError`.
#[derive(Serialize, Deserialize)]
enum PipelineErrorProxy {
    ImageDecode(String),
    EmptyInput,
    InvalidConfig(String),
    DeploymentConfig(String),
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::ImageDecode(e) => PipelineErrorProxy::ImageDecode(e.to_string()),
            Self::EmptyInput => PipelineErrorProxy::EmptyInput,
            Self::InvalidConfig(s) => PipelineErrorProxy::InvalidConfig(s.clone()),
            Self::DeploymentConfig(s) => PipelineErrorProxy::DeploymentConfig(s.clone()),
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = PipelineErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            // The typed image::ImageError cannot be rebuilt; keep the message.
            PipelineErrorProxy::ImageDecode(msg) => {
                Self::InvalidConfig(format!("image decode error: {msg}"))
            }
            PipelineErrorProxy::EmptyInput => Self::EmptyInput,
            PipelineErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
            PipelineErrorProxy::DeploymentConfig(s) => Self::DeploymentConfig(s),
        })
    }
}

/// Return `Err(InvalidConfig)` unless `value` lies in `[lo, hi]`.
pub(crate) fn ensure_range(name: &str, value: f64, lo: f64, hi: f64) -> Result<(), PipelineError> {
    if value.is_finite() && (lo..=hi).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "{name} must be within [{lo}, {hi}], got {value}"
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn dimensions_pixel_count() {
        let img = RgbImage::new(7, 3);
        let dims = Dimensions::of(&img);
        assert_eq!(dims, Dimensions { width: 7, height: 3 });
        assert_eq!(dims.pixel_count(), 21);
    }

    #[test]
    fn default_analysis_config_is_valid() {
        assert!(AnalysisConfig::default().validate().is_ok());
    }

    #[test]
    fn analysis_config_accepts_partial_json() {
        let config: AnalysisConfig =
            serde_json::from_str(r#"{"rejection_policy": "Binary"}"#).unwrap();
        assert_eq!(config.rejection_policy, RejectionPolicyKind::Binary);
        assert_eq!(config.quality, QualityConfig::default());
    }

    #[test]
    fn ensure_range_rejects_nan() {
        assert!(ensure_range("x", f64::NAN, 0.0, 1.0).is_err());
        assert!(ensure_range("x", 0.5, 0.0, 1.0).is_ok());
    }

    #[test]
    fn error_display() {
        let err = PipelineError::DeploymentConfig("label list mismatch".to_string());
        assert_eq!(
            err.to_string(),
            "deployment configuration error: label list mismatch"
        );
        assert_eq!(
            PipelineError::EmptyInput.to_string(),
            "input image data is empty"
        );
    }

    #[test]
    fn pipeline_error_serde_keeps_deployment_message() {
        let err = PipelineError::DeploymentConfig("5 labels, 4 outputs".to_string());
        let json = serde_json::to_string(&err).unwrap();
        let back: PipelineError = serde_json::from_str(&json).unwrap();
        assert!(matches!(back, PipelineError::DeploymentConfig(ref s) if s == "5 labels, 4 outputs"));
    }
}
