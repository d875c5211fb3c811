//! Heuristic leaf features computed from raw pixels.
//!
//! Every step is an independent measurement over the same inputs: the
//! RGB image, its grayscale conversion, and the shared edge map.

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

use crate::color::{HueBand, color_stats};
use crate::contour::largest_shape;
use crate::edge::{EdgeConfig, canny};
use crate::grayscale::{channel_std, intensity_stats, mean_std, to_gray};
use crate::lines::{HoughConfig, detect_segments};
use crate::quality::laplacian_variance;
use crate::texture::{GaborConfig, texture_score};
use crate::types::{FeatureVector, PipelineError};

/// Color bands and detector parameters for feature extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Hue band counted as green foliage.
    pub green: HueBand,
    /// Hue band counted as brown or yellow foliage.
    pub brown: HueBand,
    /// Edge detector shared with environment analysis.
    pub edges: EdgeConfig,
    /// Oriented texture filter bank.
    pub gabor: GaborConfig,
    /// Straight-segment detector for veins.
    pub hough: HoughConfig,
}

impl FeatureConfig {
    /// Validate every nested parameter block.
    ///
    /// # Errors
    ///
    /// Returns the first [`PipelineError::InvalidConfig`] found.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.green.validate("features.green")?;
        self.brown.validate("features.brown")?;
        self.edges.validate()?;
        self.gabor.validate()?;
        self.hough.validate()
    }
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            green: HueBand::GREEN,
            brown: HueBand::BROWN,
            edges: EdgeConfig::default(),
            gabor: GaborConfig::default(),
            hough: HoughConfig::default(),
        }
    }
}

/// Extract the feature vector from prepared rasters.
///
/// `gray` must be [`to_gray`] of `image` and `edges` the output of
/// [`canny`] on `gray`; the cascade computes both once and shares them.
#[must_use = "returns the extracted features"]
pub fn extract(
    image: &RgbImage,
    gray: &GrayImage,
    edges: &GrayImage,
    config: &FeatureConfig,
) -> FeatureVector {
    let colors = color_stats(image, &config.green, &config.brown);
    let texture = texture_score(gray, &config.gabor);
    let segments = detect_segments(edges, &config.hough);
    let vein_count = u32::try_from(segments.len()).unwrap_or(u32::MAX);
    let (brightness, _) = mean_std(image.as_raw().iter().map(|&v| f64::from(v) / 255.0));
    let (_, contrast) = intensity_stats(gray);
    let blur_metric = laplacian_variance(gray);

    let shape = largest_shape(edges);
    let no_contour = shape.is_none();
    let shape = shape.unwrap_or_default();

    FeatureVector {
        green_ratio: colors.green_ratio,
        brown_ratio: colors.brown_ratio,
        avg_saturation: colors.avg_saturation,
        texture_score: texture,
        vein_count,
        solidity: shape.solidity,
        circularity: shape.circularity,
        aspect_ratio: shape.aspect_ratio,
        brightness,
        contrast,
        blur_metric,
        no_contour,
        contour_area: shape.area,
        contour_perimeter: shape.perimeter,
        channel_std: channel_std(image),
    }
}

/// Convenience: grayscale, edge detection, then [`extract`].
#[must_use = "returns the extracted features"]
pub fn extract_features(image: &RgbImage, config: &FeatureConfig) -> FeatureVector {
    let gray = to_gray(image);
    let edges = canny(&gray, &config.edges);
    extract(image, &gray, &edges, config)
}
