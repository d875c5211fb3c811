//! Canny edge detection shared by feature extraction and environment
//! analysis.
//!
//! Returns a binary image where white pixels (255) are edges and black
//! pixels (0) are background. The edge map is computed once per request
//! and read by the vein detector, the contour tracer, and the
//! background-complexity check.
//!
//! Sobel gradients, L2 magnitude, non-maximum suppression, then
//! hysteresis. Unlike `imageproc::edges::canny` the optional Gaussian
//! pre-blur is configurable (off by default, matching a plain two-
//! threshold detector) and the hysteresis walk checks all eight
//! neighbours with bounds checks at the image border.

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::filter::{filter_clamped, gaussian_blur_f32};
use imageproc::kernel;
use serde::{Deserialize, Serialize};

use crate::types::{PipelineError, ensure_range};

/// Minimum allowed Canny threshold.
///
/// A threshold of zero turns every pixel with any gradient into an
/// edge candidate, which floods the line detector.
pub const MIN_THRESHOLD: f32 = 1.0;
const _: () = assert!(MIN_THRESHOLD > 0.0);

/// Two-threshold edge detector parameters (8-bit gradient scale).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Gradient magnitude above which a pixel may continue an edge.
    pub low_threshold: f32,
    /// Gradient magnitude above which a pixel starts an edge.
    pub high_threshold: f32,
    /// Gaussian sigma applied before the gradient; `0.0` disables it.
    pub blur_sigma: f32,
}

impl EdgeConfig {
    /// Default low threshold.
    pub const DEFAULT_LOW: f32 = 50.0;
    /// Default high threshold.
    pub const DEFAULT_HIGH: f32 = 150.0;
    /// Default pre-blur sigma (disabled).
    pub const DEFAULT_BLUR_SIGMA: f32 = 0.0;

    /// Check that the thresholds are ordered and finite.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if `low_threshold`
    /// exceeds `high_threshold` or a value is out of range.
    pub fn validate(&self) -> Result<(), PipelineError> {
        ensure_range("edges.low_threshold", f64::from(self.low_threshold), f64::from(MIN_THRESHOLD), 2048.0)?;
        ensure_range("edges.high_threshold", f64::from(self.high_threshold), f64::from(self.low_threshold), 2048.0)?;
        ensure_range("edges.blur_sigma", f64::from(self.blur_sigma), 0.0, 32.0)
    }
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            low_threshold: Self::DEFAULT_LOW,
            high_threshold: Self::DEFAULT_HIGH,
            blur_sigma: Self::DEFAULT_BLUR_SIGMA,
        }
    }
}

/// Detect edges using the Canny algorithm.
///
/// Returns a binary image: 255 for edge pixels, 0 for non-edge. Images
/// narrower or shorter than 3 pixels have no interior and produce an
/// empty map.
///
/// Both thresholds are clamped to at least [`MIN_THRESHOLD`] and the
/// low threshold is clamped to at most the high one.
#[must_use = "returns the binary edge map"]
pub fn canny(image: &GrayImage, config: &EdgeConfig) -> GrayImage {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return GrayImage::new(width, height);
    }
    let high = config.high_threshold.max(MIN_THRESHOLD);
    let low = config.low_threshold.max(MIN_THRESHOLD).min(high);

    let smoothed = if config.blur_sigma > 0.0 {
        gaussian_blur_f32(image, config.blur_sigma)
    } else {
        image.clone()
    };

    let gx: Image<Luma<i16>> = filter_clamped(&smoothed, kernel::SOBEL_HORIZONTAL_3X3);
    let gy: Image<Luma<i16>> = filter_clamped(&smoothed, kernel::SOBEL_VERTICAL_3X3);
    let magnitude: Vec<f32> = gx
        .as_raw()
        .iter()
        .zip(gy.as_raw())
        .map(|(&h, &v)| f32::from(h).hypot(f32::from(v)))
        .collect();

    let w = width as usize;
    let h = height as usize;
    let thinned = suppress_non_maxima(&magnitude, gx.as_raw(), gy.as_raw(), w, h);
    let marks = hysteresis(&thinned, w, h, low, high);
    GrayImage::from_fn(width, height, |x, y| {
        Luma([marks[y as usize * w + x as usize]])
    })
}

/// Keep only pixels that are local maxima across the gradient direction.
///
/// The direction is quantized to 0°, 45°, 90°, or 135°. Border pixels
/// are always suppressed.
fn suppress_non_maxima(magnitude: &[f32], gx: &[i16], gy: &[i16], w: usize, h: usize) -> Vec<f32> {
    let mut out = vec![0.0; magnitude.len()];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let i = y * w + x;
            let m = magnitude[i];
            if m <= 0.0 {
                continue;
            }
            let mut angle = f32::from(gy[i]).atan2(f32::from(gx[i])).to_degrees();
            if angle < 0.0 {
                angle += 180.0;
            }
            let (a, b) = if !(22.5..157.5).contains(&angle) {
                (i - 1, i + 1)
            } else if angle < 67.5 {
                (i + w + 1, i - w - 1)
            } else if angle < 112.5 {
                (i - w, i + w)
            } else {
                (i + w - 1, i - w + 1)
            };
            if m >= magnitude[a] && m >= magnitude[b] {
                out[i] = m;
            }
        }
    }
    out
}

/// Eight-connected neighbour offsets.
const NEIGHBORS: [(isize, isize); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Grow edges from strong pixels through weak ones (iterative DFS).
fn hysteresis(strength: &[f32], w: usize, h: usize, low: f32, high: f32) -> Vec<u8> {
    let mut out = vec![0_u8; strength.len()];
    let mut stack = Vec::new();
    for seed in 0..strength.len() {
        if strength[seed] < high || out[seed] != 0 {
            continue;
        }
        out[seed] = 255;
        stack.push(seed);
        while let Some(i) = stack.pop() {
            let (x, y) = (i % w, i / w);
            for (dx, dy) in NEIGHBORS {
                let (Some(nx), Some(ny)) = (x.checked_add_signed(dx), y.checked_add_signed(dy))
                else {
                    continue;
                };
                if nx >= w || ny >= h {
                    continue;
                }
                let k = ny * w + nx;
                if out[k] == 0 && strength[k] >= low {
                    out[k] = 255;
                    stack.push(k);
                }
            }
        }
    }
    out
}

/// Number of edge pixels (non-zero) in a binary edge map.
#[must_use]
pub fn count_edge_pixels(edges: &GrayImage) -> u64 {
    edges.as_raw().iter().map(|&v| u64::from(v > 0)).sum()
}

/// Fraction of pixels in the edge map that are edges.
#[must_use]
pub fn edge_density(edges: &GrayImage) -> f64 {
    let total = edges.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let density = count_edge_pixels(edges) as f64 / total as f64;
    density
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20x20 image with a sharp vertical boundary at x = 10.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(20, 20, |x, _y| {
            if x < 10 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    fn with_thresholds(low: f32, high: f32) -> EdgeConfig {
        EdgeConfig {
            low_threshold: low,
            high_threshold: high,
            ..EdgeConfig::default()
        }
    }

    #[test]
    fn blank_image_produces_no_edges() {
        let img = GrayImage::from_fn(20, 20, |_, _| image::Luma([128]));
        let edges = canny(&img, &EdgeConfig::default());
        assert_eq!(edges.dimensions(), (20, 20));
        assert_eq!(count_edge_pixels(&edges), 0);
    }

    #[test]
    fn sharp_edge_detected_near_boundary() {
        let edges = canny(&sharp_edge_image(), &EdgeConfig::default());
        assert!(count_edge_pixels(&edges) > 0, "expected edges at sharp boundary");
        for (x, _, p) in edges.enumerate_pixels() {
            if p.0[0] > 0 {
                assert!((8..=11).contains(&x), "edge pixel far from boundary at x={x}");
            }
        }
    }

    #[test]
    fn edges_are_thin() {
        let edges = canny(&sharp_edge_image(), &EdgeConfig::default());
        for y in 1..19 {
            let row: u32 = (0..20).map(|x| u32::from(edges.get_pixel(x, y).0[0] > 0)).sum();
            assert!(row <= 2, "row {y} has {row} edge pixels");
        }
    }

    #[test]
    fn output_dimensions_match_input() {
        let img = GrayImage::new(17, 31);
        let edges = canny(&img, &EdgeConfig::default());
        assert_eq!(edges.width(), 17);
        assert_eq!(edges.height(), 31);
    }

    #[test]
    fn tiny_image_has_no_edges() {
        let img = GrayImage::from_fn(2, 5, |x, _| image::Luma([if x == 0 { 0 } else { 255 }]));
        let edges = canny(&img, &EdgeConfig::default());
        assert_eq!(edges.dimensions(), (2, 5));
        assert_eq!(count_edge_pixels(&edges), 0);
    }

    #[test]
    fn border_edge_does_not_panic() {
        let img = GrayImage::from_fn(10, 10, |x, _| image::Luma([if x == 1 { 255 } else { 0 }]));
        let _edges = canny(&img, &with_thresholds(1.0, 2.0));
    }

    #[test]
    fn zero_low_threshold_is_clamped_to_min() {
        let img = sharp_edge_image();
        assert_eq!(
            canny(&img, &with_thresholds(0.0, 150.0)),
            canny(&img, &with_thresholds(MIN_THRESHOLD, 150.0)),
        );
    }

    #[test]
    fn low_above_high_is_clamped() {
        let img = sharp_edge_image();
        assert_eq!(
            canny(&img, &with_thresholds(200.0, 100.0)),
            canny(&img, &with_thresholds(100.0, 100.0)),
        );
    }

    #[test]
    fn pre_blur_keeps_strong_edges() {
        let config = EdgeConfig {
            blur_sigma: 1.4,
            ..EdgeConfig::default()
        };
        let edges = canny(&sharp_edge_image(), &config);
        assert!(count_edge_pixels(&edges) > 0);
    }

    #[test]
    fn density_of_half_filled_map() {
        let map = GrayImage::from_fn(4, 4, |x, _| image::Luma([if x < 2 { 255 } else { 0 }]));
        assert!((edge_density(&map) - 0.5).abs() < f64::EPSILON);
        assert!(edge_density(&GrayImage::new(0, 0)).abs() < f64::EPSILON);
    }

    #[test]
    fn validate_rejects_inverted_thresholds() {
        assert!(EdgeConfig::default().validate().is_ok());
        assert!(with_thresholds(120.0, 60.0).validate().is_err());
    }
}
