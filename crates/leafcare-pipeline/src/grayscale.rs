//! Image decoding, grayscale conversion, and intensity statistics.
//!
//! Decoding belongs to the caller in production (the cascade only sees
//! an [`RgbImage`]), but tools and tests that hold raw bytes go through
//! [`decode`] so failures surface as [`PipelineError`] values.

use image::{GrayImage, Luma, RgbImage};

use crate::types::PipelineError;

/// Decode raw image bytes (PNG, JPEG, BMP, WebP) into an RGB grid.
///
/// Alpha is discarded.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let img = image::load_from_memory(bytes)?;
    Ok(img.to_rgb8())
}

/// Convert an RGB image to grayscale with BT.601 weights.
///
/// `0.299*R + 0.587*G + 0.114*B`, rounded to nearest, in 14-bit fixed
/// point so the result does not depend on float rounding.
#[must_use = "returns the grayscale image"]
pub fn to_gray(image: &RgbImage) -> GrayImage {
    const R: u32 = 4899;
    const G: u32 = 9617;
    const B: u32 = 1868;
    const SHIFT: u32 = 14;
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let v = (u32::from(r) * R + u32::from(g) * G + u32::from(b) * B + (1 << (SHIFT - 1)))
            >> SHIFT;
        #[allow(clippy::cast_possible_truncation)]
        let v = v.min(255) as u8;
        Luma([v])
    })
}

/// Mean and population standard deviation of a stream of samples.
///
/// Returns `(0.0, 0.0)` for an empty stream.
#[must_use]
pub fn mean_std(samples: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut n = 0_u64;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for v in samples {
        n += 1;
        sum += v;
        sum_sq = v.mul_add(v, sum_sq);
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    #[allow(clippy::cast_precision_loss)]
    let count = n as f64;
    let mean = sum / count;
    let variance = mean.mul_add(-mean, sum_sq / count).max(0.0);
    (mean, variance.sqrt())
}

/// Mean and standard deviation of grayscale intensities (0–255 scale).
#[must_use]
pub fn intensity_stats(gray: &GrayImage) -> (f64, f64) {
    mean_std(gray.as_raw().iter().map(|&v| f64::from(v)))
}

/// Per-channel (R, G, B) standard deviation on the 0–255 scale.
#[must_use]
pub fn channel_std(image: &RgbImage) -> [f64; 3] {
    std::array::from_fn(|c| mean_std(image.pixels().map(|p| f64::from(p.0[c]))).1)
}
