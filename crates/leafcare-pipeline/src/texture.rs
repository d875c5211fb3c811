//! Oriented Gabor filter bank for leaf surface texture.
//!
//! Each orientation's kernel is correlated with the grayscale image and
//! the output saturates to 8 bits; the texture score is the mean of
//! the per-orientation response means.

use std::f64::consts::TAU;

use image::GrayImage;
use imageproc::filter::filter_clamped;
use imageproc::kernel::Kernel;
use serde::{Deserialize, Serialize};

use crate::types::{PipelineError, ensure_range};

/// Gabor kernel parameters shared by every orientation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaborConfig {
    /// Side length of the square kernel (odd).
    pub kernel_size: u32,
    /// Standard deviation of the Gaussian envelope.
    pub sigma: f64,
    /// Wavelength of the sinusoidal carrier in pixels.
    pub lambda: f64,
    /// Spatial aspect ratio of the envelope.
    pub gamma: f64,
    /// Phase offset of the carrier in radians.
    pub psi: f64,
    /// Filter orientations in degrees.
    pub orientations: Vec<f64>,
}

impl GaborConfig {
    /// Default kernel side length.
    pub const DEFAULT_KERNEL_SIZE: u32 = 21;

    /// Check kernel geometry and envelope parameters.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for an even or tiny
    /// kernel, non-positive sigma/lambda/gamma, or no orientations.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.kernel_size % 2 == 0 || self.kernel_size < 3 || self.kernel_size > 101 {
            return Err(PipelineError::InvalidConfig(format!(
                "gabor.kernel_size must be odd and within [3, 101], got {}",
                self.kernel_size
            )));
        }
        if self.orientations.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "gabor.orientations must not be empty".to_string(),
            ));
        }
        ensure_range("gabor.sigma", self.sigma, 0.1, 100.0)?;
        ensure_range("gabor.lambda", self.lambda, 0.1, 1000.0)?;
        ensure_range("gabor.gamma", self.gamma, 0.01, 100.0)?;
        ensure_range("gabor.psi", self.psi, -TAU, TAU)
    }

    /// Build the kernel for one orientation, row-major, `kernel_size²`
    /// coefficients.
    #[must_use]
    pub fn kernel(&self, orientation_degrees: f64) -> Vec<f32> {
        let side = self.kernel_size as usize;
        let half = f64::from(self.kernel_size / 2);
        let (sin, cos) = orientation_degrees.to_radians().sin_cos();
        let sigma_y = self.sigma / self.gamma;
        let ex = -0.5 / (self.sigma * self.sigma);
        let ey = -0.5 / (sigma_y * sigma_y);
        let carrier = TAU / self.lambda;

        let mut data = Vec::with_capacity(side * side);
        for row in 0..side {
            #[allow(clippy::cast_precision_loss)]
            let y = half - row as f64;
            for col in 0..side {
                #[allow(clippy::cast_precision_loss)]
                let x = half - col as f64;
                let xr = x.mul_add(cos, y * sin);
                let yr = (-x).mul_add(sin, y * cos);
                let envelope = (ex * xr).mul_add(xr, ey * yr * yr).exp();
                #[allow(clippy::cast_possible_truncation)]
                let value = (envelope * carrier.mul_add(xr, self.psi).cos()) as f32;
                data.push(value);
            }
        }
        data
    }
}

impl Default for GaborConfig {
    fn default() -> Self {
        Self {
            kernel_size: Self::DEFAULT_KERNEL_SIZE,
            sigma: 5.0,
            lambda: 10.0,
            gamma: 0.5,
            psi: 0.0,
            orientations: vec![0.0, 45.0, 90.0, 135.0],
        }
    }
}

/// Mean 8-bit response of each orientation, in configuration order.
#[must_use]
pub fn orientation_responses(gray: &GrayImage, config: &GaborConfig) -> Vec<f64> {
    let pixel_count = gray.as_raw().len();
    if pixel_count == 0 {
        return vec![0.0; config.orientations.len()];
    }
    config
        .orientations
        .iter()
        .map(|&theta| {
            let data = config.kernel(theta);
            let kernel = Kernel::new(&data, config.kernel_size, config.kernel_size);
            let response: GrayImage = filter_clamped(gray, kernel);
            let sum: u64 = response.as_raw().iter().map(|&v| u64::from(v)).sum();
            #[allow(clippy::cast_precision_loss)]
            let mean = sum as f64 / pixel_count as f64;
            mean
        })
        .collect()
}

/// Mean of the per-orientation response means.
#[must_use]
pub fn texture_score(gray: &GrayImage, config: &GaborConfig) -> f64 {
    let responses = orientation_responses(gray, config);
    if responses.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let score = responses.iter().sum::<f64>() / responses.len() as f64;
    score
}
