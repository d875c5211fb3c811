//! Classifier input preparation: resize to the fixed input size and
//! normalize into an HWC `f32` tensor.

use std::fmt;

use image::RgbImage;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

/// Side length of the square classifier input.
pub const INPUT_SIZE: u32 = 224;

/// Number of channels in the classifier input.
pub const CHANNELS: usize = 3;

/// Resampling filter used to reach [`INPUT_SIZE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResizeFilter {
    /// Nearest-neighbor: fastest, blocky artifacts.
    Nearest,
    /// Bilinear interpolation.
    #[default]
    Triangle,
    /// Bicubic (Catmull-Rom).
    CatmullRom,
    /// Gaussian.
    Gaussian,
    /// Lanczos with 3 lobes.
    Lanczos3,
}

impl ResizeFilter {
    const fn to_image_filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Triangle => FilterType::Triangle,
            Self::CatmullRom => FilterType::CatmullRom,
            Self::Gaussian => FilterType::Gaussian,
            Self::Lanczos3 => FilterType::Lanczos3,
        }
    }
}

impl fmt::Display for ResizeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nearest => f.write_str("Nearest"),
            Self::Triangle => f.write_str("Triangle"),
            Self::CatmullRom => f.write_str("CatmullRom"),
            Self::Gaussian => f.write_str("Gaussian"),
            Self::Lanczos3 => f.write_str("Lanczos3"),
        }
    }
}

/// Channel order of the tensor's last axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ChannelOrder {
    /// Red, green, blue.
    #[default]
    Rgb,
    /// Blue, green, red.
    Bgr,
}

/// Pixel normalization applied after resizing.
///
/// Must match the preprocessing the deployed model was trained with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Normalization {
    /// Samples as-is on the 0–255 scale.
    Raw,
    /// Samples divided by 255.
    UnitRange,
    /// Reorder channels, then subtract a per-channel mean (given in
    /// the target channel order).
    MeanSubtraction {
        /// Mean to subtract from each output channel.
        mean: [f32; 3],
        /// Output channel order.
        channel_order: ChannelOrder,
    },
}

impl Normalization {
    /// Keras "caffe" convention used by ImageNet ResNet weights.
    pub const CAFFE: Self = Self::MeanSubtraction {
        mean: [103.939, 116.779, 123.68],
        channel_order: ChannelOrder::Bgr,
    };

    fn apply(self, rgb: [u8; 3]) -> [f32; 3] {
        let [r, g, b] = rgb.map(f32::from);
        match self {
            Self::Raw => [r, g, b],
            Self::UnitRange => [r / 255.0, g / 255.0, b / 255.0],
            Self::MeanSubtraction {
                mean,
                channel_order,
            } => {
                let ordered = match channel_order {
                    ChannelOrder::Rgb => [r, g, b],
                    ChannelOrder::Bgr => [b, g, r],
                };
                [
                    ordered[0] - mean[0],
                    ordered[1] - mean[1],
                    ordered[2] - mean[2],
                ]
            }
        }
    }
}

/// A normalized `224×224×3` classifier input in row-major HWC layout.
#[derive(Debug, Clone, PartialEq)]
pub struct InputTensor {
    data: Vec<f32>,
}

impl InputTensor {
    /// Number of `f32` values in every tensor.
    pub const LEN: usize = (INPUT_SIZE * INPUT_SIZE) as usize * CHANNELS;

    /// Resize `image` to the input size and normalize it.
    ///
    /// Images already at the input size are not resampled.
    #[must_use]
    pub fn from_image(image: &RgbImage, normalization: Normalization, filter: ResizeFilter) -> Self {
        let resized;
        let source = if image.dimensions() == (INPUT_SIZE, INPUT_SIZE) {
            image
        } else {
            resized = image::imageops::resize(image, INPUT_SIZE, INPUT_SIZE, filter.to_image_filter());
            &resized
        };
        let data = source
            .pixels()
            .flat_map(|p| normalization.apply(p.0))
            .collect();
        Self { data }
    }

    /// Flat HWC view of the tensor.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// The three channel values at `(x, y)`, or `None` out of bounds.
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[f32; 3]> {
        if x >= INPUT_SIZE || y >= INPUT_SIZE {
            return None;
        }
        let i = (y as usize * INPUT_SIZE as usize + x as usize) * CHANNELS;
        match self.data.get(i..i + CHANNELS)? {
            &[r, g, b] => Some([r, g, b]),
            _ => None,
        }
    }
}
