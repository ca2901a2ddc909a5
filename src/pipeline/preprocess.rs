//! Image → tensor preprocessing.
//!
//! Pure bytes-to-tensor transform: no I/O, no model calls. The output feeds
//! the prediction cache key, so every step here must be deterministic for a
//! given input and config.
//!
//! Steps:
//! 1. Decode
//! 2. Convert to RGB (grayscale, alpha and palette inputs included)
//! 3. Resize to the target size (CatmullRom by default, bicubic-class)
//! 4. Scale to `[0, 1]`, then optionally apply ImageNet mean/std
//! 5. Lay out as NHWC `[1, H, W, 3]`

use image::imageops::FilterType;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::ImageSize;
use crate::tensor::{Tensor, TensorError};

/// ImageNet channel statistics (RGB order).
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Color conversion failed: {0}")]
    ColorConversion(String),

    #[error("Invalid target size {width}x{height}")]
    InvalidTargetSize { width: u32, height: u32 },

    #[error("Tensor construction failed: {0}")]
    Tensor(#[from] TensorError),
}

// ═══════════════════════════════════════════════════════════
// Configuration
// ═══════════════════════════════════════════════════════════

/// Pixel value normalization applied after scaling to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    /// `x / 255`.
    UnitScale,
    /// `(x / 255 - mean) / std` with ImageNet statistics.
    #[default]
    ImageNet,
}

/// Resize filter quality levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResizeQuality {
    /// CatmullRom (cubic). Same class as PIL's BICUBIC.
    #[default]
    High,
    /// Lanczos3. Sharper, slower.
    Sharpest,
    /// Triangle (bilinear).
    Fast,
}

impl ResizeQuality {
    fn filter(self) -> FilterType {
        match self {
            Self::High => FilterType::CatmullRom,
            Self::Sharpest => FilterType::Lanczos3,
            Self::Fast => FilterType::Triangle,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// ImagePreprocessor trait
// ═══════════════════════════════════════════════════════════

/// Turns validated image bytes into a model input tensor.
///
/// Config is fixed at construction so callers only hand over bytes.
pub trait ImagePreprocessor: Send + Sync {
    fn preprocess(&self, image_bytes: &[u8]) -> Result<Tensor, PreprocessError>;

    /// Shape of every tensor this preprocessor produces.
    fn output_shape(&self) -> [usize; 4];
}

/// Production preprocessor: RGB, fixed-size resize, per-channel normalization.
#[derive(Debug, Clone)]
pub struct TensorPreprocessor {
    target_size: ImageSize,
    normalization: Normalization,
    resize: ResizeQuality,
}

impl TensorPreprocessor {
    pub fn new(target_size: ImageSize, normalization: Normalization) -> Self {
        Self {
            target_size,
            normalization,
            resize: ResizeQuality::default(),
        }
    }

    pub fn with_resize_quality(mut self, resize: ResizeQuality) -> Self {
        self.resize = resize;
        self
    }

    pub fn target_size(&self) -> ImageSize {
        self.target_size
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }
}

impl ImagePreprocessor for TensorPreprocessor {
    fn preprocess(&self, image_bytes: &[u8]) -> Result<Tensor, PreprocessError> {
        let ImageSize { width, height } = self.target_size;
        if width == 0 || height == 0 {
            return Err(PreprocessError::InvalidTargetSize { width, height });
        }

        // 1. Decode
        let img = image::load_from_memory(image_bytes)
            .map_err(|e| PreprocessError::Decode(e.to_string()))?;
        let original_color = img.color();

        // 2. Convert to RGB
        if !crate::pipeline::validation::is_supported_color(original_color) {
            return Err(PreprocessError::ColorConversion(format!(
                "no RGB conversion for {original_color:?}"
            )));
        }
        let rgb = img.to_rgb8();

        // 3. Resize
        let resized = if rgb.dimensions() == (width, height) {
            rgb
        } else {
            image::imageops::resize(&rgb, width, height, self.resize.filter())
        };

        // 4 + 5. Normalize into NHWC
        let data = normalize_pixels(&resized, self.normalization);
        let tensor = Tensor::new(self.output_shape(), data)?;

        debug!(
            color = ?original_color,
            output = format!("{width}x{height}"),
            normalization = ?self.normalization,
            "Image preprocessed into tensor"
        );

        Ok(tensor)
    }

    fn output_shape(&self) -> [usize; 4] {
        self.target_size.input_shape()
    }
}

/// One-shot helper with default normalization and filter.
pub fn preprocess(image_bytes: &[u8], target_size: ImageSize) -> Result<Tensor, PreprocessError> {
    TensorPreprocessor::new(target_size, Normalization::default()).preprocess(image_bytes)
}

/// Row-major HWC floats from an RGB image.
pub fn normalize_pixels(image: &RgbImage, normalization: Normalization) -> Vec<f32> {
    let mut data = Vec::with_capacity(image.width() as usize * image.height() as usize * 3);
    for pixel in image.pixels() {
        for (channel, &value) in pixel.0.iter().enumerate() {
            let scaled = value as f32 / 255.0;
            data.push(match normalization {
                Normalization::UnitScale => scaled,
                Normalization::ImageNet => {
                    (scaled - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel]
                }
            });
        }
    }
    data
}
