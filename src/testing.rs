//! Shared test fixtures: in-memory images and a scriptable predictor.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};

use crate::inference::{
    rank_logits, ModelInfo, ModelStatus, Predictor, PredictorError, RankedResult,
};
use crate::tensor::Tensor;

fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, format).unwrap();
    cursor.into_inner()
}

pub fn encode_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
}

pub fn encode_jpeg(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = RgbImage::from_pixel(width, height, Rgb(color));
    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, 90)
        .encode_image(&img)
        .unwrap();
    bytes
}

pub fn encode_gray_png(width: u32, height: u32, luma: u8) -> Vec<u8> {
    let img = GrayImage::from_pixel(width, height, Luma([luma]));
    encode(DynamicImage::ImageLuma8(img), ImageFormat::Png)
}

pub fn encode_rgba_png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, Rgba(color));
    encode(DynamicImage::ImageRgba8(img), ImageFormat::Png)
}

/// Non-uniform PNG, so the compressed stream is large enough to truncate mid-data.
pub fn encode_gradient_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 7 % 256) as u8,
            (y * 13 % 256) as u8,
            ((x * y) % 256) as u8,
        ])
    });
    encode(DynamicImage::ImageRgb8(img), ImageFormat::Png)
}

/// Real WebP files in each bitstream flavor. All three are in color: red
/// on the left half and blue on the right for the two 16x16 files, a
/// 128x128 photo for the lossy one. The alpha file is half transparent.
pub const WEBP_LOSSY: &[u8] = include_bytes!("../test_data/lossy_color.webp");
pub const WEBP_LOSSLESS: &[u8] = include_bytes!("../test_data/lossless_color.webp");
pub const WEBP_ALPHA: &[u8] = include_bytes!("../test_data/alpha_color.webp");

/// `RIFF` + size + `marker` + padding. `b"WEBP"` looks like WebP, `b"AVI "` like AVI.
pub fn webp_like_header(marker: &[u8; 4]) -> Vec<u8> {
    let mut bytes = b"RIFF".to_vec();
    bytes.extend_from_slice(&24u32.to_le_bytes());
    bytes.extend_from_slice(marker);
    bytes.resize(32, 0);
    bytes
}

pub const CLASS_NAMES: [&str; 3] = ["cat", "dog", "bird"];

/// Predictor stand-in: ranks fixed logits, counts calls, can be told to fail.
pub struct FakePredictor {
    pub calls: Arc<AtomicUsize>,
    pub fail_load: bool,
    pub fail_predict: Arc<AtomicBool>,
    /// Warmup tensors are filled with this value; failing those lets tests
    /// break warmup without breaking real predictions.
    pub fail_on_fill: Option<f32>,
    pub delay: Option<Duration>,
    /// Makes a loaded predictor report not ready, as if its session were
    /// released. Cleared by `load_model`.
    pub unloaded: Arc<AtomicBool>,
    loaded: bool,
}

impl FakePredictor {
    pub fn new() -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            fail_load: false,
            fail_predict: Arc::new(AtomicBool::new(false)),
            fail_on_fill: None,
            delay: None,
            unloaded: Arc::new(AtomicBool::new(false)),
            loaded: false,
        }
    }

    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Predictor for FakePredictor {
    fn load_model(&mut self) -> Result<(), PredictorError> {
        if self.fail_load {
            return Err(PredictorError::ModelLoad("weights file missing".into()));
        }
        self.loaded = true;
        self.unloaded.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.loaded && !self.unloaded.load(Ordering::SeqCst)
    }

    fn predict(&self, tensor: &Tensor) -> Result<RankedResult, PredictorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail_predict.load(Ordering::SeqCst) {
            return Err(PredictorError::Prediction("runtime exploded".into()));
        }
        if let Some(fill) = self.fail_on_fill {
            if tensor.data().iter().all(|v| *v == fill) {
                return Err(PredictorError::Prediction("warmup input rejected".into()));
            }
        }
        let mean = tensor.data().iter().sum::<f32>() / tensor.len().max(1) as f32;
        let names: Vec<String> = CLASS_NAMES.iter().map(|s| s.to_string()).collect();
        rank_logits(&[mean, 1.0, -mean], &names)
    }

    fn model_info(&self) -> ModelInfo {
        let status = if self.is_ready() {
            ModelStatus::Ready
        } else {
            ModelStatus::NotLoaded
        };
        ModelInfo::new(
            status,
            CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
            Some([1, 8, 8, 3]),
        )
    }
}
