//! Classification entry point for the transport layer.
//!
//! `Classifier` wires the validation pipeline, the preprocessor and a shared
//! `ModelService`. The transport hands over raw upload bytes and gets back
//! either a `Classification` or a `ClassifyError` carrying a stable code.
//!
//! Steps:
//! 1. Model readiness (cheapest rejection, checked first)
//! 2. Validation: payload → signature → integrity → dimensions
//! 3. Preprocess into a tensor
//! 4. Cached prediction

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use crate::config::{ImageSize, ServiceConfig};
use crate::inference::{
    ClassProbability, ModelService, ModelServiceOptions, ModelStatus, Predictor, PredictorError,
    RankedResult, ServiceError,
};
use crate::pipeline::preprocess::{ImagePreprocessor, PreprocessError, TensorPreprocessor};
use crate::pipeline::validation::{ImageFormat, ValidationError, ValidationPipeline};
use crate::tensor::Tensor;

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

#[derive(Error, Debug)]
pub enum ClassifyError {
    #[error("Model is not ready (status: {0})")]
    NotReady(ModelStatus),

    #[error("{0}")]
    PayloadRejected(String),

    #[error("Not a supported image format: {0}")]
    InvalidFormat(String),

    #[error("Image data is corrupt: {0}")]
    Corrupt(String),

    #[error("{0}")]
    OutOfBounds(String),

    #[error("Image processing failed: {0}")]
    ProcessingFailure(#[source] PreprocessError),

    #[error("Prediction failed: {0}")]
    InferenceFailure(#[source] PredictorError),
}

impl ClassifyError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotReady(_) => "MODEL_NOT_READY",
            Self::PayloadRejected(_) => "FILE_VALIDATION_ERROR",
            Self::InvalidFormat(_) => "INVALID_FORMAT",
            Self::Corrupt(_) => "CORRUPT_IMAGE",
            Self::OutOfBounds(_) => "IMAGE_OUT_OF_BOUNDS",
            Self::ProcessingFailure(_) => "IMAGE_PROCESSING_ERROR",
            Self::InferenceFailure(_) => "PREDICTION_ERROR",
        }
    }

    /// True when the upload itself was at fault and resending it won't help.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::PayloadRejected(_) | Self::InvalidFormat(_) | Self::Corrupt(_) | Self::OutOfBounds(_)
        )
    }
}

impl From<ValidationError> for ClassifyError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::EmptyPayload | ValidationError::PayloadTooLarge { .. } => {
                Self::PayloadRejected(e.to_string())
            }
            ValidationError::InvalidFormat(msg) => Self::InvalidFormat(msg),
            ValidationError::Corrupt(msg) => Self::Corrupt(msg),
            ValidationError::OutOfBounds(msg) => Self::OutOfBounds(msg),
        }
    }
}

impl From<PreprocessError> for ClassifyError {
    fn from(e: PreprocessError) -> Self {
        Self::ProcessingFailure(e)
    }
}

impl From<ServiceError> for ClassifyError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::NotReady(status) => Self::NotReady(status),
            ServiceError::Load(_) => Self::NotReady(ModelStatus::Error),
            ServiceError::Inference(e) => Self::InferenceFailure(e),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Stateless helper
// ═══════════════════════════════════════════════════════════

/// Validate `raw_bytes` and turn them into a model input tensor.
///
/// Builds the standard pipeline and preprocessor from `config` on each call.
/// Long-lived callers should hold a `Classifier` instead.
pub fn validate_and_preprocess(raw_bytes: &[u8], config: &ServiceConfig) -> Result<Tensor, ClassifyError> {
    ValidationPipeline::standard(&config.validation, config.max_upload_bytes).validate(raw_bytes)?;
    let tensor = TensorPreprocessor::new(config.target_size, config.normalization).preprocess(raw_bytes)?;
    Ok(tensor)
}

// ═══════════════════════════════════════════════════════════
// Classifier
// ═══════════════════════════════════════════════════════════

/// Result of one classification request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Classification {
    pub predictions: RankedResult,
    pub from_cache: bool,
    pub format: Option<ImageFormat>,
    /// Geometry of the upload before resizing.
    pub original_width: Option<u32>,
    pub original_height: Option<u32>,
    /// Size the image was resized to for the model.
    pub image_size: ImageSize,
    pub processing_time_ms: f64,
}

impl Classification {
    /// The `k` most probable classes.
    pub fn top(&self, k: usize) -> &[ClassProbability] {
        let entries = self.predictions.entries();
        &entries[..k.min(entries.len())]
    }
}

pub struct Classifier {
    validation: ValidationPipeline,
    preprocessor: Box<dyn ImagePreprocessor>,
    target_size: ImageSize,
    service: Arc<ModelService>,
}

impl Classifier {
    pub fn new(
        validation: ValidationPipeline,
        preprocessor: Box<dyn ImagePreprocessor>,
        target_size: ImageSize,
        service: Arc<ModelService>,
    ) -> Self {
        Self {
            validation,
            preprocessor,
            target_size,
            service,
        }
    }

    /// Standard pipeline and preprocessor from `config` around an existing service.
    pub fn from_config(config: &ServiceConfig, service: Arc<ModelService>) -> Self {
        Self::new(
            ValidationPipeline::standard(&config.validation, config.max_upload_bytes),
            Box::new(TensorPreprocessor::new(config.target_size, config.normalization)),
            config.target_size,
            service,
        )
    }

    /// Build the service around `predictor`, load it, and wrap it.
    ///
    /// A failed load is logged, not returned: the classifier still comes up
    /// and answers every request with `NotReady` until restarted.
    pub fn start(config: &ServiceConfig, predictor: Box<dyn Predictor>) -> Self {
        let mut service = ModelService::new(predictor, ModelServiceOptions::from_config(config));
        match service.load_model() {
            Ok(()) => info!(status = %service.status(), "Classifier started"),
            Err(e) => error!(error = %e, "Classifier started without a model"),
        }
        Self::from_config(config, Arc::new(service))
    }

    pub fn service(&self) -> &Arc<ModelService> {
        &self.service
    }

    pub fn classify(&self, image_bytes: &[u8]) -> Result<Classification, ClassifyError> {
        self.classify_with(image_bytes, None)
    }

    /// Like `classify`, with a per-request cache override.
    pub fn classify_with(
        &self,
        image_bytes: &[u8],
        use_cache: Option<bool>,
    ) -> Result<Classification, ClassifyError> {
        let started = Instant::now();

        // 1. Readiness
        if !self.service.is_ready() {
            return Err(ClassifyError::NotReady(self.service.status()));
        }

        // 2. Validation
        let report = self.validation.validate(image_bytes)?;

        // 3. Preprocess
        let tensor = self.preprocessor.preprocess(image_bytes)?;

        // 4. Predict
        let outcome = self.service.predict(&tensor, use_cache)?;

        Ok(Classification {
            predictions: outcome.result,
            from_cache: outcome.from_cache,
            format: report.format,
            original_width: report.width,
            original_height: report.height,
            image_size: self.target_size,
            processing_time_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }
}
