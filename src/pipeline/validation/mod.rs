//! Upload validation pipeline.
//!
//! Each check is an independent `ValidationStage`. `ValidationPipeline` runs
//! them in order and stops at the first rejection, so a buffer that fails
//! both the signature and the dimension check reports the signature failure.
//!
//! Standard order:
//! 1. `PayloadValidator`: empty / oversize upload
//! 2. `SignatureValidator`: magic bytes (JPEG, PNG, GIF, WebP)
//! 3. `IntegrityValidator`: structural parse + full pixel decode
//! 4. `DimensionValidator`: min/max size, aspect ratio

pub mod dimensions;
pub mod integrity;
pub mod payload;
pub mod signature;

pub use dimensions::*;
pub use integrity::*;
pub use payload::*;
pub use signature::*;

use image::ColorType;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ValidationConfig;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Empty upload")]
    EmptyPayload,

    #[error("Upload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Not a supported image format: {0}")]
    InvalidFormat(String),

    #[error("Image data is corrupt: {0}")]
    Corrupt(String),

    #[error("{0}")]
    OutOfBounds(String),
}

/// What the stages learned about the upload while checking it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub byte_len: usize,
    pub format: Option<ImageFormat>,
    pub color: Option<ColorType>,
    pub width: Option<u32>,
    pub height: Option<u32>,
}

/// One check in the validation pipeline.
///
/// Stages are pure functions of the bytes. They may record what they found
/// in the report for later stages or the caller.
pub trait ValidationStage: Send + Sync {
    /// Short stable name used in logs.
    fn name(&self) -> &'static str;

    fn validate(&self, bytes: &[u8], report: &mut ValidationReport) -> Result<(), ValidationError>;
}

/// Ordered list of stages with fail-fast semantics.
pub struct ValidationPipeline {
    stages: Vec<Box<dyn ValidationStage>>,
}

impl ValidationPipeline {
    pub fn new(stages: Vec<Box<dyn ValidationStage>>) -> Self {
        Self { stages }
    }

    /// Payload → signature → integrity → dimensions.
    pub fn standard(bounds: &ValidationConfig, max_upload_bytes: usize) -> Self {
        Self::new(vec![
            Box::new(PayloadValidator::new(max_upload_bytes)),
            Box::new(SignatureValidator),
            Box::new(IntegrityValidator),
            Box::new(DimensionValidator::new(bounds.clone())),
        ])
    }

    /// Append a stage after the existing ones.
    pub fn with_stage(mut self, stage: Box<dyn ValidationStage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn validate(&self, bytes: &[u8]) -> Result<ValidationReport, ValidationError> {
        let mut report = ValidationReport {
            byte_len: bytes.len(),
            ..ValidationReport::default()
        };

        for stage in &self.stages {
            if let Err(e) = stage.validate(bytes, &mut report) {
                warn!(stage = stage.name(), error = %e, "Upload rejected");
                return Err(e);
            }
            debug!(stage = stage.name(), "Validation stage passed");
        }

        Ok(report)
    }
}
