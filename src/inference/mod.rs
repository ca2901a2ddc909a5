//! Inference boundary: the `Predictor` trait, ranked results, and the
//! cached `ModelService` in front of it.
//!
//! The model itself is a black box behind `Predictor`. `ModelService` owns
//! one, tracks its readiness, and deduplicates identical tensors through
//! `PredictionCache`.

pub mod cache;
pub mod labels;
pub mod service;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use cache::PredictionCache;
pub use labels::{load_labels, parse_labels};
pub use service::{CacheInfo, ModelService, ModelServiceOptions, PredictionOutcome, ServiceError, ServiceStatistics};

#[cfg(feature = "onnx")]
pub use onnx::OnnxPredictor;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tensor::Tensor;

#[derive(Error, Debug)]
pub enum PredictorError {
    #[error("Model file not found: {0}")]
    ModelNotFound(PathBuf),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Model not loaded")]
    NotLoaded,

    #[error("Prediction failed: {0}")]
    Prediction(String),
}

// ═══════════════════════════════════════════════════════════
// Ranked results
// ═══════════════════════════════════════════════════════════

/// One class and its probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassProbability {
    pub class_name: String,
    pub probability: f64,
}

/// Every class the model knows, sorted by descending probability.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RankedResult(Vec<ClassProbability>);

impl RankedResult {
    /// Sort `entries` by descending probability. Ties keep input order.
    pub fn from_unsorted(mut entries: Vec<ClassProbability>) -> Self {
        entries.sort_by(|a, b| b.probability.total_cmp(&a.probability));
        Self(entries)
    }

    pub fn top(&self) -> Option<&ClassProbability> {
        self.0.first()
    }

    pub fn entries(&self) -> &[ClassProbability] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ClassProbability> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn probability_sum(&self) -> f64 {
        self.0.iter().map(|c| c.probability).sum()
    }

    pub fn into_inner(self) -> Vec<ClassProbability> {
        self.0
    }
}

/// Softmax over `logits`, paired with `class_names`, sorted descending.
///
/// The model must produce exactly one logit per class.
pub fn rank_logits(logits: &[f32], class_names: &[String]) -> Result<RankedResult, PredictorError> {
    if logits.len() != class_names.len() {
        return Err(PredictorError::Prediction(format!(
            "model produced {} logits for {} classes",
            logits.len(),
            class_names.len()
        )));
    }
    if logits.is_empty() {
        return Err(PredictorError::Prediction("model has no classes".into()));
    }

    let max = logits
        .iter()
        .map(|&l| l as f64)
        .fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&l| (l as f64 - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    if !sum.is_finite() || sum <= 0.0 {
        return Err(PredictorError::Prediction(format!(
            "logits do not form a distribution (sum of exponentials {sum})"
        )));
    }

    let entries = class_names
        .iter()
        .zip(exps)
        .map(|(name, e)| ClassProbability {
            class_name: name.clone(),
            probability: e / sum,
        })
        .collect();

    Ok(RankedResult::from_unsorted(entries))
}

// ═══════════════════════════════════════════════════════════
// Model status + info
// ═══════════════════════════════════════════════════════════

/// Readiness state machine: NotLoaded → Loading → Ready | Error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    NotLoaded,
    Loading,
    Ready,
    Error,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotLoaded => "not_loaded",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelInfo {
    pub status: ModelStatus,
    pub class_count: usize,
    pub class_names: Vec<String>,
    /// Expected input shape, when the model declares a static one.
    pub input_shape: Option<[usize; 4]>,
}

impl ModelInfo {
    pub fn new(status: ModelStatus, class_names: Vec<String>, input_shape: Option<[usize; 4]>) -> Self {
        Self {
            status,
            class_count: class_names.len(),
            class_names,
            input_shape,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Predictor trait
// ═══════════════════════════════════════════════════════════

/// A trained classifier.
///
/// `load_model` runs once at startup before the predictor is shared, hence
/// `&mut self`. `predict` may be called from many threads at once and can
/// be slow; callers must not hold locks across it.
pub trait Predictor: Send + Sync {
    fn load_model(&mut self) -> Result<(), PredictorError>;

    fn is_ready(&self) -> bool;

    /// One ranked entry per class, probabilities summing to 1.
    fn predict(&self, tensor: &Tensor) -> Result<RankedResult, PredictorError>;

    fn model_info(&self) -> ModelInfo;
}
