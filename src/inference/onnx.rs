//! ONNX Runtime predictor, behind the `onnx` feature.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ort::session::Session;
use ort::value::TensorRef;

use super::{load_labels, rank_logits, ModelInfo, ModelStatus, Predictor, PredictorError, RankedResult};
use crate::config::ServiceConfig;
use crate::tensor::Tensor;

/// Image classifier backed by an ONNX model taking NHWC `f32` input and
/// producing one logit per class.
///
/// `ort::Session::run` needs `&mut self`, so the session sits behind a
/// `Mutex`; inferences through one predictor are serialized.
pub struct OnnxPredictor {
    model_path: PathBuf,
    labels_path: PathBuf,
    input_shape: [usize; 4],
    intra_threads: usize,
    session: Option<Mutex<Session>>,
    class_names: Vec<String>,
}

impl OnnxPredictor {
    pub fn new(model_path: &Path, labels_path: &Path, input_shape: [usize; 4]) -> Self {
        Self {
            model_path: model_path.to_path_buf(),
            labels_path: labels_path.to_path_buf(),
            input_shape,
            intra_threads: 1,
            session: None,
            class_names: Vec::new(),
        }
    }

    /// Model and labels paths from `config`, input shape from its target size.
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            &config.model_path,
            &config.labels_path,
            config.target_size.input_shape(),
        )
    }

    pub fn with_intra_threads(mut self, threads: usize) -> Self {
        self.intra_threads = threads.max(1);
        self
    }
}

impl Predictor for OnnxPredictor {
    fn load_model(&mut self) -> Result<(), PredictorError> {
        if !self.model_path.exists() {
            return Err(PredictorError::ModelNotFound(self.model_path.clone()));
        }
        let class_names = load_labels(&self.labels_path)?;

        let session = Session::builder()
            .map_err(|e: ort::Error| PredictorError::ModelLoad(e.to_string()))?
            .with_intra_threads(self.intra_threads)
            .map_err(|e: ort::Error| PredictorError::ModelLoad(e.to_string()))?
            .commit_from_file(&self.model_path)
            .map_err(|e: ort::Error| PredictorError::ModelLoad(format!("ONNX load failed: {e}")))?;

        tracing::info!(
            model = %self.model_path.display(),
            classes = class_names.len(),
            "ONNX model loaded"
        );

        self.class_names = class_names;
        self.session = Some(Mutex::new(session));
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.session.is_some()
    }

    fn predict(&self, tensor: &Tensor) -> Result<RankedResult, PredictorError> {
        let session = self.session.as_ref().ok_or(PredictorError::NotLoaded)?;

        if tensor.shape() != self.input_shape {
            return Err(PredictorError::Prediction(format!(
                "input shape {:?} does not match model input {:?}",
                tensor.shape(),
                self.input_shape
            )));
        }

        let [n, h, w, c] = self.input_shape;
        let input = ndarray::Array4::from_shape_vec((n, h, w, c), tensor.data().to_vec())
            .map_err(|e| PredictorError::Prediction(e.to_string()))?;
        let input = TensorRef::from_array_view(&input)
            .map_err(|e| PredictorError::Prediction(e.to_string()))?;

        let mut session = session
            .lock()
            .map_err(|_| PredictorError::Prediction("Session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![input])
            .map_err(|e| PredictorError::Prediction(format!("ONNX inference failed: {e}")))?;

        let (shape, logits) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| PredictorError::Prediction(format!("Output extraction: {e}")))?;

        // Expect [1, classes].
        if logits.len() != self.class_names.len() {
            return Err(PredictorError::Prediction(format!(
                "Unexpected output shape: {shape:?}, expected [1, {}]",
                self.class_names.len()
            )));
        }

        rank_logits(logits, &self.class_names)
    }

    fn model_info(&self) -> ModelInfo {
        let status = if self.is_ready() {
            ModelStatus::Ready
        } else {
            ModelStatus::NotLoaded
        };
        ModelInfo::new(status, self.class_names.clone(), Some(self.input_shape))
    }
}
