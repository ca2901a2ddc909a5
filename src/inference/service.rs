//! Model service: readiness, cached prediction, statistics.
//!
//! One `ModelService` per process. It is built and loaded on the startup
//! thread, then shared behind an `Arc`; everything after `load_model` takes
//! `&self`.
//!
//! Prediction steps:
//! 1. Reject if the model is not ready
//! 2. Count the request
//! 3. Hash the tensor and look it up (short cache lock)
//! 4. On a miss, run inference with no lock held
//! 5. Store the result
//!
//! Two threads missing on the same tensor at once may both run inference.
//! The result is identical, so the second `put` is harmless.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::cache::PredictionCache;
use super::{ModelInfo, ModelStatus, Predictor, PredictorError, RankedResult};
use crate::config::{CacheConfig, ServiceConfig};
use crate::tensor::Tensor;

/// Value every element of the warmup tensor is set to.
pub const WARMUP_FILL: f32 = 0.5;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Model is not ready (status: {0})")]
    NotReady(ModelStatus),

    #[error("Model failed to load: {0}")]
    Load(#[source] PredictorError),

    #[error("Inference failed: {0}")]
    Inference(#[source] PredictorError),
}

// ═══════════════════════════════════════════════════════════
// Options
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct ModelServiceOptions {
    pub cache: CacheConfig,
    pub warmup: bool,
    /// Warmup tensor shape when the predictor does not declare one.
    pub input_shape: [usize; 4],
}

impl ModelServiceOptions {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            cache: config.cache.clone(),
            warmup: config.warmup,
            input_shape: config.target_size.input_shape(),
        }
    }
}

impl Default for ModelServiceOptions {
    fn default() -> Self {
        Self::from_config(&ServiceConfig::default())
    }
}

// ═══════════════════════════════════════════════════════════
// Reports
// ═══════════════════════════════════════════════════════════

/// A prediction and whether it came from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionOutcome {
    pub result: RankedResult,
    pub from_cache: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatistics {
    pub total_predictions: u64,
    pub cache_enabled: bool,
    pub cache_capacity: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Successful model invocations (warmup excluded).
    pub inference_count: u64,
    /// `cache_hits / total_predictions` as a percentage, two decimals.
    pub cache_hit_rate_percent: f64,
    /// Total inference time over `cache_misses`; 0 until the first miss.
    pub avg_inference_time_ms: f64,
    /// Total inference time over `inference_count`, cache or not.
    pub avg_time_per_inference_ms: f64,
    pub total_inference_time_ms: f64,
    pub warmup_completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    pub enabled: bool,
    pub size: usize,
    pub capacity: usize,
    pub ttl_secs: Option<u64>,
}

#[derive(Default)]
struct Counters {
    total_predictions: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    inference_count: AtomicU64,
    inference_nanos: AtomicU64,
    warmup_completed: AtomicBool,
}

// ═══════════════════════════════════════════════════════════
// ModelService
// ═══════════════════════════════════════════════════════════

pub struct ModelService {
    predictor: Box<dyn Predictor>,
    status: ModelStatus,
    load_error: Option<String>,
    cache: PredictionCache,
    cache_enabled: bool,
    warmup: bool,
    input_shape: [usize; 4],
    counters: Counters,
}

impl ModelService {
    pub fn new(predictor: Box<dyn Predictor>, options: ModelServiceOptions) -> Self {
        Self {
            predictor,
            status: ModelStatus::NotLoaded,
            load_error: None,
            cache: PredictionCache::with_ttl(options.cache.capacity, options.cache.ttl()),
            cache_enabled: options.cache.enabled,
            warmup: options.warmup,
            input_shape: options.input_shape,
            counters: Counters::default(),
        }
    }

    /// Load the model and, if enabled, run one warmup inference.
    ///
    /// A no-op once the model is ready. A failed load leaves the service in
    /// `ModelStatus::Error`; a later call may retry. Warmup failures are
    /// logged and do not affect readiness.
    pub fn load_model(&mut self) -> Result<(), ServiceError> {
        if self.is_ready() {
            return Ok(());
        }

        self.status = ModelStatus::Loading;
        info!("Loading model");
        let started = Instant::now();

        if let Err(e) = self.predictor.load_model() {
            error!(error = %e, "Model load failed");
            self.status = ModelStatus::Error;
            self.load_error = Some(e.to_string());
            return Err(ServiceError::Load(e));
        }

        self.status = ModelStatus::Ready;
        self.load_error = None;
        info!(
            classes = self.predictor.model_info().class_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Model ready"
        );

        if self.warmup {
            self.run_warmup();
        }
        Ok(())
    }

    fn run_warmup(&self) {
        let shape = self
            .predictor
            .model_info()
            .input_shape
            .unwrap_or(self.input_shape);

        let tensor = match Tensor::filled(shape, WARMUP_FILL) {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, "Warmup skipped: could not build input");
                return;
            }
        };

        let started = Instant::now();
        match self.predictor.predict(&tensor) {
            Ok(_) => {
                self.counters.warmup_completed.store(true, Ordering::Relaxed);
                info!(elapsed_ms = started.elapsed().as_millis() as u64, "Warmup inference done");
            }
            Err(e) => warn!(error = %e, "Warmup inference failed; model stays ready"),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ModelStatus::Ready && self.predictor.is_ready()
    }

    /// Lifecycle status, reconciled with the predictor: a service that loaded
    /// but whose predictor has since lost its model reports `NotLoaded`.
    pub fn status(&self) -> ModelStatus {
        if self.status == ModelStatus::Ready && !self.predictor.is_ready() {
            ModelStatus::NotLoaded
        } else {
            self.status
        }
    }

    /// Message from the most recent failed load, if the service is in `Error`.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Classify `tensor`. `use_cache` overrides the configured default.
    pub fn predict(
        &self,
        tensor: &Tensor,
        use_cache: Option<bool>,
    ) -> Result<PredictionOutcome, ServiceError> {
        // 1. Readiness
        if !self.is_ready() {
            return Err(ServiceError::NotReady(self.status()));
        }

        // 2. Count
        self.counters.total_predictions.fetch_add(1, Ordering::Relaxed);

        // 3. Cache lookup
        let use_cache = use_cache.unwrap_or(self.cache_enabled);
        let key = use_cache.then(|| tensor.content_hash());
        if let Some(key) = &key {
            if let Some(result) = self.cache.get(key) {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key.short(), "Prediction cache hit");
                return Ok(PredictionOutcome {
                    result,
                    from_cache: true,
                });
            }
            self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        // 4. Inference
        let started = Instant::now();
        let result = self.predictor.predict(tensor).map_err(|e| {
            error!(error = %e, "Inference failed");
            ServiceError::Inference(e)
        })?;
        let elapsed = started.elapsed();
        self.counters.inference_count.fetch_add(1, Ordering::Relaxed);
        self.counters
            .inference_nanos
            .fetch_add(duration_nanos(elapsed), Ordering::Relaxed);

        // 5. Store
        if let Some(key) = key {
            self.cache.put(key, result.clone());
            debug!(
                key = %key.short(),
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                "Prediction cached"
            );
        }

        Ok(PredictionOutcome {
            result,
            from_cache: false,
        })
    }

    pub fn statistics(&self) -> ServiceStatistics {
        let total = self.counters.total_predictions.load(Ordering::Relaxed);
        let hits = self.counters.cache_hits.load(Ordering::Relaxed);
        let misses = self.counters.cache_misses.load(Ordering::Relaxed);
        let inferences = self.counters.inference_count.load(Ordering::Relaxed);
        let total_ms = self.counters.inference_nanos.load(Ordering::Relaxed) as f64 / 1_000_000.0;

        let hit_rate = if total == 0 {
            0.0
        } else {
            round2(hits as f64 / total as f64 * 100.0)
        };
        let avg_ms = if misses == 0 {
            0.0
        } else {
            total_ms / misses as f64
        };
        let per_inference_ms = if inferences == 0 {
            0.0
        } else {
            total_ms / inferences as f64
        };

        ServiceStatistics {
            total_predictions: total,
            cache_enabled: self.cache_enabled,
            cache_capacity: self.cache.capacity(),
            cache_hits: hits,
            cache_misses: misses,
            inference_count: inferences,
            cache_hit_rate_percent: hit_rate,
            avg_inference_time_ms: avg_ms,
            avg_time_per_inference_ms: per_inference_ms,
            total_inference_time_ms: total_ms,
            warmup_completed: self.counters.warmup_completed.load(Ordering::Relaxed),
        }
    }

    pub fn cache_info(&self) -> CacheInfo {
        CacheInfo {
            enabled: self.cache_enabled,
            size: self.cache.size(),
            capacity: self.cache.capacity(),
            ttl_secs: self.cache.ttl().map(|ttl| ttl.as_secs()),
        }
    }

    /// Drop all cached results. Counters are left as they are.
    pub fn clear_cache(&self) {
        let dropped = self.cache.size();
        self.cache.clear();
        info!(dropped, "Prediction cache cleared");
    }

    /// Drop expired cache entries now rather than on next access.
    pub fn purge_expired(&self) -> usize {
        self.cache.purge_expired()
    }

    /// Predictor metadata with the service's own readiness status.
    pub fn model_info(&self) -> ModelInfo {
        ModelInfo {
            status: self.status(),
            ..self.predictor.model_info()
        }
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePredictor;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn options(capacity: usize, enabled: bool, warmup: bool) -> ModelServiceOptions {
        ModelServiceOptions {
            cache: CacheConfig {
                enabled,
                capacity,
                ttl_secs: None,
            },
            warmup,
            input_shape: [1, 8, 8, 3],
        }
    }

    fn loaded_service(predictor: FakePredictor, options: ModelServiceOptions) -> ModelService {
        let mut service = ModelService::new(Box::new(predictor), options);
        service.load_model().unwrap();
        service
    }

    fn tensor(value: f32) -> Tensor {
        Tensor::filled([1, 8, 8, 3], value).unwrap()
    }

    #[test]
    fn predict_before_load_is_not_ready() {
        let service = ModelService::new(Box::new(FakePredictor::new()), options(4, true, false));
        assert_eq!(service.status(), ModelStatus::NotLoaded);
        assert!(!service.is_ready());

        let err = service.predict(&tensor(0.1), None).unwrap_err();
        assert!(matches!(err, ServiceError::NotReady(ModelStatus::NotLoaded)));
        assert_eq!(service.statistics().total_predictions, 0);
    }

    #[test]
    fn repeated_tensor_hits_cache() {
        let predictor = FakePredictor::new();
        let calls = predictor.call_counter();
        let service = loaded_service(predictor, options(16, true, false));

        let input = tensor(0.3);
        let first = service.predict(&input, None).unwrap();
        assert!(!first.from_cache);
        for _ in 0..4 {
            let again = service.predict(&input, None).unwrap();
            assert!(again.from_cache);
            assert_eq!(again.result, first.result);
        }

        let stats = service.statistics();
        assert_eq!(stats.total_predictions, 5);
        assert_eq!(stats.cache_hits, 4);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hit_rate_percent, 80.0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_tensors_miss() {
        let service = loaded_service(FakePredictor::new(), options(16, true, false));
        service.predict(&tensor(0.1), None).unwrap();
        service.predict(&tensor(0.2), None).unwrap();

        let stats = service.statistics();
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(service.cache_info().size, 2);
    }

    #[test]
    fn per_call_override_bypasses_cache() {
        let predictor = FakePredictor::new();
        let calls = predictor.call_counter();
        let service = loaded_service(predictor, options(16, true, false));

        let input = tensor(0.4);
        for _ in 0..3 {
            let outcome = service.predict(&input, Some(false)).unwrap();
            assert!(!outcome.from_cache);
        }

        let stats = service.statistics();
        assert_eq!(stats.total_predictions, 3);
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats.cache_misses, 0);
        assert_eq!(stats.inference_count, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(service.cache_info().size, 0);
    }

    #[test]
    fn disabled_cache_is_the_default_when_configured() {
        let service = loaded_service(FakePredictor::new(), options(16, false, false));
        let input = tensor(0.4);
        service.predict(&input, None).unwrap();
        assert!(!service.predict(&input, None).unwrap().from_cache);

        // The override can still opt in.
        service.predict(&input, Some(true)).unwrap();
        assert!(service.predict(&input, Some(true)).unwrap().from_cache);
    }

    #[test]
    fn average_time_is_per_cache_miss() {
        let mut predictor = FakePredictor::new();
        predictor.delay = Some(Duration::from_millis(2));
        let service = loaded_service(predictor, options(16, true, false));

        service.predict(&tensor(0.1), None).unwrap();
        service.predict(&tensor(0.1), None).unwrap();
        service.predict(&tensor(0.2), Some(false)).unwrap();

        let stats = service.statistics();
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.inference_count, 2);
        assert!(stats.total_inference_time_ms > 0.0);
        assert_eq!(stats.avg_inference_time_ms, stats.total_inference_time_ms);
        assert_eq!(
            stats.avg_time_per_inference_ms,
            stats.total_inference_time_ms / 2.0
        );
    }

    #[test]
    fn disabled_cache_reports_zero_average() {
        let mut predictor = FakePredictor::new();
        predictor.delay = Some(Duration::from_millis(1));
        let service = loaded_service(predictor, options(16, false, false));
        for _ in 0..3 {
            service.predict(&tensor(0.5), None).unwrap();
        }

        let stats = service.statistics();
        assert_eq!(stats.cache_misses, 0);
        assert_eq!(stats.inference_count, 3);
        assert!(stats.total_inference_time_ms > 0.0);
        assert_eq!(stats.avg_inference_time_ms, 0.0);
        assert!(stats.avg_time_per_inference_ms > 0.0);
    }

    #[test]
    fn predictor_losing_model_reports_not_loaded() {
        let predictor = FakePredictor::new();
        let unloaded = predictor.unloaded.clone();
        let mut service = loaded_service(predictor, options(4, true, false));
        assert_eq!(service.status(), ModelStatus::Ready);

        unloaded.store(true, Ordering::SeqCst);
        assert!(!service.is_ready());
        assert_eq!(service.status(), ModelStatus::NotLoaded);
        assert_eq!(service.model_info().status, ModelStatus::NotLoaded);

        let err = service.predict(&tensor(0.1), None).unwrap_err();
        assert!(matches!(err, ServiceError::NotReady(ModelStatus::NotLoaded)));
        assert!(err.to_string().contains("not_loaded"), "got {err}");

        // A second load brings the predictor back.
        service.load_model().unwrap();
        assert!(service.is_ready());
        assert_eq!(service.status(), ModelStatus::Ready);
    }

    #[test]
    fn load_failure_moves_to_error() {
        let mut predictor = FakePredictor::new();
        predictor.fail_load = true;
        let mut service = ModelService::new(Box::new(predictor), options(4, true, true));

        let err = service.load_model().unwrap_err();
        assert!(matches!(err, ServiceError::Load(PredictorError::ModelLoad(_))));
        assert_eq!(service.status(), ModelStatus::Error);
        assert!(service.load_error().is_some());
        assert!(matches!(
            service.predict(&tensor(0.1), None),
            Err(ServiceError::NotReady(ModelStatus::Error))
        ));
    }

    #[test]
    fn warmup_runs_once_and_is_not_counted() {
        let predictor = FakePredictor::new();
        let calls = predictor.call_counter();
        let mut service = ModelService::new(Box::new(predictor), options(4, true, true));
        service.load_model().unwrap();
        service.load_model().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = service.statistics();
        assert!(stats.warmup_completed);
        assert_eq!(stats.total_predictions, 0);
        assert_eq!(stats.inference_count, 0);
    }

    #[test]
    fn warmup_failure_keeps_model_ready() {
        let mut predictor = FakePredictor::new();
        predictor.fail_on_fill = Some(WARMUP_FILL);
        let service = loaded_service(predictor, options(4, true, true));

        assert!(service.is_ready());
        assert!(!service.statistics().warmup_completed);
        assert!(service.predict(&tensor(0.1), None).is_ok());
    }

    #[test]
    fn inference_error_propagates_and_is_not_cached() {
        let predictor = FakePredictor::new();
        let fail = predictor.fail_predict.clone();
        let service = loaded_service(predictor, options(4, true, false));

        fail.store(true, Ordering::SeqCst);
        let err = service.predict(&tensor(0.2), None).unwrap_err();
        assert!(matches!(err, ServiceError::Inference(PredictorError::Prediction(_))));
        assert_eq!(service.cache_info().size, 0);

        fail.store(false, Ordering::SeqCst);
        assert!(!service.predict(&tensor(0.2), None).unwrap().from_cache);
    }

    #[test]
    fn clear_cache_keeps_counters() {
        let service = loaded_service(FakePredictor::new(), options(4, true, false));
        let input = tensor(0.6);
        service.predict(&input, None).unwrap();
        service.predict(&input, None).unwrap();

        service.clear_cache();
        assert_eq!(service.cache_info().size, 0);
        assert_eq!(service.statistics().cache_hits, 1);
        assert!(!service.predict(&input, None).unwrap().from_cache);
    }

    #[test]
    fn zero_capacity_cache_always_misses() {
        let service = loaded_service(FakePredictor::new(), options(0, true, false));
        let input = tensor(0.7);
        service.predict(&input, None).unwrap();
        service.predict(&input, None).unwrap();

        let stats = service.statistics();
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.cache_hits, 0);
    }

    #[test]
    fn statistics_start_at_zero() {
        let service = loaded_service(FakePredictor::new(), options(4, true, false));
        let stats = service.statistics();
        assert_eq!(stats.total_predictions, 0);
        assert_eq!(stats.cache_hit_rate_percent, 0.0);
        assert_eq!(stats.avg_inference_time_ms, 0.0);
        assert_eq!(stats.cache_capacity, 4);
        assert!(stats.cache_enabled);
    }

    #[test]
    fn hit_rate_rounds_to_two_decimals() {
        let service = loaded_service(FakePredictor::new(), options(4, true, false));
        let input = tensor(0.8);
        for _ in 0..3 {
            service.predict(&input, None).unwrap();
        }
        assert_eq!(service.statistics().cache_hit_rate_percent, 66.67);
    }

    #[test]
    fn model_info_reports_service_status() {
        let service = ModelService::new(Box::new(FakePredictor::new()), options(4, true, false));
        let info = service.model_info();
        assert_eq!(info.status, ModelStatus::NotLoaded);
        assert_eq!(info.class_count, 3);

        let loaded = loaded_service(FakePredictor::new(), options(4, true, false));
        assert_eq!(loaded.model_info().status, ModelStatus::Ready);
    }

    #[test]
    fn cache_info_reports_ttl() {
        let mut opts = options(4, true, false);
        opts.cache.ttl_secs = Some(60);
        let service = loaded_service(FakePredictor::new(), opts);
        assert_eq!(
            service.cache_info(),
            CacheInfo {
                enabled: true,
                size: 0,
                capacity: 4,
                ttl_secs: Some(60),
            }
        );
    }

    #[test]
    fn expired_entries_are_misses() {
        let mut opts = options(4, true, false);
        opts.cache.ttl_secs = Some(0);
        let service = loaded_service(FakePredictor::new(), opts);
        let input = tensor(0.9);
        service.predict(&input, None).unwrap();
        assert!(!service.predict(&input, None).unwrap().from_cache);
        assert_eq!(service.statistics().cache_misses, 2);
    }

    #[test]
    fn statistics_serialize_to_json() {
        let service = loaded_service(FakePredictor::new(), options(4, true, false));
        let json = serde_json::to_value(service.statistics()).unwrap();
        assert_eq!(json["total_predictions"], 0);
        assert_eq!(json["cache_enabled"], true);
    }

    #[test]
    fn concurrent_predictions_keep_counters_consistent() {
        let mut predictor = FakePredictor::new();
        predictor.delay = Some(Duration::from_millis(2));
        let calls: Arc<AtomicUsize> = predictor.call_counter();
        let service = loaded_service(predictor, options(8, true, false));
        let inputs: Vec<Tensor> = (0..4).map(|i| tensor(i as f32 / 10.0)).collect();

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for input in &inputs {
                        let outcome = service.predict(input, None).unwrap();
                        assert_eq!(outcome.result.len(), 3);
                    }
                });
            }
        });

        let stats = service.statistics();
        assert_eq!(stats.total_predictions, 32);
        assert_eq!(stats.cache_hits + stats.cache_misses, 32);
        assert!(stats.cache_misses >= 4);
        assert_eq!(calls.load(Ordering::SeqCst) as u64, stats.cache_misses);
        assert!(service.cache_info().size <= 8);
    }
}
