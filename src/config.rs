//! Service configuration.
//!
//! Defaults match a 224x224 ImageNet-normalized classifier. Every field can be
//! overridden from a JSON file or from environment variables; both sources are
//! checked by [`ServiceConfig::validate`] before use.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::pipeline::preprocess::Normalization;

/// Application-level constants
pub const APP_NAME: &str = "aiclassifier";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default upload ceiling (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> String {
    format!("{APP_NAME}=info")
}

// ═══════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {var}: {value:?}")]
    InvalidEnv { var: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ═══════════════════════════════════════════════════════════
// Sub-configs
// ═══════════════════════════════════════════════════════════

/// Width x height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// NHWC input shape with a leading batch dimension of 1.
    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.height as usize, self.width as usize, 3]
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::new(224, 224)
    }
}

/// Geometry bounds enforced by the dimension stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// Largest allowed `max(w/h, h/w)`. 10.0 means 10:1.
    pub max_aspect_ratio: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_width: 32,
            min_height: 32,
            max_width: 4096,
            max_height: 4096,
            max_aspect_ratio: 10.0,
        }
    }
}

/// Prediction cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Maximum number of cached results. 0 is legal (always miss).
    pub capacity: usize,
    /// Per-entry time to live. `None` keeps entries until evicted.
    pub ttl_secs: Option<u64>,
}

impl CacheConfig {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 128,
            ttl_secs: None,
        }
    }
}

// ═══════════════════════════════════════════════════════════
// ServiceConfig
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
    pub target_size: ImageSize,
    pub normalization: Normalization,
    pub max_upload_bytes: usize,
    pub validation: ValidationConfig,
    pub cache: CacheConfig,
    /// Run one synthetic inference right after the model loads.
    pub warmup: bool,
    pub log_filter: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/artifacts/model.onnx"),
            labels_path: PathBuf::from("models/artifacts/labels.txt"),
            target_size: ImageSize::default(),
            normalization: Normalization::default(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            validation: ValidationConfig::default(),
            cache: CacheConfig::default(),
            warmup: true,
            log_filter: default_log_filter(),
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    ///
    /// Recognized: `MODEL_PATH`, `LABELS_PATH`, `MAX_CONTENT_LENGTH`,
    /// `CACHE_ENABLED`, `CACHE_MAX_SIZE`, `CACHE_TTL_SECONDS`,
    /// `WARMUP_ENABLED`, `LOG_LEVEL`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("MODEL_PATH") {
            config.model_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("LABELS_PATH") {
            config.labels_path = PathBuf::from(path);
        }
        if let Some(raw) = lookup("MAX_CONTENT_LENGTH") {
            config.max_upload_bytes = parse_env("MAX_CONTENT_LENGTH", &raw)?;
        }
        if let Some(raw) = lookup("CACHE_ENABLED") {
            config.cache.enabled = parse_bool("CACHE_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("CACHE_MAX_SIZE") {
            config.cache.capacity = parse_env("CACHE_MAX_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("CACHE_TTL_SECONDS") {
            config.cache.ttl_secs = Some(parse_env("CACHE_TTL_SECONDS", &raw)?);
        }
        if let Some(raw) = lookup("WARMUP_ENABLED") {
            config.warmup = parse_bool("WARMUP_ENABLED", &raw)?;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_filter = format!("{APP_NAME}={}", level.trim().to_lowercase());
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject bounds that would make every upload fail or the tensor empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let v = &self.validation;
        if v.min_width > v.max_width || v.min_height > v.max_height {
            return Err(ConfigError::Invalid(format!(
                "minimum size {}x{} exceeds maximum {}x{}",
                v.min_width, v.min_height, v.max_width, v.max_height
            )));
        }
        if v.max_aspect_ratio.is_nan() || v.max_aspect_ratio < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "max_aspect_ratio must be >= 1.0, got {}",
                v.max_aspect_ratio
            )));
        }
        if self.target_size.width == 0 || self.target_size.height == 0 {
            return Err(ConfigError::Invalid("target_size must be non-zero".into()));
        }
        if self.max_upload_bytes == 0 {
            return Err(ConfigError::Invalid("max_upload_bytes must be non-zero".into()));
        }
        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&self.log_filter) {
            return Err(ConfigError::Invalid(format!(
                "log_filter {:?} does not parse: {e}",
                self.log_filter
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, raw: &str) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: raw.to_string(),
    })
}

fn parse_bool(var: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: raw.to_string(),
        }),
    }
}
