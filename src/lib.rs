pub mod config;
pub mod tensor;
pub mod pipeline; // Upload validation + tensor preprocessing
pub mod inference; // Predictor boundary, prediction cache, model service
pub mod classifier; // Entry point for the transport layer

#[cfg(test)]
pub(crate) mod testing;

pub use classifier::{validate_and_preprocess, Classification, Classifier, ClassifyError};
pub use config::ServiceConfig;
pub use inference::{ModelService, Predictor, RankedResult};
pub use tensor::{ContentHash, Tensor};

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber using `config.log_filter`.
///
/// `RUST_LOG` wins over the configured filter when it parses. A second call
/// is a no-op so embedding applications and tests can call this freely.
pub fn init_tracing(config: &ServiceConfig) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let installed = tracing_subscriber::fmt()
        .with_env_filter(env_filter(rust_log.as_deref(), &config.log_filter))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);
    }
}

fn env_filter(rust_log: Option<&str>, configured: &str) -> EnvFilter {
    rust_log
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(configured))
}
