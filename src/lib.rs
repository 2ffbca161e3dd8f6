//! # mealscan-infer
//!
//! Food image classification inference core. Lazily fetches a trained
//! classifier and its preprocessor from a remote blob store, caches them on
//! local disk idempotently, repairs incomplete model configurations, and
//! serves ranked label predictions from raw image bytes.
//!
//! ## Features
//!
//! - Idempotent artifact caching with sentinel-based repair of partial
//!   downloads
//! - Single-flight lazy bundle construction under concurrent requests
//! - Ordered preprocessor fallback chain (model root, configured override,
//!   origin model)
//! - Automatic accelerator selection with CPU fallback
//! - Deterministic top-K ranking over the class distribution
//!
//! ## Usage
//!
//! ```no_run
//! use mealscan_infer::{Config, InferenceEngine};
//!
//! # async fn run() -> mealscan_infer::Result<()> {
//! let config = Config::from_env()?;
//! let engine = InferenceEngine::new(config)?;
//! let response = engine.predict(&std::fs::read("meal.jpg")?).await?;
//! println!("{}", response.top1[0].label);
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod cache;
pub mod config;
pub mod device;
pub mod error;
pub mod inference;
pub mod manifest;
pub mod model;
pub mod processor;
pub mod store;
pub mod test_utils;
pub mod utils;

pub use config::Config;
pub use error::{EngineError, Result};
pub use inference::{InferenceEngine, Prediction, PredictionResponse};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
