//! Configuration management for the inference core
//!
//! This module handles all configuration settings: the remote artifact
//! location, the local cache, device preference and logging.

use crate::error::{EngineError, Result};
use crate::store::GCS_SCHEME;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure for the inference core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Artifact store and cache configuration
    pub artifact: ArtifactConfig,
    /// Model configuration
    pub model: ModelConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Artifact store and cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Remote URI of the trained model tree (`gs://bucket/path`), required
    pub location: String,
    /// Local directory where the artifact tree is materialized
    pub cache_dir: PathBuf,
    /// Optional alternate preprocessor source (local path or hub model id)
    pub processor_override: Option<String>,
    /// Model-family discriminator injected into the manifest when missing
    pub default_model_family: String,
    /// Optional bearer token for the artifact store
    pub auth_token: Option<String>,
}

/// Model configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Device preference: auto, cpu, cuda
    pub device: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            artifact: ArtifactConfig::default(),
            model: ModelConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            location: String::new(),
            cache_dir: PathBuf::from("/tmp/mealscan-model"),
            processor_override: None,
            default_model_family: "vit".to_string(),
            auth_token: None,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            device: "auto".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(location) = std::env::var("MEALSCAN_ARTIFACT_LOCATION") {
            config.artifact.location = location;
        }
        if let Ok(cache_dir) = std::env::var("MEALSCAN_CACHE_DIR") {
            config.artifact.cache_dir = PathBuf::from(cache_dir);
        }
        if let Ok(processor) = std::env::var("MEALSCAN_PROCESSOR_OVERRIDE") {
            if !processor.is_empty() {
                config.artifact.processor_override = Some(processor);
            }
        }
        if let Ok(family) = std::env::var("MEALSCAN_DEFAULT_MODEL_FAMILY") {
            config.artifact.default_model_family = family;
        }
        if let Ok(token) = std::env::var("MEALSCAN_ARTIFACT_TOKEN") {
            if !token.is_empty() {
                config.artifact.auth_token = Some(token);
            }
        }
        if let Ok(device) = std::env::var("MEALSCAN_DEVICE") {
            config.model.device = device;
        }
        if let Ok(level) = std::env::var("MEALSCAN_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("MEALSCAN_LOG_FORMAT") {
            config.logging.format = format;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| EngineError::config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.artifact.location.is_empty() {
            return Err(EngineError::config(
                "Artifact location must be set (MEALSCAN_ARTIFACT_LOCATION)",
            ));
        }
        if !self.artifact.location.starts_with(GCS_SCHEME) {
            return Err(EngineError::config(format!(
                "Artifact location must start with {}",
                GCS_SCHEME
            )));
        }
        if self.artifact.default_model_family.is_empty() {
            return Err(EngineError::config("Default model family cannot be empty"));
        }

        if !["auto", "cpu", "cuda"].contains(&self.model.device.as_str()) {
            return Err(EngineError::config(
                "Device must be one of: auto, cpu, cuda",
            ));
        }

        if !["trace", "debug", "info", "warn", "error"].contains(&self.logging.level.as_str()) {
            return Err(EngineError::config(
                "Log level must be one of: trace, debug, info, warn, error",
            ));
        }
        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err(EngineError::config("Log format must be one of: json, pretty"));
        }

        Ok(())
    }
}
