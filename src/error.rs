//! Error handling for the inference core
//!
//! This module provides a unified error type covering the whole failure
//! surface of the artifact cache and inference pipeline, so the API layer
//! can translate errors into responses without string matching.

use thiserror::Error;

/// Main error type for the inference core
#[derive(Error, Debug)]
pub enum EngineError {
    /// Bad or missing required setting; fatal until an operator fixes it
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The remote artifact location does not exist
    #[error("Artifact not found: {message}")]
    ArtifactNotFound { message: String },

    /// Transient I/O failure while fetching the artifact tree
    #[error("Download error: {message}")]
    Download { message: String },

    /// Model or preprocessor construction failure after fallback exhaustion
    #[error("Load error: {message}")]
    Load { message: String },

    /// Input bytes are not a decodable image; a request fault, not a system fault
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Unexpected runtime failure during the forward pass
    #[error("Inference error: {message}")]
    Inference { message: String },

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// ML framework errors
    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),

    /// Image decoding errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an artifact-not-found error
    pub fn artifact_not_found<S: Into<String>>(message: S) -> Self {
        Self::ArtifactNotFound {
            message: message.into(),
        }
    }

    /// Create a download error
    pub fn download<S: Into<String>>(message: S) -> Self {
        Self::Download {
            message: message.into(),
        }
    }

    /// Create a load error
    pub fn load<S: Into<String>>(message: S) -> Self {
        Self::Load {
            message: message.into(),
        }
    }

    /// Create a decode error
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an inference error
    pub fn inference<S: Into<String>>(message: S) -> Self {
        Self::Inference {
            message: message.into(),
        }
    }

    /// Stable machine-readable code for the API layer
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Config { .. } => "CONFIG_ERROR",
            EngineError::ArtifactNotFound { .. } => "ARTIFACT_NOT_FOUND",
            EngineError::Download { .. } => "DOWNLOAD_ERROR",
            EngineError::Load { .. } => "LOAD_ERROR",
            EngineError::Decode { .. } => "DECODE_ERROR",
            EngineError::Inference { .. } => "INFERENCE_ERROR",
            EngineError::Io(_) => "IO_ERROR",
            EngineError::Serde(_) => "SERIALIZATION_ERROR",
            EngineError::Candle(_) => "ML_ERROR",
            EngineError::Image(_) => "IMAGE_ERROR",
        }
    }
}
