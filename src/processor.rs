//! Image preprocessor
//!
//! Parses the preprocessor configuration shipped next to the model weights
//! and turns a decoded image into the model-ready input tensor (resize,
//! rescale, per-channel normalize, NCHW layout).

use crate::error::{EngineError, Result};
use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::RgbImage;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Preprocessor config file name
pub const PROCESSOR_FILE: &str = "preprocessor_config.json";

/// Hub endpoint used when a preprocessor candidate is a model identifier
const HUB_URL: &str = "https://huggingface.co";

fn default_true() -> bool {
    true
}

fn default_rescale_factor() -> f64 {
    1.0 / 255.0
}

fn default_channel_stats() -> Vec<f64> {
    vec![0.5, 0.5, 0.5]
}

fn default_size() -> ProcessorSize {
    ProcessorSize::Square(224)
}

/// Target geometry; exporters write either `{height, width}` or a bare
/// side length.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProcessorSize {
    Edges { height: usize, width: usize },
    Square(usize),
}

impl ProcessorSize {
    fn dims(&self) -> (usize, usize) {
        match self {
            ProcessorSize::Edges { height, width } => (*height, *width),
            ProcessorSize::Square(side) => (*side, *side),
        }
    }
}

/// Parsed preprocessor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_true")]
    pub do_resize: bool,
    #[serde(default = "default_size")]
    pub size: ProcessorSize,
    #[serde(default = "default_true")]
    pub do_rescale: bool,
    #[serde(default = "default_rescale_factor")]
    pub rescale_factor: f64,
    #[serde(default = "default_true")]
    pub do_normalize: bool,
    #[serde(default = "default_channel_stats")]
    pub image_mean: Vec<f64>,
    #[serde(default = "default_channel_stats")]
    pub image_std: Vec<f64>,
}

/// Transforms decoded images into model input tensors
#[derive(Debug, Clone)]
pub struct ImageProcessor {
    config: ProcessorConfig,
}

impl ImageProcessor {
    fn from_config(config: ProcessorConfig) -> Result<Self> {
        if config.image_mean.len() != 3 || config.image_std.len() != 3 {
            return Err(EngineError::load(
                "Preprocessor normalization stats must have 3 channels",
            ));
        }
        Ok(Self { config })
    }

    /// Build a processor from a local directory holding
    /// `preprocessor_config.json`
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let path = dir.join(PROCESSOR_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            EngineError::load(format!("Failed to read preprocessor config {:?}: {}", path, e))
        })?;
        let config: ProcessorConfig = serde_json::from_str(&content).map_err(|e| {
            EngineError::load(format!("Malformed preprocessor config {:?}: {}", path, e))
        })?;
        Self::from_config(config)
    }

    /// Build a processor from the configuration published under a hub model
    /// identifier
    pub async fn from_hub(model_id: &str) -> Result<Self> {
        let url = format!("{}/{}/resolve/main/{}", HUB_URL, model_id, PROCESSOR_FILE);
        debug!("Fetching preprocessor config from {}", url);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| EngineError::load(format!("Failed to create hub client: {}", e)))?;

        let config: ProcessorConfig = client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::load(format!("Failed to fetch {}: {}", url, e)))?
            .error_for_status()
            .map_err(|e| EngineError::load(format!("Fetching {} failed: {}", url, e)))?
            .json()
            .await
            .map_err(|e| EngineError::load(format!("Malformed preprocessor config at {}: {}", url, e)))?;

        Self::from_config(config)
    }

    /// Target (height, width) of the produced tensor
    pub fn target_dims(&self) -> (usize, usize) {
        self.config.size.dims()
    }

    /// Apply the preprocessing transform, producing a `(1, 3, H, W)` f32
    /// tensor on `device`
    pub fn preprocess(&self, image: &RgbImage, device: &Device) -> Result<Tensor> {
        let (height, width) = self.config.size.dims();

        let resized;
        let pixels = if self.config.do_resize
            && (image.height() as usize != height || image.width() as usize != width)
        {
            resized = image::imageops::resize(
                image,
                width as u32,
                height as u32,
                FilterType::Triangle,
            );
            &resized
        } else {
            image
        };

        let data = pixels.as_raw().clone();
        let mut tensor = Tensor::from_vec(data, (height, width, 3), &Device::Cpu)?
            .to_dtype(DType::F32)?
            .permute((2, 0, 1))?;

        if self.config.do_rescale {
            tensor = tensor.affine(self.config.rescale_factor, 0.0)?;
        }

        if self.config.do_normalize {
            let mean: Vec<f32> = self.config.image_mean.iter().map(|v| *v as f32).collect();
            let std: Vec<f32> = self.config.image_std.iter().map(|v| *v as f32).collect();
            let mean = Tensor::from_vec(mean, (3, 1, 1), &Device::Cpu)?;
            let std = Tensor::from_vec(std, (3, 1, 1), &Device::Cpu)?;
            tensor = tensor.broadcast_sub(&mean)?.broadcast_div(&std)?;
        }

        Ok(tensor.unsqueeze(0)?.to_device(device)?)
    }
}
