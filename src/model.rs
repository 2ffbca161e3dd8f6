//! Classifier model construction
//!
//! Dispatches on the manifest's model-family discriminator and builds the
//! matching candle architecture from the safetensors weights in the model
//! root.

use crate::error::{EngineError, Result};
use crate::manifest::ModelManifest;
use candle_core::{DType, Device, Module, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::vit;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// A loaded image-classification model
pub struct ImageClassifier {
    inner: vit::Model,
    num_classes: usize,
}

impl ImageClassifier {
    /// Construct the classifier declared by the manifest, with weights from
    /// `model_root`, on `device`
    pub fn load(model_root: &Path, manifest: &ModelManifest, device: &Device) -> Result<Self> {
        let family = manifest
            .model_type
            .as_deref()
            .ok_or_else(|| EngineError::load("Manifest does not declare a model family"))?;

        match family {
            "vit" => Self::load_vit(model_root, manifest, device),
            other => Err(EngineError::load(format!(
                "Unsupported model family: {}",
                other
            ))),
        }
    }

    fn load_vit(model_root: &Path, manifest: &ModelManifest, device: &Device) -> Result<Self> {
        let num_classes = manifest.num_classes()?;
        let weights = find_weights(model_root)?;
        debug!("Loading ViT weights from {:?}", weights);

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&weights, DType::F32, device)
                .map_err(|e| EngineError::load(format!("Failed to map weights: {}", e)))?
        };

        // Fine-tuned exports keep the backbone preset and vary only the
        // geometry and the classifier head.
        let config = vit::Config {
            image_size: manifest.image_size.unwrap_or(224),
            patch_size: manifest.patch_size.unwrap_or(16),
            ..vit::Config::vit_base_patch16_224()
        };

        let inner = vit::Model::new(&config, num_classes, vb)
            .map_err(|e| EngineError::load(format!("Failed to build ViT model: {}", e)))?;

        info!(
            "Loaded ViT classifier with {} classes ({}x{} input)",
            num_classes, config.image_size, config.image_size
        );
        Ok(Self { inner, num_classes })
    }

    /// Run the forward pass on a `(batch, 3, H, W)` input, returning
    /// per-class logits
    pub fn forward(&self, pixel_values: &Tensor) -> Result<Tensor> {
        Ok(self.inner.forward(pixel_values)?)
    }

    /// Number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

/// Locate safetensors weight files inside the model root. The canonical
/// `model.safetensors` wins; otherwise every `*.safetensors` shard is
/// mapped, in name order.
fn find_weights(model_root: &Path) -> Result<Vec<PathBuf>> {
    let canonical = model_root.join("model.safetensors");
    if canonical.exists() {
        return Ok(vec![canonical]);
    }

    let mut shards = Vec::new();
    for entry in std::fs::read_dir(model_root)
        .map_err(|e| EngineError::load(format!("Failed to read {:?}: {}", model_root, e)))?
        .flatten()
    {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "safetensors") {
            shards.push(path);
        }
    }
    shards.sort();

    if shards.is_empty() {
        return Err(EngineError::load(format!(
            "No safetensors weights found in {:?}",
            model_root
        )));
    }
    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manifest(json: &str) -> ModelManifest {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_load_requires_family() {
        let dir = TempDir::new().unwrap();
        let m = manifest(r#"{"id2label": {"0": "ramen"}}"#);
        let err = ImageClassifier::load(dir.path(), &m, &Device::Cpu).unwrap_err();
        assert!(matches!(err, EngineError::Load { .. }));
    }

    #[test]
    fn test_load_rejects_unknown_family() {
        let dir = TempDir::new().unwrap();
        let m = manifest(r#"{"model_type": "resnet", "id2label": {"0": "ramen"}}"#);
        let err = ImageClassifier::load(dir.path(), &m, &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("Unsupported model family"));
    }

    #[test]
    fn test_load_requires_weights() {
        let dir = TempDir::new().unwrap();
        let m = manifest(r#"{"model_type": "vit", "id2label": {"0": "ramen"}}"#);
        let err = ImageClassifier::load(dir.path(), &m, &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("No safetensors weights"));
    }

    #[test]
    fn test_find_weights_prefers_canonical_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("model-00001.safetensors"), b"x").unwrap();
        std::fs::write(dir.path().join("model.safetensors"), b"x").unwrap();

        let weights = find_weights(dir.path()).unwrap();
        assert_eq!(weights, vec![dir.path().join("model.safetensors")]);
    }

    #[test]
    fn test_find_weights_collects_shards_in_order() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("model-00002.safetensors"), b"x").unwrap();
        std::fs::write(dir.path().join("model-00001.safetensors"), b"x").unwrap();

        let weights = find_weights(dir.path()).unwrap();
        assert_eq!(
            weights,
            vec![
                dir.path().join("model-00001.safetensors"),
                dir.path().join("model-00002.safetensors"),
            ]
        );
    }
}
