//! Prediction pipeline and engine facade
//!
//! The [`InferenceEngine`] is the crate's entry point: constructed once at
//! service start from a [`Config`] and shared by reference across
//! prediction requests. The first request triggers bundle construction;
//! everything after is a read-only forward pass.

use crate::bundle::{ArtifactBundle, BundleLoader};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::store::ArtifactStore;
use candle_core::D;
use image::RgbImage;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Number of ranked predictions returned, bounded by the class count
pub const TOP_K: usize = 5;

/// One ranked label prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub label: String,
    pub score: f32,
}

/// Ranked prediction response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// The single best prediction, as a one-element sequence
    pub top1: Vec<Prediction>,
    /// Up to [`TOP_K`] predictions, sorted by descending score
    pub topk: Vec<Prediction>,
}

/// Engine-wide request statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub avg_inference_time_ms: f64,
}

/// Main engine coordinating bundle loading and prediction
pub struct InferenceEngine {
    loader: BundleLoader,
    stats: RwLock<EngineStats>,
}

impl InferenceEngine {
    /// Create an engine backed by the configured remote artifact store
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            loader: BundleLoader::new(config)?,
            stats: RwLock::new(EngineStats::default()),
        })
    }

    /// Create an engine with an explicit store implementation
    pub fn with_store(config: Config, store: Arc<dyn ArtifactStore>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            loader: BundleLoader::with_store(config, store),
            stats: RwLock::new(EngineStats::default()),
        })
    }

    /// Eagerly construct the bundle instead of paying the cost on the first
    /// prediction
    pub async fn warm_up(&self) -> Result<()> {
        self.loader.get_or_init().await.map(|_| ())
    }

    /// Classify an image and return the ranked predictions
    pub async fn predict(&self, image_bytes: &[u8]) -> Result<PredictionResponse> {
        let start = Instant::now();
        self.stats.write().total_requests += 1;

        let result = self.predict_inner(image_bytes).await;

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(_) => {
                let mut stats = self.stats.write();
                stats.successful_requests += 1;
                let n = stats.successful_requests as f64;
                stats.avg_inference_time_ms += (elapsed_ms - stats.avg_inference_time_ms) / n;
            }
            Err(_) => {
                self.stats.write().failed_requests += 1;
            }
        }

        result
    }

    async fn predict_inner(&self, image_bytes: &[u8]) -> Result<PredictionResponse> {
        let bundle = self.loader.get_or_init().await?;
        let image = decode_image(image_bytes)?;

        let pixel_values = bundle
            .processor
            .preprocess(&image, &bundle.device)
            .map_err(|e| EngineError::inference(format!("Preprocessing failed: {}", e)))?;

        let predictions = run_forward(&bundle, &pixel_values)?;
        debug!(
            "Predicted {:?} ({:.3})",
            predictions.first().map(|p| p.label.as_str()),
            predictions.first().map(|p| p.score).unwrap_or(0.0)
        );

        Ok(PredictionResponse {
            top1: predictions.iter().take(1).cloned().collect(),
            topk: predictions,
        })
    }

    /// Snapshot of the engine statistics
    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }
}

/// Decode raw bytes into a 3-channel image. Paletted and alpha formats are
/// converted to RGB.
fn decode_image(image_bytes: &[u8]) -> Result<RgbImage> {
    let image = image::load_from_memory(image_bytes)
        .map_err(|e| EngineError::decode(format!("Input is not a decodable image: {}", e)))?;
    Ok(image.to_rgb8())
}

/// Run the forward pass and rank the class distribution
fn run_forward(bundle: &ArtifactBundle, pixel_values: &candle_core::Tensor) -> Result<Vec<Prediction>> {
    let logits = bundle
        .model
        .forward(pixel_values)
        .map_err(|e| EngineError::inference(format!("Forward pass failed: {}", e)))?;

    let probs = candle_nn::ops::softmax(&logits, D::Minus1)
        .and_then(|p| p.squeeze(0))
        .and_then(|p| p.to_vec1::<f32>())
        .map_err(|e| EngineError::inference(format!("Score normalization failed: {}", e)))?;

    let ranked = rank_top_k(&probs, TOP_K);
    if ranked.is_empty() {
        return Err(EngineError::inference("Model produced an empty class distribution"));
    }

    Ok(ranked
        .into_iter()
        .map(|(index, score)| Prediction {
            label: label_for(&bundle.id2label, index),
            score,
        })
        .collect())
}

/// Select the `min(k, len)` highest scores, sorted descending; equal scores
/// are ordered by ascending class index so the ranking is deterministic.
pub fn rank_top_k(scores: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = scores.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    indexed.truncate(k.min(scores.len()));
    indexed
}

fn label_for(id2label: &HashMap<usize, String>, index: usize) -> String {
    id2label
        .get(&index)
        .cloned()
        .unwrap_or_else(|| index.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::tiny_png;

    #[test]
    fn test_rank_top_k_reference_vector() {
        let scores = [0.05, 0.6, 0.1, 0.05, 0.05, 0.05, 0.02, 0.03, 0.03, 0.02];
        let ranked = rank_top_k(&scores, TOP_K);

        assert_eq!(ranked.len(), 5);
        assert_eq!(ranked[0], (1, 0.6));
        assert_eq!(ranked[1], (2, 0.1));
        // The 0.05 tie resolves by ascending class index.
        assert_eq!(ranked[2].0, 0);
        assert_eq!(ranked[3].0, 3);
        assert_eq!(ranked[4].0, 4);
        assert!(ranked.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn test_rank_top_k_short_vector() {
        let scores = [0.2, 0.5, 0.3];
        let ranked = rank_top_k(&scores, TOP_K);
        assert_eq!(ranked.len(), 3);
        assert_eq!(ranked[0], (1, 0.5));
        assert_eq!(ranked[2], (0, 0.2));
    }

    #[test]
    fn test_rank_top_k_empty() {
        assert!(rank_top_k(&[], TOP_K).is_empty());
    }

    #[test]
    fn test_label_fallback_is_stringified_index() {
        let mut id2label = HashMap::new();
        id2label.insert(0usize, "ramen".to_string());

        assert_eq!(label_for(&id2label, 0), "ramen");
        assert_eq!(label_for(&id2label, 7), "7");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode_image(b"definitely not an image").unwrap_err();
        assert!(matches!(err, EngineError::Decode { .. }));
    }

    #[test]
    fn test_decode_accepts_png() {
        let image = decode_image(&tiny_png()).unwrap();
        assert_eq!(image.width(), 4);
        assert_eq!(image.height(), 4);
    }

    #[test]
    fn test_response_serialization_shape() {
        let response = PredictionResponse {
            top1: vec![Prediction {
                label: "ramen".to_string(),
                score: 0.6,
            }],
            topk: vec![
                Prediction {
                    label: "ramen".to_string(),
                    score: 0.6,
                },
                Prediction {
                    label: "sushi".to_string(),
                    score: 0.4,
                },
            ],
        };

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["top1"][0]["label"], "ramen");
        assert_eq!(value["topk"].as_array().unwrap().len(), 2);
    }
}
