//! Artifact bundle loading
//!
//! Composes the cache, locator, patcher, device selector and model loader
//! into the process-wide bundle that serves predictions. Construction is
//! lazy and single-flight: the first caller builds, concurrent callers
//! wait, later callers read.

use crate::cache::ArtifactCache;
use crate::config::Config;
use crate::device::select_device;
use crate::error::{EngineError, Result};
use crate::manifest::{locate_model_root, patch_model_family, ModelManifest};
use crate::model::ImageClassifier;
use crate::processor::ImageProcessor;
use crate::store::{ArtifactLocation, ArtifactStore, GcsArtifactStore};
use crate::utils::format_duration;
use candle_core::Device;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Everything needed to serve predictions, built once per process
pub struct ArtifactBundle {
    pub processor: ImageProcessor,
    pub model: ImageClassifier,
    pub device: Device,
    pub id2label: HashMap<usize, String>,
}

/// One candidate in the preprocessor fallback chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessorSource {
    /// A local directory holding a preprocessor config
    Dir(PathBuf),
    /// A hub model identifier to fetch the config from
    Hub(String),
}

impl ProcessorSource {
    /// Interpret a configured spec: an existing local path is a directory
    /// source, anything else is treated as a hub identifier
    fn from_spec(spec: &str) -> Self {
        let path = Path::new(spec);
        if path.exists() {
            ProcessorSource::Dir(path.to_path_buf())
        } else {
            ProcessorSource::Hub(spec.to_string())
        }
    }

    async fn resolve(&self) -> Result<ImageProcessor> {
        match self {
            ProcessorSource::Dir(dir) => ImageProcessor::from_dir(dir),
            ProcessorSource::Hub(model_id) => ImageProcessor::from_hub(model_id).await,
        }
    }
}

impl fmt::Display for ProcessorSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorSource::Dir(dir) => write!(f, "{:?}", dir),
            ProcessorSource::Hub(model_id) => write!(f, "hub:{}", model_id),
        }
    }
}

/// Build the ordered, deduplicated preprocessor candidate list: the model
/// root, then the configured override, then the origin model recorded in
/// the manifest.
pub fn processor_candidates(
    model_root: &Path,
    override_spec: Option<&str>,
    origin: Option<&str>,
) -> Vec<ProcessorSource> {
    let mut candidates = vec![ProcessorSource::Dir(model_root.to_path_buf())];

    for spec in [override_spec, origin].into_iter().flatten() {
        let candidate = ProcessorSource::from_spec(spec);
        if !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

/// Try candidates left to right; the first that constructs a preprocessor
/// wins and the rest are not attempted.
pub async fn resolve_processor(candidates: &[ProcessorSource]) -> Result<ImageProcessor> {
    for candidate in candidates {
        match candidate.resolve().await {
            Ok(processor) => {
                info!("Resolved preprocessor from {}", candidate);
                return Ok(processor);
            }
            Err(e) => {
                warn!("Preprocessor candidate {} failed: {}", candidate, e);
            }
        }
    }
    Err(EngineError::load(
        "No preprocessor candidate resolved; set MEALSCAN_PROCESSOR_OVERRIDE to a usable source",
    ))
}

/// Lazily constructs and hands out the process-wide [`ArtifactBundle`]
pub struct BundleLoader {
    config: Config,
    store: Arc<dyn ArtifactStore>,
    cache: ArtifactCache,
    bundle: OnceCell<Arc<ArtifactBundle>>,
}

impl BundleLoader {
    /// Create a loader backed by the GCS artifact store
    pub fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn ArtifactStore> =
            Arc::new(GcsArtifactStore::new(config.artifact.auth_token.clone())?);
        Ok(Self::with_store(config, store))
    }

    /// Create a loader with an explicit store implementation
    pub fn with_store(config: Config, store: Arc<dyn ArtifactStore>) -> Self {
        let cache = ArtifactCache::new(config.artifact.cache_dir.clone());
        Self {
            config,
            store,
            cache,
            bundle: OnceCell::new(),
        }
    }

    /// Return the bundle, constructing it on first use. Construction errors
    /// are not memoized: the cell stays empty and the next call retries the
    /// full sequence.
    pub async fn get_or_init(&self) -> Result<Arc<ArtifactBundle>> {
        self.bundle
            .get_or_try_init(|| self.build())
            .await
            .map(Arc::clone)
    }

    async fn build(&self) -> Result<Arc<ArtifactBundle>> {
        let start = Instant::now();
        info!("Constructing artifact bundle");

        let location = ArtifactLocation::parse(&self.config.artifact.location)?;
        let cache_root = self
            .cache
            .ensure_cached(self.store.as_ref(), &location)
            .await?;

        let model_root = locate_model_root(&cache_root);
        patch_model_family(&model_root, &self.config.artifact.default_model_family)?;
        let manifest = ModelManifest::load(&model_root)?;

        let device = select_device(&self.config.model.device)?;
        let model = ImageClassifier::load(&model_root, &manifest, &device)?;

        let candidates = processor_candidates(
            &model_root,
            self.config.artifact.processor_override.as_deref(),
            manifest.name_or_path.as_deref(),
        );
        let processor = resolve_processor(&candidates).await?;

        info!(
            "Artifact bundle ready in {}",
            format_duration(start.elapsed())
        );
        Ok(Arc::new(ArtifactBundle {
            processor,
            model,
            device,
            id2label: manifest.label_map(),
        }))
    }
}
