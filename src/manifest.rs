//! Model configuration manifest handling
//!
//! Locates the model root inside a downloaded tree, repairs manifests that
//! lack the model-family discriminator, and exposes a typed view of the
//! fields the loader needs.

use crate::error::{EngineError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Manifest file name inside the model root
pub const MANIFEST_FILE: &str = "config.json";

/// Manifest key identifying which model family to construct
pub const MODEL_FAMILY_KEY: &str = "model_type";

/// Find the model root inside a cached tree.
///
/// The exported tree may nest the actual model under an unknown
/// subdirectory. The directory containing the shallowest manifest wins;
/// ties at equal depth are broken by lexicographic order of the relative
/// path. When no manifest exists anywhere, the cache root itself is
/// returned as a best-effort fallback.
pub fn locate_model_root(base: &Path) -> PathBuf {
    let mut manifests = Vec::new();
    collect_manifests(base, base, &mut manifests);
    manifests.sort_by(|a, b| {
        a.components()
            .count()
            .cmp(&b.components().count())
            .then_with(|| a.cmp(b))
    });

    match manifests.first() {
        Some(relative) => {
            let root = match relative.parent() {
                Some(parent) => base.join(parent),
                None => base.to_path_buf(),
            };
            debug!("Model root located at {:?}", root);
            root
        }
        None => {
            debug!("No manifest under {:?}, falling back to cache root", base);
            base.to_path_buf()
        }
    }
}

fn collect_manifests(base: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_manifests(base, &path, out);
        } else if path.file_name().map_or(false, |n| n == MANIFEST_FILE) {
            if let Ok(relative) = path.strip_prefix(base) {
                out.push(relative.to_path_buf());
            }
        }
    }
}

/// Ensure the manifest declares a model family.
///
/// Injects `default_family` under [`MODEL_FAMILY_KEY`] and persists the
/// manifest iff the key is absent. Re-applying on a patched manifest leaves
/// the file untouched. Returns whether the manifest was modified. A missing
/// manifest is a no-op; model construction reports it later with a proper
/// load error.
pub fn patch_model_family(model_root: &Path, default_family: &str) -> Result<bool> {
    let manifest_path = model_root.join(MANIFEST_FILE);
    if !manifest_path.exists() {
        debug!("No manifest at {:?}, nothing to patch", manifest_path);
        return Ok(false);
    }

    let content = std::fs::read_to_string(&manifest_path)?;
    let mut document: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(&content)
            .map_err(|e| EngineError::load(format!("Malformed manifest {:?}: {}", manifest_path, e)))?;

    if document.contains_key(MODEL_FAMILY_KEY) {
        return Ok(false);
    }

    info!(
        "Manifest {:?} lacks {}, injecting {:?}",
        manifest_path, MODEL_FAMILY_KEY, default_family
    );
    document.insert(
        MODEL_FAMILY_KEY.to_string(),
        serde_json::Value::String(default_family.to_string()),
    );
    std::fs::write(&manifest_path, serde_json::to_string(&document)?)?;
    Ok(true)
}

/// Typed view of the manifest fields the loader cares about
#[derive(Debug, Clone, Deserialize)]
pub struct ModelManifest {
    /// Model-family discriminator
    pub model_type: Option<String>,
    /// Class index (as a decimal string) to label name
    #[serde(default)]
    pub id2label: HashMap<String, String>,
    /// Origin model identifier recorded by the training pipeline
    #[serde(rename = "_name_or_path")]
    pub name_or_path: Option<String>,
    /// Label count, used when `id2label` is absent
    pub num_labels: Option<usize>,
    /// Input image side length
    pub image_size: Option<usize>,
    /// Patch side length
    pub patch_size: Option<usize>,
}

impl ModelManifest {
    /// Load and parse the manifest from a model root
    pub fn load(model_root: &Path) -> Result<Self> {
        let manifest_path = model_root.join(MANIFEST_FILE);
        let content = std::fs::read_to_string(&manifest_path).map_err(|e| {
            EngineError::load(format!("Failed to read manifest {:?}: {}", manifest_path, e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| EngineError::load(format!("Malformed manifest {:?}: {}", manifest_path, e)))
    }

    /// Label map keyed by class index
    pub fn label_map(&self) -> HashMap<usize, String> {
        self.id2label
            .iter()
            .filter_map(|(index, label)| {
                index.parse::<usize>().ok().map(|i| (i, label.clone()))
            })
            .collect()
    }

    /// Number of output classes
    pub fn num_classes(&self) -> Result<usize> {
        if !self.id2label.is_empty() {
            return Ok(self.id2label.len());
        }
        self.num_labels.ok_or_else(|| {
            EngineError::load("Manifest declares neither id2label nor num_labels")
        })
    }
}
