//! Local artifact cache
//!
//! Owns the on-disk cache directory for the downloaded model tree. A
//! sentinel file at the cache root certifies that the tree was fully
//! materialized; any tree found without it is treated as a leftover from an
//! interrupted download and purged before use.

use crate::error::{EngineError, Result};
use crate::store::{ArtifactLocation, ArtifactStore};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Marker file certifying a fully materialized cache directory
pub const SENTINEL_FILE: &str = ".ready";

/// Observable state of the cache directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// No local directory
    Absent,
    /// Directory exists but the sentinel is missing; contents untrustworthy
    Unverified,
    /// Directory exists and the sentinel is present
    Ready,
}

/// On-disk cache for the remote artifact tree
pub struct ArtifactCache {
    root: PathBuf,
    // Serializes materialization so concurrent callers cannot race the
    // purge/fetch/sentinel sequence.
    fetch_lock: Mutex<()>,
}

impl ArtifactCache {
    /// Create a cache rooted at `root`. Nothing is touched on disk until
    /// [`ensure_cached`](Self::ensure_cached) runs.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            fetch_lock: Mutex::new(()),
        }
    }

    /// The cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Current on-disk state
    pub fn state(&self) -> CacheState {
        if self.root.join(SENTINEL_FILE).exists() {
            CacheState::Ready
        } else if self.root.exists() {
            CacheState::Unverified
        } else {
            CacheState::Absent
        }
    }

    /// Make the remote tree available locally and return the cache root.
    ///
    /// Ready caches are returned immediately with zero network calls. An
    /// unverified directory is purged and re-fetched. The sentinel is only
    /// written after the full tree landed, so a failed fetch leaves the
    /// directory unverified for the next caller to repair.
    pub async fn ensure_cached(
        &self,
        store: &dyn ArtifactStore,
        location: &ArtifactLocation,
    ) -> Result<PathBuf> {
        let _guard = self.fetch_lock.lock().await;

        match self.state() {
            CacheState::Ready => {
                debug!("Cache at {:?} is ready, skipping fetch", self.root);
                return Ok(self.root.clone());
            }
            CacheState::Unverified => {
                warn!(
                    "Cache at {:?} has no sentinel, purging partial state",
                    self.root
                );
                tokio::fs::remove_dir_all(&self.root).await?;
            }
            CacheState::Absent => {}
        }

        if !store.exists(location).await? {
            return Err(EngineError::artifact_not_found(format!(
                "Remote location {} does not exist",
                location
            )));
        }

        tokio::fs::create_dir_all(&self.root).await?;
        info!("Fetching artifact tree {} into {:?}", location, self.root);
        store.fetch_tree(location, &self.root).await?;

        tokio::fs::write(self.root.join(SENTINEL_FILE), b"").await?;
        info!("Cache at {:?} is ready", self.root);
        Ok(self.root.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockStore;
    use tempfile::TempDir;

    fn test_location() -> ArtifactLocation {
        ArtifactLocation::parse("gs://test-bucket/model").unwrap()
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("artifact");
        let cache = ArtifactCache::new(&root);
        assert_eq!(cache.state(), CacheState::Absent);

        std::fs::create_dir_all(&root).unwrap();
        assert_eq!(cache.state(), CacheState::Unverified);

        std::fs::write(root.join(SENTINEL_FILE), b"").unwrap();
        assert_eq!(cache.state(), CacheState::Ready);
    }

    #[tokio::test]
    async fn test_ensure_cached_materializes_tree() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("artifact");
        let store = MockStore::new(vec![("model/config.json", br#"{}"#.to_vec())]);
        let cache = ArtifactCache::new(&root);

        let returned = cache.ensure_cached(&store, &test_location()).await.unwrap();
        assert_eq!(returned, root);
        assert_eq!(cache.state(), CacheState::Ready);
        assert!(root.join("model/config.json").exists());
        assert_eq!(store.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_remote_fails_fast() {
        let dir = TempDir::new().unwrap();
        let store = MockStore::missing();
        let cache = ArtifactCache::new(dir.path().join("artifact"));

        let err = cache
            .ensure_cached(&store, &test_location())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ArtifactNotFound { .. }));
        assert_eq!(store.fetch_calls(), 0);
        assert_eq!(cache.state(), CacheState::Absent);
    }

    #[tokio::test]
    async fn test_failed_fetch_leaves_unverified() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("artifact");
        let store = MockStore::new(vec![("weights.safetensors", vec![0u8; 16])]);
        store.fail_next_fetch();
        let cache = ArtifactCache::new(&root);

        let err = cache
            .ensure_cached(&store, &test_location())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Download { .. }));
        // The sentinel must not be committed on partial success.
        assert_eq!(cache.state(), CacheState::Unverified);
    }
}
