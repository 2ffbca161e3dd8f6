//! Test utilities and helpers
//!
//! Shared fixtures for unit and integration tests: a counting in-memory
//! artifact store and small artifact-tree builders.

use crate::error::{EngineError, Result};
use crate::store::{ArtifactLocation, ArtifactStore};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Once;

/// Global test initialization
static TEST_INIT: Once = Once::new();

/// Initialize test environment once for all tests
pub fn init_test_env() {
    TEST_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter("error")
            .with_test_writer()
            .try_init();
    });
}

/// In-memory [`ArtifactStore`] that materializes a fixed object tree and
/// counts how often it is hit
pub struct MockStore {
    objects: Vec<(String, Vec<u8>)>,
    present: bool,
    exists_calls: AtomicUsize,
    fetch_calls: AtomicUsize,
    fail_next_fetch: AtomicBool,
}

impl MockStore {
    /// A store holding the given `(relative path, bytes)` objects
    pub fn new<S: Into<String>>(objects: Vec<(S, Vec<u8>)>) -> Self {
        Self {
            objects: objects
                .into_iter()
                .map(|(path, bytes)| (path.into(), bytes))
                .collect(),
            present: true,
            exists_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            fail_next_fetch: AtomicBool::new(false),
        }
    }

    /// A store whose remote location does not exist
    pub fn missing() -> Self {
        Self {
            objects: Vec::new(),
            present: false,
            exists_calls: AtomicUsize::new(0),
            fetch_calls: AtomicUsize::new(0),
            fail_next_fetch: AtomicBool::new(false),
        }
    }

    /// Make the next `fetch_tree` call fail after writing a partial tree
    pub fn fail_next_fetch(&self) {
        self.fail_next_fetch.store(true, Ordering::SeqCst);
    }

    pub fn exists_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArtifactStore for MockStore {
    async fn exists(&self, _location: &ArtifactLocation) -> Result<bool> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.present)
    }

    async fn fetch_tree(&self, _location: &ArtifactLocation, dest: &Path) -> Result<()> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if self.fail_next_fetch.swap(false, Ordering::SeqCst) {
            // Leave a partial tree behind, like an interrupted download.
            if let Some((path, bytes)) = self.objects.first() {
                let target = dest.join(path);
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&target, bytes).await?;
            }
            return Err(EngineError::download("injected fetch failure"));
        }

        for (path, bytes) in &self.objects {
            let target = dest.join(path);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&target, bytes).await?;
        }
        Ok(())
    }
}

/// A manifest lacking the model-family discriminator
pub fn manifest_without_family() -> Vec<u8> {
    br#"{"id2label": {"0": "ramen", "1": "sushi", "2": "tacos"}, "_name_or_path": "google/vit-base-patch16-224"}"#
        .to_vec()
}

/// A preprocessor config with square geometry
pub fn processor_json(side: usize) -> Vec<u8> {
    format!(
        r#"{{"size": {{"height": {side}, "width": {side}}}, "image_mean": [0.5, 0.5, 0.5], "image_std": [0.5, 0.5, 0.5]}}"#
    )
    .into_bytes()
}

/// A 4x4 PNG for decode tests
pub fn tiny_png() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 120, 50]));
    let mut bytes = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut bytes, image::ImageFormat::Png)
        .expect("encode test png");
    bytes.into_inner()
}
