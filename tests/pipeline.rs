//! Cross-module pipeline tests: cache lifecycle, model root location,
//! manifest repair and preprocessor fallback against a mock artifact store.

use mealscan_infer::bundle::{processor_candidates, resolve_processor, ProcessorSource};
use mealscan_infer::cache::{ArtifactCache, CacheState, SENTINEL_FILE};
use mealscan_infer::error::EngineError;
use mealscan_infer::inference::{rank_top_k, TOP_K};
use mealscan_infer::manifest::{
    locate_model_root, patch_model_family, ModelManifest, MANIFEST_FILE,
};
use mealscan_infer::processor::PROCESSOR_FILE;
use mealscan_infer::store::ArtifactLocation;
use mealscan_infer::test_utils::{init_test_env, manifest_without_family, processor_json, MockStore};
use std::sync::Arc;
use tempfile::TempDir;

fn location() -> ArtifactLocation {
    ArtifactLocation::parse("gs://test-bucket/food-vit/v3").unwrap()
}

#[tokio::test]
async fn ready_cache_issues_zero_store_calls() {
    init_test_env();
    let dir = TempDir::new().unwrap();
    let store = MockStore::new(vec![(MANIFEST_FILE, manifest_without_family())]);
    let cache = ArtifactCache::new(dir.path().join("artifact"));

    cache.ensure_cached(&store, &location()).await.unwrap();
    assert_eq!(store.exists_calls(), 1);
    assert_eq!(store.fetch_calls(), 1);

    // A second call short-circuits on the sentinel.
    cache.ensure_cached(&store, &location()).await.unwrap();
    assert_eq!(store.exists_calls(), 1);
    assert_eq!(store.fetch_calls(), 1);
}

#[tokio::test]
async fn unverified_cache_is_purged_and_refetched() {
    init_test_env();
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("artifact");

    // A tree left behind by an interrupted download: files but no sentinel.
    std::fs::create_dir_all(root.join("stale")).unwrap();
    std::fs::write(root.join("stale/weights.bin"), b"garbage").unwrap();

    let store = MockStore::new(vec![(MANIFEST_FILE, manifest_without_family())]);
    let cache = ArtifactCache::new(&root);
    assert_eq!(cache.state(), CacheState::Unverified);

    cache.ensure_cached(&store, &location()).await.unwrap();
    assert_eq!(cache.state(), CacheState::Ready);
    assert_eq!(store.fetch_calls(), 1);
    assert!(!root.join("stale/weights.bin").exists());
    assert!(root.join(MANIFEST_FILE).exists());
}

#[tokio::test]
async fn download_failure_then_retry_recovers() {
    init_test_env();
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("artifact");
    let store = MockStore::new(vec![
        (MANIFEST_FILE, manifest_without_family()),
        ("model.safetensors", vec![0u8; 64]),
    ]);
    store.fail_next_fetch();
    let cache = ArtifactCache::new(&root);

    let err = cache.ensure_cached(&store, &location()).await.unwrap_err();
    assert!(matches!(err, EngineError::Download { .. }));
    assert_eq!(cache.state(), CacheState::Unverified);
    assert!(!root.join(SENTINEL_FILE).exists());

    // The next call repairs the partial tree and completes.
    cache.ensure_cached(&store, &location()).await.unwrap();
    assert_eq!(cache.state(), CacheState::Ready);
    assert_eq!(store.fetch_calls(), 2);
    assert!(root.join("model.safetensors").exists());
}

#[tokio::test]
async fn concurrent_callers_download_once() {
    init_test_env();
    let dir = TempDir::new().unwrap();
    let store = Arc::new(MockStore::new(vec![(
        MANIFEST_FILE,
        manifest_without_family(),
    )]));
    let cache = Arc::new(ArtifactCache::new(dir.path().join("artifact")));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = Arc::clone(&store);
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            cache.ensure_cached(store.as_ref(), &location()).await
        }));
    }

    for handle in handles {
        let root = handle.await.unwrap().unwrap();
        assert_eq!(root, dir.path().join("artifact"));
    }
    assert_eq!(store.fetch_calls(), 1);
}

#[tokio::test]
async fn missing_remote_location_fails_fast() {
    init_test_env();
    let dir = TempDir::new().unwrap();
    let store = MockStore::missing();
    let cache = ArtifactCache::new(dir.path().join("artifact"));

    let err = cache.ensure_cached(&store, &location()).await.unwrap_err();
    assert!(matches!(err, EngineError::ArtifactNotFound { .. }));
    assert_eq!(store.fetch_calls(), 0);
}

#[tokio::test]
async fn nested_export_resolves_patches_and_falls_back() {
    init_test_env();

    // The exported tree nests the model two levels down and ships a
    // deeper decoy manifest; the manifest lacks the family discriminator
    // and no preprocessor config exists next to the weights.
    let store = MockStore::new(vec![
        ("export/model/config.json", scenario_manifest()),
        ("export/model/model.safetensors", vec![0u8; 64]),
        ("export/model/checkpoints/step-100/config.json", b"{}".to_vec()),
    ]);

    let dir = TempDir::new().unwrap();
    let cache = ArtifactCache::new(dir.path().join("artifact"));
    assert_eq!(cache.state(), CacheState::Absent);

    let cache_root = cache.ensure_cached(&store, &location()).await.unwrap();
    assert_eq!(cache.state(), CacheState::Ready);

    // Shallowest manifest wins over the checkpoint decoy.
    let model_root = locate_model_root(&cache_root);
    assert_eq!(model_root, cache_root.join("export/model"));

    // The discriminator is injected exactly once.
    assert!(patch_model_family(&model_root, "vit").unwrap());
    assert!(!patch_model_family(&model_root, "vit").unwrap());
    let manifest = ModelManifest::load(&model_root).unwrap();
    assert_eq!(manifest.model_type.as_deref(), Some("vit"));
    assert_eq!(manifest.num_classes().unwrap(), 10);

    // Primary candidate (the model root) has no preprocessor config, so
    // resolution falls back to the configured override.
    let override_dir = dir.path().join("override");
    std::fs::create_dir_all(&override_dir).unwrap();
    std::fs::write(override_dir.join(PROCESSOR_FILE), processor_json(224)).unwrap();

    let override_spec = override_dir.to_string_lossy().to_string();
    let candidates = processor_candidates(&model_root, Some(&override_spec), None);
    assert_eq!(candidates[0], ProcessorSource::Dir(model_root.clone()));

    let processor = resolve_processor(&candidates).await.unwrap();
    assert_eq!(processor.target_dims(), (224, 224));
}

#[test]
fn scenario_score_vector_ranks_as_specified() {
    let scores = [0.05, 0.6, 0.1, 0.05, 0.05, 0.05, 0.02, 0.03, 0.03, 0.02];
    let ranked = rank_top_k(&scores, TOP_K);

    assert_eq!(ranked.len(), 5);
    assert_eq!(ranked[0], (1, 0.6));
    assert_eq!(ranked[1], (2, 0.1));
    assert_eq!(
        ranked[2..].iter().map(|(i, _)| *i).collect::<Vec<_>>(),
        vec![0, 3, 4]
    );
    assert!(ranked.windows(2).all(|w| w[0].1 >= w[1].1));
}

fn scenario_manifest() -> Vec<u8> {
    let labels: Vec<String> = (0..10).map(|i| format!(r#""{i}": "class_{i}""#)).collect();
    format!(r#"{{"id2label": {{{}}}}}"#, labels.join(", ")).into_bytes()
}
