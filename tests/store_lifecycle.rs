use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use mlxkit::artifact::{BitWidth, ExportFormat, Stage};
use mlxkit::config::StoreConfig;
use mlxkit::provider::{
    Exportable, LoadedBundle, ModelProvider, Persistable, ProviderError, ProviderModel,
    TokenizerInfo,
};
use mlxkit::store::{ArtifactStore, OpOutcome, StoreError, MANIFEST_FILE};

struct MockProvider {
    calls: Mutex<Vec<String>>,
    persistable: bool,
    exportable: bool,
    reject_paths: bool,
    delay: Option<Duration>,
}

impl MockProvider {
    fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            persistable: true,
            exportable: true,
            reject_paths: false,
            delay: None,
        }
    }

    fn without_persistence(mut self) -> Self {
        self.persistable = false;
        self
    }

    fn without_export(mut self) -> Self {
        self.exportable = false;
        self
    }

    fn rejecting_local_paths(mut self) -> Self {
        self.reject_paths = true;
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn load_calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn check_available(&self) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn load(&self, id_or_path: &str) -> Result<LoadedBundle, ProviderError> {
        self.calls.lock().unwrap().push(id_or_path.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject_paths && Path::new(id_or_path).is_absolute() {
            return Err(ProviderError::Resolution {
                model: id_or_path.to_string(),
                detail: "local checkpoint rejected".to_string(),
            });
        }
        Ok(LoadedBundle {
            model: Box::new(MockModel {
                locator: id_or_path.to_string(),
                persistable: self.persistable,
                exportable: self.exportable,
            }),
            tokenizer: TokenizerInfo::default(),
        })
    }

    async fn quantize(
        &self,
        model: Box<dyn ProviderModel>,
        _bits: BitWidth,
    ) -> Result<Box<dyn ProviderModel>, ProviderError> {
        Ok(Box::new(MockModel {
            locator: model.locator().to_string(),
            persistable: self.persistable,
            exportable: self.exportable,
        }))
    }
}

struct MockModel {
    locator: String,
    persistable: bool,
    exportable: bool,
}

impl ProviderModel for MockModel {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn describe(&self) -> &str {
        "mock checkpoint"
    }

    fn as_persistable(&self) -> Option<&dyn Persistable> {
        if self.persistable {
            Some(self)
        } else {
            None
        }
    }

    fn as_exportable(&self) -> Option<&dyn Exportable> {
        if self.exportable {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl Persistable for MockModel {
    async fn save(&self, dest: &Path) -> Result<(), ProviderError> {
        std::fs::create_dir_all(dest)?;
        std::fs::write(dest.join("weights.bin"), b"mock-weights")?;
        Ok(())
    }
}

#[async_trait]
impl Exportable for MockModel {
    async fn export(&self, dest: &Path, _format: ExportFormat) -> Result<(), ProviderError> {
        std::fs::write(dest, b"mock-export")?;
        Ok(())
    }
}

fn store_with(tmp: &TempDir, provider: Arc<MockProvider>) -> ArtifactStore {
    ArtifactStore::new(&StoreConfig::at_root(tmp.path()), provider).expect("store init")
}

#[tokio::test]
async fn lifecycle_walks_all_three_stages() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new());
    let store = store_with(&tmp, provider.clone());

    let outcome = store.download("org/model-a", |_| {}).await.unwrap();
    let original = match outcome {
        OpOutcome::Persisted(artifact) => artifact,
        other => panic!("expected a persisted artifact, got {other:?}"),
    };
    assert_eq!(original.location, store.original_path("org/model-a").unwrap());
    assert!(original.location.ends_with("models/original/org_model-a"));
    assert!(original.location.join("weights.bin").is_file());
    assert!(original.location.join(MANIFEST_FILE).is_file());

    let outcome = store
        .quantize("org/model-a", BitWidth::Four, |_| {})
        .await
        .unwrap();
    let quantized = match outcome {
        OpOutcome::Persisted(artifact) => artifact,
        other => panic!("expected a persisted artifact, got {other:?}"),
    };
    assert!(quantized.location.ends_with("models/quantized/org_model-a_4bit"));
    assert_eq!(quantized.bits, Some(BitWidth::Four));
    assert!(quantized.location.join(MANIFEST_FILE).is_file());

    let exported = store
        .export("org/model-a", ExportFormat::Gguf, Some(BitWidth::Four), |_| {})
        .await
        .unwrap();
    assert!(exported.location.ends_with("models/exported/org_model-a.gguf"));
    assert!(exported.location.is_file());

    // A model that was never downloaded cannot be exported, and the
    // provider must not be asked about it.
    let calls_before = provider.load_calls().len();
    let err = store
        .export("org/model-b", ExportFormat::Onnx, None, |_| {})
        .await
        .unwrap_err();
    match err {
        StoreError::MissingDependency { stage, expected, .. } => {
            assert_eq!(stage, Stage::Original);
            assert_eq!(expected, store.original_path("org/model-b").unwrap());
        }
        other => panic!("expected a missing dependency, got {other}"),
    }
    assert_eq!(provider.load_calls().len(), calls_before);
}

#[tokio::test]
async fn quantize_without_an_original_never_reaches_the_provider() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new());
    let store = store_with(&tmp, provider.clone());

    let err = store
        .quantize("org/model-a", BitWidth::Four, |_| {})
        .await
        .unwrap_err();
    match err {
        StoreError::MissingDependency { model_id, stage, expected } => {
            assert_eq!(model_id, "org/model-a");
            assert_eq!(stage, Stage::Original);
            assert_eq!(expected, store.original_path("org/model-a").unwrap());
        }
        other => panic!("expected a missing dependency, got {other}"),
    }
    assert!(provider.load_calls().is_empty());
}

#[tokio::test]
async fn export_with_bits_requires_that_exact_quantized_artifact() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new());
    let store = store_with(&tmp, provider.clone());

    // A present original does not satisfy a quantized-source export.
    store.download("org/model-a", |_| {}).await.unwrap();
    store
        .quantize("org/model-a", BitWidth::Eight, |_| {})
        .await
        .unwrap();

    let err = store
        .export("org/model-a", ExportFormat::Gguf, Some(BitWidth::Four), |_| {})
        .await
        .unwrap_err();
    match err {
        StoreError::MissingDependency { stage, expected, .. } => {
            assert_eq!(stage, Stage::Quantized);
            assert_eq!(
                expected,
                store.quantized_path("org/model-a", BitWidth::Four).unwrap()
            );
        }
        other => panic!("expected a missing dependency, got {other}"),
    }
}

#[tokio::test]
async fn export_loads_from_the_stored_path_not_the_raw_id() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new());
    let store = store_with(&tmp, provider.clone());

    store.download("org/model-a", |_| {}).await.unwrap();
    store
        .export("org/model-a", ExportFormat::Onnx, None, |_| {})
        .await
        .unwrap();

    let calls = provider.load_calls();
    let last = calls.last().unwrap();
    assert_eq!(
        *last,
        store.original_path("org/model-a").unwrap().display().to_string()
    );
    assert_ne!(*last, "org/model-a");
}

#[tokio::test]
async fn a_second_download_overwrites_the_first() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new());
    let store = store_with(&tmp, provider.clone());

    store.download("org/model-a", |_| {}).await.unwrap();
    let outcome = store.download("org/model-a", |_| {}).await.unwrap();

    match outcome {
        OpOutcome::Persisted(artifact) => {
            assert_eq!(artifact.location, store.original_path("org/model-a").unwrap());
            assert!(artifact.location.join(MANIFEST_FILE).is_file());
        }
        other => panic!("expected a persisted artifact, got {other:?}"),
    }
}

#[tokio::test]
async fn aliasing_ids_are_rejected_before_any_work() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new());
    let store = store_with(&tmp, provider.clone());

    // An unrelated artifact that must survive the rejected calls: an
    // id like '..' would otherwise derive the models root itself and
    // an overwriting save would wipe every stage directory.
    store.download("org/model-a", |_| {}).await.unwrap();
    let kept = store.original_path("org/model-a").unwrap();

    for id in ["", ".", ".."] {
        let err = store.download(id, |_| {}).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidModel(_)), "id {id:?}: {err}");

        let err = store.quantize(id, BitWidth::Four, |_| {}).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidModel(_)), "id {id:?}: {err}");

        let err = store
            .export(id, ExportFormat::Gguf, None, |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidModel(_)), "id {id:?}: {err}");

        assert!(store.review(id).is_err(), "id {id:?}");
    }

    assert_eq!(provider.load_calls().len(), 1);
    assert!(kept.join("weights.bin").is_file());
    assert!(kept.join(MANIFEST_FILE).is_file());
    for stage in ["original", "quantized", "exported"] {
        assert!(tmp.path().join("models").join(stage).is_dir());
    }
}

#[tokio::test]
async fn a_bare_directory_does_not_count_as_an_artifact() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new());
    let store = store_with(&tmp, provider.clone());

    // Directory exists but no stage record was ever written.
    std::fs::create_dir_all(store.original_path("org/model-a").unwrap()).unwrap();

    let err = store
        .quantize("org/model-a", BitWidth::Four, |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::MissingDependency { .. }));
    assert!(provider.load_calls().is_empty());
}

#[tokio::test]
async fn unpersistable_download_reports_in_memory_and_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new().without_persistence());
    let store = store_with(&tmp, provider.clone());

    let outcome = store.download("org/model-a", |_| {}).await.unwrap();
    match outcome {
        OpOutcome::InMemory { model_id, stage } => {
            assert_eq!(model_id, "org/model-a");
            assert_eq!(stage, Stage::Original);
        }
        other => panic!("expected an in-memory outcome, got {other:?}"),
    }
    assert!(!store.original_path("org/model-a").unwrap().exists());
}

#[tokio::test]
async fn export_without_the_capability_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new().without_export());
    let store = store_with(&tmp, provider.clone());

    store.download("org/model-a", |_| {}).await.unwrap();
    let err = store
        .export("org/model-a", ExportFormat::Gguf, None, |_| {})
        .await
        .unwrap_err();
    match err {
        StoreError::UnsupportedCapability { model_id, capability } => {
            assert_eq!(model_id, "org/model-a");
            assert_eq!(capability, "export");
        }
        other => panic!("expected unsupported capability, got {other}"),
    }
    assert!(!store
        .exported_path("org/model-a", ExportFormat::Gguf)
        .unwrap()
        .exists());
}

#[tokio::test]
async fn a_slow_provider_hits_the_deadline() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new().delayed(Duration::from_millis(200)));
    let config = StoreConfig::at_root(tmp.path()).provider_deadline(Duration::from_millis(50));
    let store = ArtifactStore::new(&config, provider.clone()).unwrap();

    let err = store.download("org/model-a", |_| {}).await.unwrap_err();
    match err {
        StoreError::Provider(ProviderError::Timeout { after }) => {
            assert_eq!(after, Duration::from_millis(50));
        }
        other => panic!("expected a timeout, got {other}"),
    }
    assert!(!store.original_path("org/model-a").unwrap().exists());
}

#[tokio::test]
async fn quantize_falls_back_to_the_model_id_when_the_path_fails() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new().rejecting_local_paths());
    let store = store_with(&tmp, provider.clone());

    // Seed the original artifact by hand; the mock cannot save it
    // through a path-based download here.
    let original = store.original_path("org/model-a").unwrap();
    std::fs::create_dir_all(&original).unwrap();
    std::fs::write(original.join("weights.bin"), b"seed").unwrap();
    let seeded = serde_json::json!({
        "model_id": "org/model-a",
        "stage": "original",
        "provider": "mock",
        "created_at": "2025-01-01T00:00:00Z",
    });
    std::fs::write(original.join(MANIFEST_FILE), seeded.to_string()).unwrap();

    let outcome = store
        .quantize("org/model-a", BitWidth::Four, |_| {})
        .await
        .unwrap();
    assert!(matches!(outcome, OpOutcome::Persisted(_)));

    let calls = provider.load_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0], original.display().to_string());
    assert_eq!(calls[1], "org/model-a");
}

#[tokio::test]
async fn status_callbacks_describe_the_operation() {
    let tmp = TempDir::new().unwrap();
    let provider = Arc::new(MockProvider::new());
    let store = store_with(&tmp, provider.clone());

    let mut messages: Vec<String> = Vec::new();
    store
        .download("org/model-a", |msg| messages.push(msg.to_string()))
        .await
        .unwrap();

    assert!(messages.iter().any(|msg| msg.contains("org/model-a")));
    assert!(messages.iter().any(|msg| msg.contains("saving")));
}
