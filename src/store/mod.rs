use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::artifact::{
    sanitize_model_id, BitWidth, ExportFormat, InvalidModelId, ModelArtifact, Stage,
};
use crate::config::StoreConfig;
use crate::provider::{LoadedBundle, ModelProvider, ProviderError};

/// Stage record written inside directory-backed artifacts. A directory
/// without it does not count as a finished artifact.
pub const MANIFEST_FILE: &str = ".mlxkit.json";

#[derive(Debug, Error)]
pub enum StoreError {
    /// The id cannot name an entry inside the stage layout.
    #[error(transparent)]
    InvalidModel(#[from] InvalidModelId),

    /// A stage transition needs an artifact that is not on disk.
    #[error("missing {stage} artifact for model '{model_id}': expected {}", .expected.display())]
    MissingDependency {
        model_id: String,
        stage: Stage,
        expected: PathBuf,
    },

    /// The provider's model handle does not offer the requested operation.
    #[error("model '{model_id}' does not support {capability} with this provider")]
    UnsupportedCapability {
        model_id: String,
        capability: &'static str,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("stage record serialization failed: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Record written next to a persisted checkpoint after a successful
/// stage transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageManifest {
    pub model_id: String,
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bits: Option<BitWidth>,
    pub provider: String,
    pub created_at: String,
}

/// How download and quantize ended: persisted to the derived path, or
/// only resolved in memory because the handle is not persistable.
#[derive(Debug)]
pub enum OpOutcome {
    Persisted(ModelArtifact),
    InMemory { model_id: String, stage: Stage },
}

/// What the store found at an artifact's derived path.
#[derive(Debug)]
pub enum ArtifactState {
    Missing,
    /// Something exists at the path but carries no stage record.
    Incomplete,
    Ready {
        size: u64,
        modified: Option<i64>,
        manifest: Option<StageManifest>,
    },
}

impl ArtifactState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ArtifactState::Ready { .. })
    }
}

#[derive(Debug)]
pub struct StageEntry {
    pub artifact: ModelArtifact,
    pub state: ArtifactState,
}

/// Per-stage inventory for one model, as rendered by `review`.
#[derive(Debug)]
pub struct ModelReport {
    pub model_id: String,
    pub entries: Vec<StageEntry>,
}

struct ModelDirs {
    original: PathBuf,
    quantized: PathBuf,
    exported: PathBuf,
}

impl ModelDirs {
    fn new(root: &Path) -> Self {
        let base = root.join("models");
        Self {
            original: base.join(Stage::Original.dir_name()),
            quantized: base.join(Stage::Quantized.dir_name()),
            exported: base.join(Stage::Exported.dir_name()),
        }
    }

    fn ensure(&self) -> std::io::Result<()> {
        for dir in [&self.original, &self.quantized, &self.exported] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Directory-backed tracker for the original → quantized → exported
/// checkpoint lifecycle. All model work is delegated to the injected
/// [`ModelProvider`]; the store owns paths, preconditions and stage
/// records.
pub struct ArtifactStore {
    dirs: ModelDirs,
    provider: Arc<dyn ModelProvider>,
    deadline: Duration,
}

impl ArtifactStore {
    /// Creates the three stage directories if they are absent.
    pub fn new(
        config: &StoreConfig,
        provider: Arc<dyn ModelProvider>,
    ) -> Result<Self, StoreError> {
        let dirs = ModelDirs::new(&config.root);
        dirs.ensure()?;
        Ok(Self {
            dirs,
            provider,
            deadline: config.provider_deadline,
        })
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn original_path(&self, model_id: &str) -> Result<PathBuf, InvalidModelId> {
        Ok(self.dirs.original.join(sanitize_model_id(model_id)?))
    }

    pub fn quantized_path(
        &self,
        model_id: &str,
        bits: BitWidth,
    ) -> Result<PathBuf, InvalidModelId> {
        let name = sanitize_model_id(model_id)?;
        Ok(self.dirs.quantized.join(format!("{name}_{bits}bit")))
    }

    pub fn exported_path(
        &self,
        model_id: &str,
        format: ExportFormat,
    ) -> Result<PathBuf, InvalidModelId> {
        let name = sanitize_model_id(model_id)?;
        Ok(self.dirs.exported.join(format!("{name}.{format}")))
    }

    /// Inventories every stage variant for the model. Reads the
    /// filesystem only; fails only for ids that cannot derive a path.
    pub fn review(&self, model_id: &str) -> Result<ModelReport, StoreError> {
        let mut candidates = vec![ModelArtifact::original(
            model_id,
            self.original_path(model_id)?,
        )];
        for bits in [BitWidth::Four, BitWidth::Eight] {
            candidates.push(ModelArtifact::quantized(
                model_id,
                bits,
                self.quantized_path(model_id, bits)?,
            ));
        }
        for format in [ExportFormat::Onnx, ExportFormat::Gguf] {
            candidates.push(ModelArtifact::exported(
                model_id,
                format,
                None,
                self.exported_path(model_id, format)?,
            ));
        }

        let entries = candidates
            .into_iter()
            .map(|artifact| {
                let state = self.inspect(&artifact);
                StageEntry { artifact, state }
            })
            .collect();
        Ok(ModelReport {
            model_id: model_id.to_string(),
            entries,
        })
    }

    pub fn inspect(&self, artifact: &ModelArtifact) -> ArtifactState {
        let path = &artifact.location;
        match artifact.stage {
            Stage::Exported => {
                if path.is_file() {
                    ArtifactState::Ready {
                        size: fs::metadata(path).map(|meta| meta.len()).unwrap_or(0),
                        modified: mtime(path),
                        manifest: None,
                    }
                } else if path.exists() {
                    ArtifactState::Incomplete
                } else {
                    ArtifactState::Missing
                }
            }
            Stage::Original | Stage::Quantized => {
                if !path.is_dir() {
                    return if path.exists() {
                        ArtifactState::Incomplete
                    } else {
                        ArtifactState::Missing
                    };
                }
                match read_manifest(path) {
                    Some(manifest) => ArtifactState::Ready {
                        size: tree_size(path),
                        modified: mtime(path),
                        manifest: Some(manifest),
                    },
                    None => ArtifactState::Incomplete,
                }
            }
        }
    }

    /// Resolves the model through the provider and persists the original
    /// checkpoint at its derived path. A second download for the same
    /// model overwrites the first.
    pub async fn download<F>(&self, model_id: &str, mut status: F) -> Result<OpOutcome, StoreError>
    where
        F: FnMut(&str),
    {
        let dest = self.original_path(model_id)?;
        info!("downloading model '{}' via {}", model_id, self.provider.name());
        status(&format!(
            "resolving {model_id} through {}",
            self.provider.name()
        ));
        let bundle = self.load_bundle(model_id).await?;

        let Some(persistable) = bundle.model.as_persistable() else {
            info!("model '{}' resolved in memory only", model_id);
            return Ok(OpOutcome::InMemory {
                model_id: model_id.to_string(),
                stage: Stage::Original,
            });
        };

        status(&format!("saving checkpoint to {}", dest.display()));
        fs::create_dir_all(&dest)?;
        self.with_deadline(persistable.save(&dest)).await?;

        let artifact = ModelArtifact::original(model_id, dest);
        self.write_manifest(&artifact)?;
        info!("stored original checkpoint at {}", artifact.location.display());
        Ok(OpOutcome::Persisted(artifact))
    }

    /// Quantizes a previously downloaded model to the given precision.
    /// Requires the original artifact; the provider is not consulted
    /// when it is missing.
    pub async fn quantize<F>(
        &self,
        model_id: &str,
        bits: BitWidth,
        mut status: F,
    ) -> Result<OpOutcome, StoreError>
    where
        F: FnMut(&str),
    {
        let source = ModelArtifact::original(model_id, self.original_path(model_id)?);
        self.require_ready(&source)?;

        info!("quantizing '{}' to {}-bit", model_id, bits);
        status(&format!(
            "loading checkpoint from {}",
            source.location.display()
        ));
        let local = source.location.display().to_string();
        let bundle = match self.load_bundle(&local).await {
            Ok(bundle) => bundle,
            Err(err) => {
                warn!(
                    "local load from {} failed ({}), re-resolving '{}'",
                    source.location.display(),
                    err,
                    model_id
                );
                status(&format!("re-resolving {model_id}"));
                self.load_bundle(model_id).await?
            }
        };

        status(&format!("quantizing to {bits}-bit"));
        let quantized = self
            .with_deadline(self.provider.quantize(bundle.model, bits))
            .await?;

        let Some(persistable) = quantized.as_persistable() else {
            info!("quantized '{}' in memory only", model_id);
            return Ok(OpOutcome::InMemory {
                model_id: model_id.to_string(),
                stage: Stage::Quantized,
            });
        };

        let dest = self.quantized_path(model_id, bits)?;
        status(&format!("saving quantized checkpoint to {}", dest.display()));
        fs::create_dir_all(&dest)?;
        self.with_deadline(persistable.save(&dest)).await?;

        let artifact = ModelArtifact::quantized(model_id, bits, dest);
        self.write_manifest(&artifact)?;
        info!("stored quantized checkpoint at {}", artifact.location.display());
        Ok(OpOutcome::Persisted(artifact))
    }

    /// Exports a stored checkpoint to the target format. With `bits`
    /// the source is the matching quantized artifact, otherwise the
    /// original. The source is always a stored path; export never
    /// re-resolves the raw identifier.
    pub async fn export<F>(
        &self,
        model_id: &str,
        format: ExportFormat,
        bits: Option<BitWidth>,
        mut status: F,
    ) -> Result<ModelArtifact, StoreError>
    where
        F: FnMut(&str),
    {
        let source = match bits {
            Some(bits) => {
                ModelArtifact::quantized(model_id, bits, self.quantized_path(model_id, bits)?)
            }
            None => ModelArtifact::original(model_id, self.original_path(model_id)?),
        };
        self.require_ready(&source)?;

        info!(
            "exporting '{}' as {} from the {} checkpoint",
            model_id, format, source.stage
        );
        status(&format!(
            "loading checkpoint from {}",
            source.location.display()
        ));
        let local = source.location.display().to_string();
        let bundle = self.load_bundle(&local).await?;

        let Some(exportable) = bundle.model.as_exportable() else {
            return Err(StoreError::UnsupportedCapability {
                model_id: model_id.to_string(),
                capability: "export",
            });
        };

        let dest = self.exported_path(model_id, format)?;
        status(&format!("writing {format} export to {}", dest.display()));
        self.with_deadline(exportable.export(&dest, format)).await?;

        info!("exported '{}' to {}", model_id, dest.display());
        Ok(ModelArtifact::exported(model_id, format, bits, dest))
    }

    fn require_ready(&self, artifact: &ModelArtifact) -> Result<(), StoreError> {
        if self.inspect(artifact).is_ready() {
            Ok(())
        } else {
            Err(StoreError::MissingDependency {
                model_id: artifact.model_id.clone(),
                stage: artifact.stage,
                expected: artifact.location.clone(),
            })
        }
    }

    async fn with_deadline<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ProviderError>>,
    ) -> Result<T, ProviderError> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                after: self.deadline,
            }),
        }
    }

    async fn load_bundle(&self, source: &str) -> Result<LoadedBundle, StoreError> {
        let bundle = self.with_deadline(self.provider.load(source)).await?;
        debug!(
            "loaded {} (tokenizer: {})",
            bundle.model.describe(),
            bundle.tokenizer.name.as_deref().unwrap_or("unknown")
        );
        Ok(bundle)
    }

    fn write_manifest(&self, artifact: &ModelArtifact) -> Result<(), StoreError> {
        let manifest = StageManifest {
            model_id: artifact.model_id.clone(),
            stage: artifact.stage,
            bits: artifact.bits,
            provider: self.provider.name().to_string(),
            created_at: Utc::now().to_rfc3339(),
        };
        let raw = serde_json::to_string_pretty(&manifest)?;
        fs::write(artifact.location.join(MANIFEST_FILE), raw)?;
        Ok(())
    }
}

fn read_manifest(dir: &Path) -> Option<StageManifest> {
    let raw = fs::read_to_string(dir.join(MANIFEST_FILE)).ok()?;
    match serde_json::from_str(&raw) {
        Ok(manifest) => Some(manifest),
        Err(err) => {
            warn!("unreadable stage record in {}: {}", dir.display(), err);
            None
        }
    }
}

fn mtime(path: &Path) -> Option<i64> {
    fs::metadata(path)
        .ok()?
        .modified()
        .ok()?
        .duration_since(std::time::UNIX_EPOCH)
        .ok()
        .map(|elapsed| elapsed.as_secs() as i64)
}

fn tree_size(path: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(path) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| {
            // file_type never follows links, so a link cycle cannot recurse.
            let Ok(file_type) = entry.file_type() else {
                return 0;
            };
            if file_type.is_dir() {
                tree_size(&entry.path())
            } else if file_type.is_file() {
                entry.metadata().map(|meta| meta.len()).unwrap_or(0)
            } else {
                0
            }
        })
        .sum()
}
