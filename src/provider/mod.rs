pub mod mlx;

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::artifact::{BitWidth, ExportFormat};

/// Errors surfaced by a model-provider collaborator.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider's backing library is not installed. Fatal at startup.
    #[error("{library} is not available: {hint}")]
    Unavailable { library: String, hint: String },

    /// The provider could not resolve an identifier or local path to a model.
    #[error("failed to load model '{model}': {detail}")]
    Resolution { model: String, detail: String },

    #[error("provider {op} failed: {detail}")]
    Operation { op: &'static str, detail: String },

    #[error("provider call did not finish within {}s", .after.as_secs())]
    Timeout { after: Duration },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Capability: the loaded model can be written to a directory on disk.
#[async_trait]
pub trait Persistable: Send + Sync {
    async fn save(&self, dest: &Path) -> Result<(), ProviderError>;
}

/// Capability: the loaded model can be serialized to a target format.
#[async_trait]
pub trait Exportable: Send + Sync {
    async fn export(&self, dest: &Path, format: ExportFormat) -> Result<(), ProviderError>;
}

/// Handle to a model the provider has loaded or produced.
///
/// What a handle can do is part of its type: callers ask for a
/// capability through the accessors and get `None` when the provider's
/// API does not offer the operation for this model.
pub trait ProviderModel: Send + Sync {
    /// Identifier or filesystem path the provider resolves this handle from.
    fn locator(&self) -> &str;

    /// Short human-readable description, e.g. for logs.
    fn describe(&self) -> &str;

    fn as_persistable(&self) -> Option<&dyn Persistable>;

    fn as_exportable(&self) -> Option<&dyn Exportable>;
}

/// Tokenizer metadata that came along with a loaded model.
#[derive(Debug, Clone, Default)]
pub struct TokenizerInfo {
    pub name: Option<String>,
}

/// A loaded model together with its tokenizer metadata.
pub struct LoadedBundle {
    pub model: Box<dyn ProviderModel>,
    pub tokenizer: TokenizerInfo,
}

/// The collaborator that does the actual model work: resolving,
/// downloading and quantizing checkpoints. The store never talks to a
/// hub or an ML runtime directly.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Startup dependency check. An `Err` here means the provider's
    /// backing library is missing and no operation can work.
    fn check_available(&self) -> Result<(), ProviderError>;

    /// Resolves a model identifier or a local checkpoint path.
    async fn load(&self, id_or_path: &str) -> Result<LoadedBundle, ProviderError>;

    /// Produces a reduced-precision model from a loaded one.
    async fn quantize(
        &self,
        model: Box<dyn ProviderModel>,
        bits: BitWidth,
    ) -> Result<Box<dyn ProviderModel>, ProviderError>;
}
