pub mod artifact;
pub mod config;
pub mod provider;
pub mod store;

pub use artifact::{BitWidth, ExportFormat, ModelArtifact, Stage};
pub use config::StoreConfig;
pub use provider::{LoadedBundle, ModelProvider, ProviderError, ProviderModel};
pub use store::{ArtifactStore, ModelReport, OpOutcome, StoreError};
