use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default deadline for a single provider call. Resolving a large
/// checkpoint over the network can legitimately take minutes.
pub const DEFAULT_PROVIDER_DEADLINE: Duration = Duration::from_secs(600);

/// Where the store keeps its models tree and how long provider calls
/// may run. Built once at startup and handed to [`crate::store::ArtifactStore`];
/// nothing is read from the environment.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory the `models/` tree lives under.
    pub root: PathBuf,
    pub provider_deadline: Duration,
}

impl StoreConfig {
    pub fn at_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            provider_deadline: DEFAULT_PROVIDER_DEADLINE,
        }
    }

    /// Anchors the tree next to the executable, so the tool manages the
    /// same artifacts no matter which directory it is launched from.
    pub fn install_relative() -> Self {
        Self::at_root(install_root())
    }

    pub fn provider_deadline(mut self, deadline: Duration) -> Self {
        self.provider_deadline = deadline;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::install_relative()
    }
}

fn install_root() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."))
}
