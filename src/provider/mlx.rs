use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{
    Exportable, LoadedBundle, ModelProvider, Persistable, ProviderError, ProviderModel,
    TokenizerInfo,
};
use crate::artifact::BitWidth;

const IMPORT_PROBE: &str = "import mlx_lm";

// Loads through mlx_lm and reports what came back on the last stdout line.
const LOAD_SNIPPET: &str = r#"
import json, sys
from mlx_lm import load
model, tokenizer = load(sys.argv[1])
config = getattr(model, "args", None) or getattr(model, "config", None)
print(json.dumps({
    "model_type": getattr(config, "model_type", None),
    "tokenizer": type(tokenizer).__name__,
}))
"#;

/// Model provider backed by the `mlx_lm` Python package.
///
/// Every operation shells out to `python3`: resolving runs the package's
/// `load`, persistence and quantization run `mlx_lm.convert`. The
/// package keeps its own download cache, so re-resolving an already
/// fetched model does not hit the network again.
pub struct MlxLmProvider {
    python: String,
    work_dir: PathBuf,
}

impl MlxLmProvider {
    pub fn new() -> Self {
        Self {
            python: "python3".to_string(),
            work_dir: std::env::temp_dir().join("mlxkit"),
        }
    }

    /// Overrides the interpreter binary, e.g. a venv's `python`.
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    /// Overrides where quantized output is staged before persistence.
    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = dir.into();
        self
    }

    async fn run_python(&self, args: &[&str]) -> Result<std::process::Output, ProviderError> {
        run_interpreter(&self.python, args).await
    }
}

async fn run_interpreter(python: &str, args: &[&str]) -> Result<std::process::Output, ProviderError> {
    debug!("spawning {} with {} args", python, args.len());
    let output = tokio::process::Command::new(python)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .await?;
    Ok(output)
}

impl Default for MlxLmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for MlxLmProvider {
    fn name(&self) -> &str {
        "mlx_lm"
    }

    fn check_available(&self) -> Result<(), ProviderError> {
        let probe = std::process::Command::new(&self.python)
            .args(["-c", IMPORT_PROBE])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match probe {
            Ok(status) if status.success() => Ok(()),
            _ => Err(ProviderError::Unavailable {
                library: "mlx_lm".to_string(),
                hint: format!(
                    "install it with 'pip install mlx-lm' and make sure '{}' is on PATH",
                    self.python
                ),
            }),
        }
    }

    async fn load(&self, id_or_path: &str) -> Result<LoadedBundle, ProviderError> {
        let output = self.run_python(&["-c", LOAD_SNIPPET, id_or_path]).await?;
        if !output.status.success() {
            return Err(ProviderError::Resolution {
                model: id_or_path.to_string(),
                detail: stderr_tail(&output),
            });
        }

        // mlx_lm may chat on stdout while fetching; the probe line is last.
        let stdout = String::from_utf8_lossy(&output.stdout);
        let probe: LoadProbe = stdout
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line.trim()).ok())
            .unwrap_or_default();

        let model_type = probe.model_type.unwrap_or_else(|| "unknown".to_string());
        let describe = format!("{model_type} checkpoint '{id_or_path}'");
        Ok(LoadedBundle {
            model: Box::new(MlxModel {
                python: self.python.clone(),
                source: ModelSource::Reference,
                locator: id_or_path.to_string(),
                describe,
            }),
            tokenizer: TokenizerInfo {
                name: probe.tokenizer,
            },
        })
    }

    async fn quantize(
        &self,
        model: Box<dyn ProviderModel>,
        bits: BitWidth,
    ) -> Result<Box<dyn ProviderModel>, ProviderError> {
        std::fs::create_dir_all(&self.work_dir)?;
        let staging = self.work_dir.join(staging_name(bits));

        let args = convert_args(model.locator(), &staging, Some(bits));
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = self.run_python(&arg_refs).await?;
        if !output.status.success() {
            return Err(ProviderError::Operation {
                op: "quantize",
                detail: stderr_tail(&output),
            });
        }

        let describe = format!("{bits}-bit quantization of {}", model.describe());
        let locator = staging.display().to_string();
        Ok(Box::new(MlxModel {
            python: self.python.clone(),
            source: ModelSource::Staged(staging),
            locator,
            describe,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoadProbe {
    model_type: Option<String>,
    tokenizer: Option<String>,
}

enum ModelSource {
    /// A hub identifier or an existing checkpoint directory.
    Reference,
    /// Quantized output waiting in the work dir until `save` moves it.
    Staged(PathBuf),
}

struct MlxModel {
    python: String,
    source: ModelSource,
    locator: String,
    describe: String,
}

impl ProviderModel for MlxModel {
    fn locator(&self) -> &str {
        &self.locator
    }

    fn describe(&self) -> &str {
        &self.describe
    }

    fn as_persistable(&self) -> Option<&dyn Persistable> {
        Some(self)
    }

    // Export is not available in the current mlx_lm API.
    fn as_exportable(&self) -> Option<&dyn Exportable> {
        None
    }
}

#[async_trait]
impl Persistable for MlxModel {
    async fn save(&self, dest: &Path) -> Result<(), ProviderError> {
        match &self.source {
            ModelSource::Staged(staging) => swap_into_place(staging, dest),
            ModelSource::Reference => {
                // Convert into a sibling first; whatever sits at dest
                // is only replaced once the conversion has finished.
                let staging = partial_sibling(dest);
                let _ = std::fs::remove_dir_all(&staging);
                let args = convert_args(&self.locator, &staging, None);
                let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
                let output = run_interpreter(&self.python, &arg_refs).await?;
                if !output.status.success() {
                    let _ = std::fs::remove_dir_all(&staging);
                    return Err(ProviderError::Operation {
                        op: "save",
                        detail: stderr_tail(&output),
                    });
                }
                swap_into_place(&staging, dest)
            }
        }
    }
}

/// Replaces whatever sits at `dest` with the finished tree at `staging`.
fn swap_into_place(staging: &Path, dest: &Path) -> Result<(), ProviderError> {
    if dest.is_dir() {
        std::fs::remove_dir_all(dest)?;
    } else if dest.exists() {
        std::fs::remove_file(dest)?;
    }
    if let Err(err) = std::fs::rename(staging, dest) {
        debug!("rename into place failed ({err}), copying instead");
        copy_tree(staging, dest)?;
        let _ = std::fs::remove_dir_all(staging);
    }
    Ok(())
}

/// Staging directory next to `dest`, so the final swap is a rename on
/// the same filesystem.
fn partial_sibling(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "model".to_string());
    dest.with_file_name(format!(".{name}.{}.partial", unix_nanos()))
}

fn convert_args(source: &str, dest: &Path, bits: Option<BitWidth>) -> Vec<String> {
    let mut args = vec![
        "-m".to_string(),
        "mlx_lm.convert".to_string(),
        "--hf-path".to_string(),
        source.to_string(),
        "--mlx-path".to_string(),
        dest.display().to_string(),
    ];
    if let Some(bits) = bits {
        args.push("-q".to_string());
        args.push("--q-bits".to_string());
        args.push(bits.as_u8().to_string());
    }
    args
}

fn staging_name(bits: BitWidth) -> String {
    format!("quantize-{bits}bit-{}", unix_nanos())
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default()
}

/// Python buries the actual error at the end of a traceback, so keep
/// only the last few stderr lines.
fn stderr_tail(output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        return format!("exit status {}", output.status);
    }
    let lines: Vec<&str> = trimmed.lines().collect();
    lines[lines.len().saturating_sub(5)..].join("\n")
}

fn copy_tree(src: &Path, dest: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_tree(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
