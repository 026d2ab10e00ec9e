use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Lifecycle stage of a stored checkpoint.
///
/// A model moves forward only: `Original` checkpoints come from the
/// provider, `Quantized` ones are derived from an original, `Exported`
/// ones from either. There are no backward transitions; re-running a
/// stage overwrites the destination path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Original,
    Quantized,
    Exported,
}

impl Stage {
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Original => "original",
            Stage::Quantized => "quantized",
            Stage::Exported => "exported",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Error)]
#[error("unsupported bit-width '{0}': expected 4 or 8")]
pub struct UnsupportedBitWidth(String);

/// Target precision for quantized checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum BitWidth {
    Four,
    Eight,
}

impl BitWidth {
    pub fn as_u8(self) -> u8 {
        match self {
            BitWidth::Four => 4,
            BitWidth::Eight => 8,
        }
    }
}

impl From<BitWidth> for u8 {
    fn from(bits: BitWidth) -> u8 {
        bits.as_u8()
    }
}

impl TryFrom<u8> for BitWidth {
    type Error = UnsupportedBitWidth;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(BitWidth::Four),
            8 => Ok(BitWidth::Eight),
            other => Err(UnsupportedBitWidth(other.to_string())),
        }
    }
}

impl FromStr for BitWidth {
    type Err = UnsupportedBitWidth;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "4" => Ok(BitWidth::Four),
            "8" => Ok(BitWidth::Eight),
            other => Err(UnsupportedBitWidth(other.to_string())),
        }
    }
}

impl fmt::Display for BitWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[derive(Debug, Error)]
#[error("unknown export format '{0}': expected onnx or gguf")]
pub struct UnknownExportFormat(String);

/// Serialization format an exported checkpoint is written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Onnx,
    Gguf,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Onnx => "onnx",
            ExportFormat::Gguf => "gguf",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = UnknownExportFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "onnx" => Ok(ExportFormat::Onnx),
            "gguf" => Ok(ExportFormat::Gguf),
            other => Err(UnknownExportFormat(other.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

#[derive(Debug, Error)]
#[error("invalid model id '{0}': ids must not be empty, '.' or '..'")]
pub struct InvalidModelId(String);

/// Turns a model identifier into a single path component.
///
/// Hub identifiers use `/` as an organization separator; on disk every
/// `/` becomes `_`, so `org/model-a` is stored as `org_model-a`. Ids
/// whose folded form is empty, `.` or `..` would name the stage
/// directory itself (or its parent) instead of an entry inside it, so
/// they are rejected before any path is derived from them.
pub fn sanitize_model_id(model_id: &str) -> Result<String, InvalidModelId> {
    let name = model_id.replace('/', "_");
    match name.as_str() {
        "" | "." | ".." => Err(InvalidModelId(model_id.to_string())),
        _ => Ok(name),
    }
}

/// A checkpoint at a specific lifecycle stage, addressed by its derived path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub model_id: String,
    pub stage: Stage,
    pub bits: Option<BitWidth>,
    pub format: Option<ExportFormat>,
    pub location: PathBuf,
}

impl ModelArtifact {
    pub fn original(model_id: impl Into<String>, location: PathBuf) -> Self {
        Self {
            model_id: model_id.into(),
            stage: Stage::Original,
            bits: None,
            format: None,
            location,
        }
    }

    pub fn quantized(model_id: impl Into<String>, bits: BitWidth, location: PathBuf) -> Self {
        Self {
            model_id: model_id.into(),
            stage: Stage::Quantized,
            bits: Some(bits),
            format: None,
            location,
        }
    }

    /// `bits` records the precision of the source checkpoint when the
    /// export came from a quantized artifact.
    pub fn exported(
        model_id: impl Into<String>,
        format: ExportFormat,
        bits: Option<BitWidth>,
        location: PathBuf,
    ) -> Self {
        Self {
            model_id: model_id.into(),
            stage: Stage::Exported,
            bits,
            format: Some(format),
            location,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_every_separator() {
        assert_eq!(sanitize_model_id("org/model-a").unwrap(), "org_model-a");
        assert_eq!(sanitize_model_id("a/b/c").unwrap(), "a_b_c");
        assert_eq!(sanitize_model_id("no-separator").unwrap(), "no-separator");
        assert!(!sanitize_model_id("mlx-community/Meta-Llama-3-8B")
            .unwrap()
            .contains('/'));
    }

    #[test]
    fn ids_that_name_the_layout_itself_are_rejected() {
        assert!(sanitize_model_id("").is_err());
        assert!(sanitize_model_id(".").is_err());
        assert!(sanitize_model_id("..").is_err());
        // With a separator the folded name is an ordinary entry again.
        assert_eq!(sanitize_model_id("../x").unwrap(), ".._x");
        assert_eq!(sanitize_model_id(".hidden").unwrap(), ".hidden");
    }

    #[test]
    fn bit_width_parses_only_supported_values() {
        assert_eq!("4".parse::<BitWidth>().unwrap(), BitWidth::Four);
        assert_eq!(" 8 ".parse::<BitWidth>().unwrap(), BitWidth::Eight);
        assert!("16".parse::<BitWidth>().is_err());
        assert!("four".parse::<BitWidth>().is_err());
        assert!(BitWidth::try_from(4u8).is_ok());
        assert!(BitWidth::try_from(5u8).is_err());
    }

    #[test]
    fn bit_width_serializes_as_a_number() {
        assert_eq!(serde_json::to_string(&BitWidth::Four).unwrap(), "4");
        assert_eq!(serde_json::from_str::<BitWidth>("8").unwrap(), BitWidth::Eight);
        assert!(serde_json::from_str::<BitWidth>("6").is_err());
    }

    #[test]
    fn export_format_parses_case_insensitively() {
        assert_eq!("gguf".parse::<ExportFormat>().unwrap(), ExportFormat::Gguf);
        assert_eq!("ONNX".parse::<ExportFormat>().unwrap(), ExportFormat::Onnx);
        assert!("pt".parse::<ExportFormat>().is_err());
        assert_eq!(ExportFormat::Gguf.to_string(), "gguf");
    }

    #[test]
    fn stage_names_match_the_directory_layout() {
        assert_eq!(Stage::Original.dir_name(), "original");
        assert_eq!(Stage::Quantized.dir_name(), "quantized");
        assert_eq!(Stage::Exported.dir_name(), "exported");
    }
}
