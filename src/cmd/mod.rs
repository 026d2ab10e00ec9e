use anyhow::Result;

use mlxkit::artifact::{BitWidth, ExportFormat};
use mlxkit::store::{ArtifactState, ArtifactStore, OpOutcome};

use crate::format::{human_bytes, human_time};
use crate::progress::Progress;

pub fn review(store: &ArtifactStore, model: &str) -> Result<()> {
    let report = store.review(model)?;

    println!("\nModel: {}", report.model_id);
    println!();
    println!("{:<11} {:<8} {:<9} {:<14} PATH", "STAGE", "VARIANT", "SIZE", "MODIFIED");
    for entry in &report.entries {
        let variant = entry
            .artifact
            .bits
            .map(|bits| format!("{bits}bit"))
            .or_else(|| entry.artifact.format.map(|format| format.to_string()))
            .unwrap_or_else(|| "-".to_string());
        let (size, modified) = match &entry.state {
            ArtifactState::Ready { size, modified, .. } => (
                human_bytes(*size),
                modified
                    .map(|ts| human_time(ts, "-"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            ArtifactState::Incomplete => ("partial".to_string(), "-".to_string()),
            ArtifactState::Missing => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<11} {:<8} {:<9} {:<14} {}",
            entry.artifact.stage,
            variant,
            size,
            modified,
            entry.artifact.location.display()
        );
    }
    println!("\nTip: check the provider's documentation for supported models and formats.");
    Ok(())
}

pub async fn download(store: &ArtifactStore, model: &str) -> Result<()> {
    let mut progress = Progress::new();
    progress.spinner(&format!("downloading {model}"));
    let outcome = store.download(model, |msg| progress.set_message(msg)).await;
    progress.stop_and_clear();

    match outcome? {
        OpOutcome::Persisted(artifact) => {
            println!("Model saved to {}", artifact.location.display());
        }
        OpOutcome::InMemory { model_id, .. } => {
            println!(
                "Model '{}' loaded in memory ({} does not persist checkpoints)",
                model_id,
                store.provider_name()
            );
        }
    }
    Ok(())
}

pub async fn quantize(store: &ArtifactStore, model: &str, bits: BitWidth) -> Result<()> {
    let mut progress = Progress::new();
    progress.spinner(&format!("quantizing {model} to {bits}-bit"));
    let outcome = store.quantize(model, bits, |msg| progress.set_message(msg)).await;
    progress.stop_and_clear();

    match outcome? {
        OpOutcome::Persisted(artifact) => {
            println!("Quantized model saved to {}", artifact.location.display());
        }
        OpOutcome::InMemory { model_id, .. } => {
            println!(
                "Quantized '{}' in memory only ({} does not persist checkpoints)",
                model_id,
                store.provider_name()
            );
        }
    }
    Ok(())
}

pub async fn export(
    store: &ArtifactStore,
    model: &str,
    format: ExportFormat,
    bits: Option<BitWidth>,
) -> Result<()> {
    let mut progress = Progress::new();
    progress.spinner(&format!("exporting {model} as {format}"));
    let outcome = store
        .export(model, format, bits, |msg| progress.set_message(msg))
        .await;
    progress.stop_and_clear();

    let artifact = outcome?;
    println!("Exported {} to {}", model, artifact.location.display());
    Ok(())
}
