use std::str::FromStr;

use anyhow::Result;

use mlxkit::artifact::{BitWidth, ExportFormat};
use mlxkit::store::ArtifactStore;

use crate::cmd;
use crate::readline::{Editor, COLOR_BOLD, COLOR_DEFAULT};

#[derive(Debug)]
enum Selection {
    Review,
    Download,
    Quantize,
    Export,
    Quit,
    Invalid,
}

/// Numbered menu loop. Operation failures are printed and the loop
/// goes back to the menu; `Exit` or end of input leaves it.
pub async fn run(store: &ArtifactStore) -> Result<()> {
    let mut editor = Editor::new();
    loop {
        let Some(selection) = select(&editor)? else {
            println!("\nExiting.");
            break;
        };
        match selection {
            Selection::Review => {
                let Some(model) = prompt_model(&mut editor, "review")? else {
                    continue;
                };
                if let Err(err) = cmd::review(store, &model) {
                    eprintln!("Error: {err:#}");
                }
            }
            Selection::Download => {
                let Some(model) = prompt_model(&mut editor, "download")? else {
                    continue;
                };
                if let Err(err) = cmd::download(store, &model).await {
                    eprintln!("Error: {err:#}");
                }
            }
            Selection::Quantize => {
                let Some(model) = prompt_model(&mut editor, "quantize")? else {
                    continue;
                };
                let Some(bits) = prompt_bits(&editor)? else {
                    continue;
                };
                if let Err(err) = cmd::quantize(store, &model, bits).await {
                    eprintln!("Error: {err:#}");
                }
            }
            Selection::Export => {
                let Some(model) = prompt_model(&mut editor, "export")? else {
                    continue;
                };
                let Some(format) = prompt_format(&editor)? else {
                    continue;
                };
                let Some(source_bits) = prompt_source_bits(&editor)? else {
                    continue;
                };
                if let Err(err) = cmd::export(store, &model, format, source_bits).await {
                    eprintln!("Error: {err:#}");
                }
            }
            Selection::Quit => {
                println!("Exiting.");
                break;
            }
            Selection::Invalid => {
                println!("Invalid choice. Please select a valid option.");
            }
        }
    }
    Ok(())
}

fn select(editor: &Editor) -> Result<Option<Selection>> {
    println!("\n{COLOR_BOLD}mlxkit interactive menu{COLOR_DEFAULT}");
    println!("1. Review a model");
    println!("2. Download a model");
    println!("3. Quantize a model");
    println!("4. Export a model");
    println!("5. Exit");

    let Some(choice) = editor.readline("Select an option (1-5): ")? else {
        return Ok(None);
    };
    Ok(Some(match choice.as_str() {
        "1" => Selection::Review,
        "2" => Selection::Download,
        "3" => Selection::Quantize,
        "4" => Selection::Export,
        "5" => Selection::Quit,
        _ => Selection::Invalid,
    }))
}

fn prompt_model(editor: &mut Editor, action: &str) -> Result<Option<String>> {
    let prompt = match editor.last() {
        Some(prev) => format!(
            "Enter the model name to {action} (e.g. mlx-community/Meta-Llama-3-8B) [{prev}]: "
        ),
        None => format!("Enter the model name to {action} (e.g. mlx-community/Meta-Llama-3-8B): "),
    };
    let Some(input) = editor.readline(&prompt)? else {
        return Ok(None);
    };
    let model = if input.is_empty() {
        editor.last().map(str::to_string)
    } else {
        Some(input)
    };
    match model {
        Some(model) => {
            editor.add_history(&model);
            Ok(Some(model))
        }
        None => {
            println!("Model name must not be empty.");
            Ok(None)
        }
    }
}

fn prompt_bits(editor: &Editor) -> Result<Option<BitWidth>> {
    let Some(input) = editor.readline("Quantization bit-width (4 or 8): ")? else {
        return Ok(None);
    };
    match BitWidth::from_str(&input) {
        Ok(bits) => Ok(Some(bits)),
        Err(err) => {
            println!("{err}");
            Ok(None)
        }
    }
}

fn prompt_format(editor: &Editor) -> Result<Option<ExportFormat>> {
    let Some(input) = editor.readline("Export format (onnx or gguf): ")? else {
        return Ok(None);
    };
    match ExportFormat::from_str(&input) {
        Ok(format) => Ok(Some(format)),
        Err(err) => {
            println!("{err}");
            Ok(None)
        }
    }
}

/// `Ok(Some(None))` means export the original checkpoint.
fn prompt_source_bits(editor: &Editor) -> Result<Option<Option<BitWidth>>> {
    let Some(input) =
        editor.readline("Source bit-width (4/8, leave empty to export the original): ")?
    else {
        return Ok(None);
    };
    if input.is_empty() {
        return Ok(Some(None));
    }
    match BitWidth::from_str(&input) {
        Ok(bits) => Ok(Some(Some(bits))),
        Err(err) => {
            println!("{err}");
            Ok(None)
        }
    }
}
