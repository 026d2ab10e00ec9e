mod cmd;
mod format;
mod progress;
mod readline;
mod tui;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use mlxkit::artifact::{BitWidth, ExportFormat};
use mlxkit::config::StoreConfig;
use mlxkit::provider::mlx::MlxLmProvider;
use mlxkit::provider::ModelProvider;
use mlxkit::store::ArtifactStore;

#[derive(Parser)]
#[command(name = "mlxkit")]
#[command(version)]
#[command(about = "Review, download, quantize and export local LLM checkpoints", long_about = None)]
struct Cli {
    /// Root directory for the models tree (defaults to the install directory)
    #[arg(long, value_name = "DIR", global = true)]
    models_dir: Option<PathBuf>,

    /// Deadline in seconds for a single provider call
    #[arg(long, value_name = "SECS", default_value_t = 600, global = true)]
    timeout: u64,

    /// Without a subcommand the interactive menu starts
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which artifacts exist locally for a model
    Review {
        #[arg(long)]
        model: String,
    },
    /// Fetch a model through the provider and store its original checkpoint
    Download {
        #[arg(long)]
        model: String,
    },
    /// Produce a reduced-precision checkpoint from a downloaded model
    Quantize {
        #[arg(long)]
        model: String,
        #[arg(long, value_enum)]
        bits: BitsArg,
    },
    /// Convert a stored checkpoint to a target serialization format
    Export {
        #[arg(long)]
        model: String,
        #[arg(long, value_enum)]
        format: FormatArg,
        /// Export the quantized checkpoint of this precision instead of the original
        #[arg(long, value_enum)]
        bits: Option<BitsArg>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BitsArg {
    #[value(name = "4")]
    Four,
    #[value(name = "8")]
    Eight,
}

impl From<BitsArg> for BitWidth {
    fn from(value: BitsArg) -> Self {
        match value {
            BitsArg::Four => BitWidth::Four,
            BitsArg::Eight => BitWidth::Eight,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Onnx,
    Gguf,
}

impl From<FormatArg> for ExportFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Onnx => ExportFormat::Onnx,
            FormatArg::Gguf => ExportFormat::Gguf,
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let config = match cli.models_dir {
        Some(root) => StoreConfig::at_root(root),
        None => StoreConfig::install_relative(),
    }
    .provider_deadline(Duration::from_secs(cli.timeout));

    let provider = Arc::new(MlxLmProvider::new());
    if let Err(err) = provider.check_available() {
        eprintln!("{err}");
        process::exit(1);
    }

    let store = match ArtifactStore::new(&config, provider) {
        Ok(store) => store,
        Err(err) => {
            eprintln!("failed to prepare the models directory: {err}");
            process::exit(1);
        }
    };

    let result = match cli.command {
        Some(Commands::Review { model }) => cmd::review(&store, &model),
        Some(Commands::Download { model }) => cmd::download(&store, &model).await,
        Some(Commands::Quantize { model, bits }) => {
            cmd::quantize(&store, &model, bits.into()).await
        }
        Some(Commands::Export { model, format, bits }) => {
            cmd::export(&store, &model, format.into(), bits.map(Into::into)).await
        }
        None => tui::run(&store).await,
    };

    // Operation failures are reported; only the startup dependency
    // check above changes the exit status.
    if let Err(err) = result {
        eprintln!("Error: {err:#}");
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
