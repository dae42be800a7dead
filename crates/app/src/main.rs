use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phonescan_core::ScanConfig;
use phonescan_ocr::{MockRecognizer, OcrBackend, ScanPipeline, ScanSource};

mod commands;
mod project;

use project::OutputFormat;

#[derive(Parser)]
#[command(name = "phonescan")]
#[command(about = "Find phone numbers in photos of business cards, signs and flyers")]
#[command(version)]
struct Cli {
    /// Config file (TOML). Defaults to config.toml in the user config directory.
    #[arg(long, global = true, env = "PHONESCAN_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Skip the OCR engine and treat this as the recognized text
    #[arg(long, global = true)]
    mock_text: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a camera still: only the centered guide box is read
    Capture { image: PathBuf },
    /// Scan an uploaded photo: the whole frame is read
    Upload { image: PathBuf },
    /// Pull numbers out of already-recognized text (file, or stdin)
    Extract { file: Option<PathBuf> },
    /// Write the normalized image the OCR engine would see
    Preview {
        image: PathBuf,
        out: PathBuf,
        /// Use the upload path instead of the capture crop
        #[arg(long)]
        upload: bool,
    },
    /// Scan every image dropped into a folder
    Watch { dir: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout stays clean for results.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.clone())?;
    let format = if cli.json { OutputFormat::Json } else { OutputFormat::Text };

    match cli.command {
        Commands::Capture { ref image } => {
            let pipeline = build_pipeline(&cli, config);
            commands::scan(&pipeline, image, ScanSource::Capture, format).await?;
        }
        Commands::Upload { ref image } => {
            let pipeline = build_pipeline(&cli, config);
            commands::scan(&pipeline, image, ScanSource::Upload, format).await?;
        }
        Commands::Extract { ref file } => {
            commands::extract(&config, file.as_deref(), format)?;
        }
        Commands::Preview { ref image, ref out, upload } => {
            let source = if upload { ScanSource::Upload } else { ScanSource::Capture };
            commands::preview(&config, image, out, source)?;
        }
        Commands::Watch { ref dir } => {
            let pipeline = build_pipeline(&cli, config);
            commands::watch(&pipeline, dir, format).await?;
        }
    }

    Ok(())
}

fn load_config(explicit: Option<PathBuf>) -> Result<ScanConfig> {
    let path = explicit.or_else(|| {
        directories::ProjectDirs::from("com", "phonescan", "Phonescan")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    });
    match path {
        Some(path) => {
            tracing::debug!("Loading config from {}", path.display());
            ScanConfig::load(&path)
                .with_context(|| format!("Failed to load config {}", path.display()))
        }
        None => Ok(ScanConfig::default()),
    }
}

fn build_pipeline(cli: &Cli, config: ScanConfig) -> commands::Pipeline {
    let backend: Box<dyn OcrBackend> = match &cli.mock_text {
        Some(text) => Box::new(MockRecognizer::new(text.clone())),
        None => phonescan_ocr::default_backend(&config.recognizer),
    };
    ScanPipeline::new(backend, config)
}
