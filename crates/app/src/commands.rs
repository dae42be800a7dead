use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use phonescan_core::ScanConfig;
use phonescan_ocr::pipeline::spawn_intake_watcher;
use phonescan_ocr::{Extractor, OcrBackend, PipelineError, ScanPipeline, ScanSource};
use tokio::sync::mpsc;

use crate::project::{self, OutputFormat};

pub type Pipeline = ScanPipeline<Box<dyn OcrBackend>>;

/// Run one image through the pipeline and print what was found.
pub async fn scan(
    pipeline: &Pipeline,
    image: &Path,
    source: ScanSource,
    format: OutputFormat,
) -> Result<()> {
    tracing::info!("Scanning {} ({source})", image.display());
    let result = pipeline
        .process_file(image, source)
        .await
        .with_context(|| format!("Failed to process {}", image.display()))?;
    println!("{}", project::render_result(&result, format)?);
    Ok(())
}

/// Run the extractor alone over text from `file`, or stdin when absent.
pub fn extract(config: &ScanConfig, file: Option<&Path>, format: OutputFormat) -> Result<()> {
    let text = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf).context("Failed to read stdin")?;
            buf
        }
    };
    let numbers = Extractor::new(config.extract.clone()).extract(&text);
    println!("{}", project::render_numbers(&numbers, format)?);
    Ok(())
}

/// Write the image the recognizer would be given, for eyeballing.
pub fn preview(config: &ScanConfig, image: &Path, out: &Path, source: ScanSource) -> Result<()> {
    let png = phonescan_ocr::prepare_for_ocr(image, source, config.preprocess.max_upload_dimension)
        .with_context(|| format!("Failed to normalize {}", image.display()))?;
    std::fs::write(out, &png).with_context(|| format!("Failed to write {}", out.display()))?;
    tracing::info!("Wrote {} ({} bytes)", out.display(), png.len());
    Ok(())
}

/// Process every image dropped into `dir`, one at a time, until Ctrl-C.
pub async fn watch(pipeline: &Pipeline, dir: &Path, format: OutputFormat) -> Result<()> {
    // The channel bridges the notify watcher thread and the async processor.
    let (tx, mut rx) = mpsc::channel::<PathBuf>(64);
    let _watcher = spawn_intake_watcher(dir, tx)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;
    tracing::info!("Watching intake folder: {}", dir.display());

    loop {
        tokio::select! {
            next = rx.recv() => {
                let Some(path) = next else { break };
                match pipeline.process_file(&path, ScanSource::Upload).await {
                    Ok(result) => {
                        println!("# {}", path.display());
                        println!("{}", project::render_result(&result, format)?);
                    }
                    Err(PipelineError::Busy) => {
                        tracing::warn!("Pipeline busy, skipped {}", path.display());
                    }
                    Err(e) => {
                        tracing::warn!("Scan failed for {}: {e}", path.display());
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Stopping watcher");
                break;
            }
        }
    }
    Ok(())
}
