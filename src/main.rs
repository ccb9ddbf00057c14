use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;

use coast_seg_rs::{Config, Segmenter};

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = Config::parse();
    let settings = config.validate().context("Invalid configuration")?;

    log::info!(
        "{} class(es), {} input channel(s), network input {}x{}",
        settings.nclasses,
        settings.input.expected_channels(),
        settings.target.rows,
        settings.target.cols
    );
    let segmenter = Segmenter::with_onnx_model(settings).context("Failed to load model")?;
    log::info!("Loaded {}", segmenter.settings().model_path.display());

    let summary = segmenter.process_directory()?;
    log::info!(
        "{} processed, {} skipped, {} failed",
        summary.processed,
        summary.skipped,
        summary.failed
    );

    Ok(())
}
