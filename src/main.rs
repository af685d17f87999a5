//! chart-retouch - Seamless text replacement for chart screenshots
//!
//! CLI front end: takes an input image and a JSON file of
//! (original, translated) text pairs, runs the edit pipeline, and writes the
//! edited image.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use chart_retouch::{
    load_config, EngineConfig, EngineStatus, FallbackChain, FontStore, LumaRegionDetector,
    SeamlessEditEngine, SourceImage, StaticProvider, TextExtraction,
};

/// Replace text on chart screenshots without visible editing traces
#[derive(Parser, Debug)]
#[command(name = "chart-retouch")]
#[command(about = "Deterministic seamless text replacement for chart screenshots")]
struct Args {
    /// Input image (PNG or JPEG)
    #[arg(short, long)]
    input: PathBuf,

    /// JSON file with the text pairs to apply:
    /// [{"original": "...", "translated": "...", "confidence": 0.9,
    ///   "bbox": {"x1": 0, "y1": 0, "x2": 10, "y2": 10}}, ...]
    #[arg(short, long)]
    translations: PathBuf,

    /// Output image path; format inferred from the extension
    #[arg(short, long)]
    output: PathBuf,

    /// Optional TOML config overriding the built-in defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = match &args.config {
        Some(path) => load_config(path).with_context(|| format!("loading config {path:?}"))?,
        None => EngineConfig::default(),
    };

    let pairs: Vec<TextExtraction> = {
        let content = std::fs::read_to_string(&args.translations)
            .with_context(|| format!("reading translations {:?}", args.translations))?;
        serde_json::from_str(&content).context("parsing translations JSON")?
    };
    info!(pairs = pairs.len(), "translations loaded");

    let source = SourceImage::open(&args.input)
        .with_context(|| format!("loading image {:?}", args.input))?;
    info!(
        width = source.width(),
        height = source.height(),
        quality = source.quality(),
        "image loaded"
    );

    let chain = FallbackChain::new(
        vec![Arc::new(StaticProvider::new("cli", pairs))],
        &config.provider,
    );
    let engine = SeamlessEditEngine::new(
        chain,
        Box::new(LumaRegionDetector::default()),
        FontStore::load()?,
        config,
    );

    let result = engine.edit(&source).await?;
    for outcome in &result.outcomes {
        info!(
            original = %outcome.original,
            translated = %outcome.translated,
            status = ?outcome.status,
            "text pair processed"
        );
    }

    if result.status != EngineStatus::Edited {
        info!(status = ?result.status, "nothing edited, writing image unchanged");
    }

    result
        .image
        .save(&args.output)
        .with_context(|| format!("writing output {:?}", args.output))?;
    info!(output = ?args.output, "done");

    Ok(())
}
