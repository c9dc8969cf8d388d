//! snapclass CLI
//!
//! Downloads a labeled dataset, fine-tunes a classifier and predicts the class of
//! sample images or of a single image given by URL.

use super::config::CliConfigBuilder;
use crate::backends::BurnLibrary;
use crate::download::{HttpDownloader, ImageFetcher};
use crate::pipeline::{training_scratch_dir, Pipeline, PipelineOutcome};
use crate::search::DuckDuckGoSearch;
use crate::tracing_config::init_cli_tracing;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

/// Image classification pipeline: search, download, clean, fine-tune, predict
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "snapclass")]
pub struct Cli {
    /// Classify this image instead of the staged sample images
    #[arg(long, value_name = "URL")]
    pub img_url: Option<String>,

    /// Retrain even when a model artifact already exists
    #[arg(long)]
    pub train: bool,

    /// Number of fine-tuning epochs
    #[arg(long, default_value_t = 3)]
    pub epochs: usize,

    /// JSON pipeline configuration file
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Dataset root directory [default: bird_or_not]
    #[arg(long, value_name = "DIR")]
    pub dataset_root: Option<PathBuf>,

    /// Model artifact path [default: models/classifier.tar.gz]
    #[arg(long, value_name = "FILE")]
    pub model_path: Option<PathBuf>,

    /// Search results requested per class [default: 30]
    #[arg(long)]
    pub images_per_class: Option<usize>,

    /// Artifact whose backbone warm-starts training
    #[arg(long, value_name = "FILE")]
    pub base_model: Option<PathBuf>,

    /// Enable verbose logging (-v: DEBUG, -vv: TRACE, -vvv: TRACE for dependencies too)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Compact log output without colors
    #[arg(long)]
    pub compact: bool,

    /// JSON log output
    #[cfg(feature = "tracing-json")]
    #[arg(long, conflicts_with = "compact")]
    pub json: bool,

    /// Log filter directives, e.g. "snapclass=debug,burn=info" [default: RUST_LOG, then -v]
    #[arg(long, value_name = "DIRECTIVES")]
    pub log_filter: Option<String>,
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_cli_tracing(
        cli.verbose,
        CliConfigBuilder::tracing_format(&cli),
        cli.log_filter.as_deref(),
    )
    .context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::from_cli(&cli)?;
    let options = CliConfigBuilder::run_options(&cli)?;

    tracing::info!("Classes: {}", config.classes.join(", "));
    tracing::debug!(?config, "Resolved configuration");

    let search = DuckDuckGoSearch::new().context("Failed to create search client")?;
    let downloader = HttpDownloader::new()
        .context("Failed to create downloader")?
        .with_progress(true);
    let fetcher = ImageFetcher::new(search, downloader);
    let library = BurnLibrary::new(
        config.training.clone(),
        training_scratch_dir(&config.model_path),
    );

    let start_time = Instant::now();
    let outcome = Pipeline::new(config, fetcher, library).run(&options).await;
    print_outcome(&outcome);
    tracing::info!("Finished in {:.2}s", start_time.elapsed().as_secs_f64());

    // Stage failures were logged by the driver; they do not change the exit code
    Ok(())
}

fn print_outcome(outcome: &PipelineOutcome) {
    match outcome {
        PipelineOutcome::Completed {
            training,
            predictions,
        } => {
            if let Some(report) = training {
                match report.error_rate {
                    Some(rate) => println!(
                        "Trained {} epochs on {} images, validation error rate {:.1}%",
                        report.epochs,
                        report.train_items,
                        rate * 100.0
                    ),
                    None => println!(
                        "Trained {} epochs on {} images",
                        report.epochs, report.train_items
                    ),
                }
            }
            for (path, prediction) in predictions {
                println!("{}: {}", path.display(), prediction);
            }
        },
        PipelineOutcome::Aborted { stage, error } => {
            eprintln!("{stage} failed: {error}");
        },
    }
}
