#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]

//! # snapclass
//!
//! Build a small labeled image dataset from web image search, clean it, fine-tune
//! an image classifier on it and classify new images.
//!
//! ## Pipeline
//!
//! 1. Check internet connectivity with a short TCP probe
//! 2. Stage one sample image per class (or download a single target image by URL)
//! 3. Reuse a saved model artifact, or build the dataset and train a new one:
//!    search and download images per class, resize them, delete undecodable
//!    files, split into train/validation sets and fine-tune
//! 4. Predict each target image; results under 50% confidence are reported as unknown
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use snapclass::{
//!     backends::BurnLibrary, pipeline::training_scratch_dir, DuckDuckGoSearch,
//!     HttpDownloader, ImageFetcher, Pipeline, PipelineConfig, RunOptions,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::builder()
//!     .classes(["bird", "forest"])
//!     .images_per_class(20)
//!     .build()?;
//!
//! let fetcher = ImageFetcher::new(DuckDuckGoSearch::new()?, HttpDownloader::new()?);
//! let library = BurnLibrary::new(config.training.clone(), training_scratch_dir(&config.model_path));
//!
//! let outcome = Pipeline::new(config, fetcher, library)
//!     .run(&RunOptions::default())
//!     .await;
//! println!("completed: {}", outcome.is_completed());
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `burn-backend` (default): CNN training and inference with `burn` on the CPU
//! - `cli` (default): command-line interface, progress bars and log subscriber setup
//! - `tracing-json`: JSON log output for the CLI
//!
//! The search, download and model seams are traits ([`ImageSearch`], [`Downloader`],
//! [`VisionLibrary`]) so every stage can run against in-memory stand-ins.

pub mod artifact;
pub mod backends;
#[cfg(all(feature = "cli", feature = "burn-backend"))]
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod dataset;
pub mod download;
pub mod error;
pub mod library;
pub mod pipeline;
pub mod predictor;
pub mod preprocessing;
pub mod search;
pub mod trainer;
pub mod tracing_config;

#[cfg(test)]
mod test_support;

// Public API exports
pub use artifact::ArtifactMetadata;
#[cfg(feature = "burn-backend")]
pub use backends::{BurnLibrary, BurnModel};
pub use config::{PipelineConfig, PipelineConfigBuilder, TrainingOptions};
pub use connectivity::check_internet;
pub use dataset::{DataItem, DataSplit, DatasetBuilder, DatasetReport};
pub use download::{Downloader, HttpDownloader, ImageFetcher, RetryPolicy};
pub use error::{PipelineError, Result};
pub use library::{ClassifierModel, VisionLibrary};
pub use pipeline::{Pipeline, PipelineOutcome, RunOptions, Stage};
pub use predictor::{Prediction, Predictor, CONFIDENCE_THRESHOLD};
pub use preprocessing::{PreprocessingConfig, ResizeMethod};
pub use search::{DuckDuckGoSearch, ImageSearch};
pub use trainer::{Trainer, TrainerState, TrainingReport};
#[cfg(feature = "cli")]
pub use tracing_config::init_cli_tracing;
pub use tracing_config::{spans, TracingConfig, TracingFormat};
