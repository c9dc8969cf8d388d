//! End-to-end driver: connectivity, samples, dataset, training, prediction
//!
//! The driver is the only top-level error boundary. A failing stage is logged
//! and ends the run; nothing is propagated to the caller.

use crate::config::PipelineConfig;
use crate::connectivity::check_internet;
use crate::dataset::{remove_unreadable, DatasetBuilder};
use crate::download::{Downloader, ImageFetcher};
use crate::error::{PipelineError, Result};
use crate::library::VisionLibrary;
use crate::predictor::{Prediction, Predictor};
use crate::search::ImageSearch;
use crate::trainer::{Trainer, TrainingReport};
use crate::tracing_config::spans;
use std::fmt;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::Instrument;

/// Name of the learner's scratch directory next to the model artifact
pub const TRAINING_SCRATCH_DIR: &str = "training";

/// Pipeline stage, used to report where a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connectivity,
    SampleImages,
    LoadModel,
    DatasetPreparation,
    Sanitize,
    Training,
    SaveModel,
    Prediction,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connectivity => "Internet check",
            Self::SampleImages => "Downloading sample images",
            Self::LoadModel => "Loading model",
            Self::DatasetPreparation => "Dataset preparation",
            Self::Sanitize => "Dataset sanitizing",
            Self::Training => "Training",
            Self::SaveModel => "Saving model",
            Self::Prediction => "Prediction",
        };
        f.write_str(name)
    }
}

/// Per-run switches, usually from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Classify this remote image instead of the staged samples
    pub img_url: Option<String>,
    /// Retrain even if a model artifact exists
    pub force_train: bool,
    pub epochs: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            img_url: None,
            force_train: false,
            epochs: 3,
        }
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed {
        /// Present when this run trained a model rather than loading one
        training: Option<TrainingReport>,
        predictions: Vec<(PathBuf, Prediction)>,
    },
    Aborted {
        stage: Stage,
        error: String,
    },
}

impl PipelineOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

type StageResult<T> = std::result::Result<T, (Stage, PipelineError)>;

fn at<T>(stage: Stage, result: Result<T>) -> StageResult<T> {
    result.map_err(|e| (stage, e))
}

/// Learner scratch directory for an artifact path
#[must_use]
pub fn training_scratch_dir(model_path: &Path) -> PathBuf {
    model_dir(model_path).join(TRAINING_SCRATCH_DIR)
}

fn model_dir(model_path: &Path) -> &Path {
    match model_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Sequences every stage of a run
pub struct Pipeline<S, D, L> {
    config: PipelineConfig,
    fetcher: ImageFetcher<S, D>,
    library: L,
}

impl<S: ImageSearch, D: Downloader, L: VisionLibrary> Pipeline<S, D, L> {
    pub fn new(config: PipelineConfig, fetcher: ImageFetcher<S, D>, library: L) -> Self {
        Self {
            config,
            fetcher,
            library,
        }
    }

    /// Run every stage, stopping at the first failure
    ///
    /// A temporary image downloaded for `img_url` is removed whatever the outcome.
    pub async fn run(self, options: &RunOptions) -> PipelineOutcome {
        let mut temp_image = None;
        let span = spans::pipeline_run(options.epochs, options.force_train);
        let result = self.run_stages(options, &mut temp_image).instrument(span).await;

        if let Some(temp) = temp_image {
            let path = temp.to_path_buf();
            if let Err(e) = temp.close() {
                tracing::warn!("Failed to remove temporary image {}: {}", path.display(), e);
            }
        }

        match result {
            Ok(outcome) => {
                tracing::info!("All steps finished successfully.");
                outcome
            },
            Err((stage, error)) => {
                tracing::error!("{} failed: {}", stage, error);
                PipelineOutcome::Aborted {
                    stage,
                    error: error.to_string(),
                }
            },
        }
    }

    async fn run_stages(
        self,
        options: &RunOptions,
        temp_image: &mut Option<TempPath>,
    ) -> StageResult<PipelineOutcome> {
        let Self {
            config,
            fetcher,
            library,
        } = self;

        at(
            Stage::Connectivity,
            check_internet(&config.probe_addr, config.probe_timeout()).await,
        )?;

        let targets = match &options.img_url {
            Some(url) => {
                let temp = at(Stage::SampleImages, temp_target(&config.staging_dir))?;
                at(Stage::SampleImages, fetcher.fetch_one(url, &temp).await)?;
                let path = temp.to_path_buf();
                *temp_image = Some(temp);
                vec![path]
            },
            None => at(Stage::SampleImages, stage_samples(&config, &fetcher).await)?,
        };

        let mut trainer = Trainer::from_config(library, &config);
        let training = if config.model_path.is_file() && !options.force_train {
            tracing::info!("Using existing model {}", config.model_path.display());
            at(Stage::LoadModel, trainer.load_model(&config.model_path))?;
            None
        } else {
            let builder = DatasetBuilder::new(&fetcher).with_throttle(config.throttle());
            at(
                Stage::DatasetPreparation,
                builder
                    .prepare(
                        &config.classes,
                        &config.dataset_root,
                        config.images_per_class,
                        config.resize_to,
                    )
                    .await,
            )?;
            at(Stage::Sanitize, remove_unreadable(&config.dataset_root))?;

            at(Stage::Training, trainer.build_dataloaders())?;
            let report = at(Stage::Training, trainer.train(options.epochs))?;

            at(Stage::SaveModel, trainer.save_model(&config.model_path))?;
            remove_training_scratch(&config);
            Some(report)
        };

        let predictor = Predictor::new(&trainer);
        let mut predictions = Vec::with_capacity(targets.len());
        for target in targets {
            let prediction = at(Stage::Prediction, predictor.predict(&target))?;
            predictions.push((target, prediction));
        }

        Ok(PipelineOutcome::Completed {
            training,
            predictions,
        })
    }
}

/// Reserve a uniquely named file in the staging directory, deleted on drop
fn temp_target(staging_dir: &Path) -> Result<TempPath> {
    std::fs::create_dir_all(staging_dir)
        .map_err(|e| PipelineError::file_io_error("create directory", staging_dir, &e))?;
    let file = tempfile::Builder::new()
        .prefix("target-")
        .suffix(".jpg")
        .tempfile_in(staging_dir)
        .map_err(|e| PipelineError::file_io_error("create temporary image in", staging_dir, &e))?;
    Ok(file.into_temp_path())
}

/// Make sure `staging_dir/<label>.jpg` exists for every class
async fn stage_samples<S: ImageSearch, D: Downloader>(
    config: &PipelineConfig,
    fetcher: &ImageFetcher<S, D>,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(&config.staging_dir)
        .map_err(|e| PipelineError::file_io_error("create directory", &config.staging_dir, &e))?;

    let mut samples = Vec::with_capacity(config.classes.len());
    for label in &config.classes {
        let dest = config.staging_dir.join(format!("{label}.jpg"));
        if dest.is_file() {
            tracing::debug!("Sample image {} already present", dest.display());
        } else {
            fetcher.fetch_with_retry(&format!("{label} photos"), &dest).await?;
        }
        samples.push(dest);
    }
    Ok(samples)
}

/// Remove the learner scratch directory next to the artifact
///
/// Only the directory the learner writes to is removed; sibling directories
/// belong to the user.
fn remove_training_scratch(config: &PipelineConfig) {
    let path = training_scratch_dir(&config.model_path);
    if !path.is_dir() || config.dataset_root.starts_with(&path) {
        return;
    }
    match std::fs::remove_dir_all(&path) {
        Ok(()) => tracing::debug!("Removed training scratch directory {}", path.display()),
        Err(e) => tracing::warn!("Failed to remove {}: {}", path.display(), e),
    }
}
