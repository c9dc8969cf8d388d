//! Configuration types for dataset preparation, training and prediction

use crate::error::{PipelineError, Result};
use crate::preprocessing::{PreprocessingConfig, ResizeMethod};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Knobs handed to the vision library when fine-tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    /// Square input size images are brought to before entering the network
    pub image_size: u32,

    /// How images are brought to `image_size`
    pub resize_method: ResizeMethod,

    /// Mini-batch size
    pub batch_size: usize,

    /// Optimizer learning rate
    pub learning_rate: f64,

    /// Dataloader shuffle seed
    pub seed: u64,

    /// Artifact whose backbone warm-starts training (frozen); `None` trains from scratch
    pub base_model: Option<PathBuf>,
}

impl TrainingOptions {
    /// Transform every image goes through before reaching the network
    #[must_use]
    pub fn preprocessing(&self) -> PreprocessingConfig {
        PreprocessingConfig::new(self.image_size, self.resize_method)
    }
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            image_size: 192,
            resize_method: ResizeMethod::Squish,
            batch_size: 32,
            learning_rate: 2e-3,
            seed: 42,
            base_model: None,
        }
    }
}

/// Configuration for a full pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Class labels; each one becomes a subdirectory of `dataset_root`
    pub classes: Vec<String>,

    /// Root directory of the downloaded dataset
    pub dataset_root: PathBuf,

    /// Number of candidate URLs requested per class
    pub images_per_class: usize,

    /// Longest side of every dataset image after preparation
    pub resize_to: u32,

    /// Pause between per-class batches, in seconds
    pub throttle_secs: u64,

    /// Path of the single-file model artifact
    pub model_path: PathBuf,

    /// Directory holding the named sample images used for smoke-testing predictions
    pub staging_dir: PathBuf,

    /// Fraction of the dataset held out for validation
    pub validation_fraction: f64,

    /// Seed of the train/validation split
    pub split_seed: u64,

    /// Host:port probed by the connectivity check
    pub probe_addr: String,

    /// Connectivity probe timeout, in milliseconds
    pub probe_timeout_ms: u64,

    /// Options forwarded to the vision library
    pub training: TrainingOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            classes: vec!["bird".to_string(), "forest".to_string()],
            dataset_root: PathBuf::from("bird_or_not"),
            images_per_class: 30,
            resize_to: 400,
            throttle_secs: 5,
            model_path: PathBuf::from("models").join("classifier.tar.gz"),
            staging_dir: PathBuf::from("single_image"),
            validation_fraction: 0.2,
            split_seed: 42,
            probe_addr: "1.1.1.1:53".to_string(),
            probe_timeout_ms: 1000,
            training: TrainingOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a new configuration builder for fluent API construction
    ///
    /// # Examples
    ///
    /// ```rust
    /// use snapclass::PipelineConfig;
    ///
    /// let config = PipelineConfig::builder()
    ///     .classes(["cat", "dog"])
    ///     .images_per_class(10)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.classes, vec!["cat", "dog"]);
    /// ```
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Load a configuration from a JSON file; missing keys take their defaults
    ///
    /// # Errors
    /// - File cannot be read
    /// - File is not valid JSON for this structure
    /// - Loaded values fail validation
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&contents).map_err(|e| {
            PipelineError::invalid_config(format!("{}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Throttle delay between per-class batches
    #[must_use]
    pub fn throttle(&self) -> Duration {
        Duration::from_secs(self.throttle_secs)
    }

    /// Connectivity probe timeout
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Validate all configuration parameters
    ///
    /// # Validation Rules
    ///
    /// - Class labels: at least one, each non-empty and unique
    /// - Images per class: at least 1
    /// - Resize target and training image size: at least 1
    /// - Validation fraction: strictly between 0 and 1
    /// - Batch size: at least 1
    ///
    /// # Errors
    /// Returns `InvalidConfig` describing the first rule that is violated.
    pub fn validate(&self) -> Result<()> {
        if self.classes.is_empty() {
            return Err(PipelineError::invalid_config(
                "at least one class label is required",
            ));
        }

        let mut seen = HashSet::new();
        for label in &self.classes {
            if label.trim().is_empty() {
                return Err(PipelineError::invalid_config("class labels must be non-empty"));
            }
            if label.contains(['/', '\\']) {
                return Err(PipelineError::invalid_config(format!(
                    "class label '{label}' cannot contain path separators"
                )));
            }
            if !seen.insert(label.as_str()) {
                return Err(PipelineError::invalid_config(format!(
                    "duplicate class label '{label}'"
                )));
            }
        }

        if self.images_per_class == 0 {
            return Err(PipelineError::config_value_error(
                "images per class",
                self.images_per_class,
                ">= 1",
            ));
        }

        if self.resize_to == 0 {
            return Err(PipelineError::config_value_error("resize target", 0, ">= 1"));
        }

        if !(self.validation_fraction > 0.0 && self.validation_fraction < 1.0) {
            return Err(PipelineError::config_value_error(
                "validation fraction",
                self.validation_fraction,
                "(0, 1)",
            ));
        }

        if self.training.image_size == 0 {
            return Err(PipelineError::config_value_error("training image size", 0, ">= 1"));
        }

        if self.training.batch_size == 0 {
            return Err(PipelineError::config_value_error("batch size", 0, ">= 1"));
        }

        Ok(())
    }
}

/// Builder for `PipelineConfig`
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    #[must_use]
    pub fn classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.classes = classes.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn dataset_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.config.dataset_root = root.into();
        self
    }

    #[must_use]
    pub fn images_per_class(mut self, count: usize) -> Self {
        self.config.images_per_class = count;
        self
    }

    #[must_use]
    pub fn resize_to(mut self, dim: u32) -> Self {
        self.config.resize_to = dim;
        self
    }

    #[must_use]
    pub fn throttle_secs(mut self, secs: u64) -> Self {
        self.config.throttle_secs = secs;
        self
    }

    #[must_use]
    pub fn model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.model_path = path.into();
        self
    }

    #[must_use]
    pub fn staging_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.staging_dir = dir.into();
        self
    }

    #[must_use]
    pub fn validation_fraction(mut self, fraction: f64) -> Self {
        self.config.validation_fraction = fraction;
        self
    }

    #[must_use]
    pub fn split_seed(mut self, seed: u64) -> Self {
        self.config.split_seed = seed;
        self
    }

    #[must_use]
    pub fn probe_addr<S: Into<String>>(mut self, addr: S) -> Self {
        self.config.probe_addr = addr.into();
        self
    }

    #[must_use]
    pub fn probe_timeout_ms(mut self, millis: u64) -> Self {
        self.config.probe_timeout_ms = millis;
        self
    }

    #[must_use]
    pub fn training(mut self, options: TrainingOptions) -> Self {
        self.config.training = options;
        self
    }

    /// Build and validate the configuration
    ///
    /// # Errors
    /// See [`PipelineConfig::validate`].
    pub fn build(self) -> Result<PipelineConfig> {
        let config = self.config;
        config.validate()?;
        Ok(config)
    }
}
