//! Conversion of CLI arguments into pipeline configuration

use crate::cli::main_impl::Cli;
use crate::config::PipelineConfig;
use crate::pipeline::RunOptions;
use crate::tracing_config::TracingFormat;
use anyhow::{Context, Result};

/// Convert CLI arguments to a validated `PipelineConfig`
pub(crate) struct CliConfigBuilder;

impl CliConfigBuilder {
    /// Start from `--config` (or the defaults) and apply the command-line overrides
    pub(crate) fn from_cli(cli: &Cli) -> Result<PipelineConfig> {
        let mut config = match &cli.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(root) = &cli.dataset_root {
            config.dataset_root.clone_from(root);
        }
        if let Some(path) = &cli.model_path {
            config.model_path.clone_from(path);
        }
        if let Some(count) = cli.images_per_class {
            config.images_per_class = count;
        }
        if let Some(base) = &cli.base_model {
            config.training.base_model = Some(base.clone());
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Log output format selected by `--compact` / `--json`
    pub(crate) fn tracing_format(cli: &Cli) -> TracingFormat {
        #[cfg(feature = "tracing-json")]
        {
            if cli.json {
                return TracingFormat::Json;
            }
        }

        if cli.compact {
            TracingFormat::Compact
        } else {
            TracingFormat::Console
        }
    }

    /// Per-run switches
    pub(crate) fn run_options(cli: &Cli) -> Result<RunOptions> {
        if cli.epochs == 0 {
            anyhow::bail!("--epochs must be at least 1");
        }
        Ok(RunOptions {
            img_url: cli.img_url.clone(),
            force_train: cli.train,
            epochs: cli.epochs,
        })
    }
}
