//! Tracing configuration for structured logging
//!
//! The library only emits events. Binaries build a subscriber with
//! [`TracingConfig`] and install it once at startup; tests install scoped
//! subscribers of their own.

#[cfg(feature = "cli")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Configuration for tracing output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TracingFormat {
    /// Human-readable console output with colors (default for CLI)
    Console,
    /// Compact console output without colors for CI environments
    Compact,
    /// JSON structured logging
    #[cfg(feature = "tracing-json")]
    Json,
}

/// Tracing configuration builder
#[derive(Debug)]
pub struct TracingConfig {
    /// Verbosity level for this crate's events
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Environment filter string (overrides `RUST_LOG` and verbosity if set)
    pub env_filter: Option<String>,
    /// Session ID logged once at startup for correlation
    pub session_id: Option<String>,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            verbosity: 0,
            format: TracingFormat::Console,
            env_filter: None,
            session_id: None,
        }
    }
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity level (0-3+)
    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Filter directives for the configured verbosity
    ///
    /// Dependencies (burn, reqwest, hyper) stay at `warn` until `-vvv`.
    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "warn,snapclass=info",
            1 => "warn,snapclass=debug",
            2 => "warn,snapclass=trace",
            _ => "trace",
        }
    }

    /// Filter directives to install: explicit filter, then `RUST_LOG`, then verbosity
    #[must_use]
    pub fn resolve_filter(&self, rust_log: Option<&str>) -> String {
        self.env_filter
            .as_deref()
            .or(rust_log.filter(|directives| !directives.trim().is_empty()))
            .unwrap_or_else(|| self.verbosity_to_filter())
            .to_string()
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directives
    /// - A global subscriber is already installed
    #[cfg(feature = "cli")]
    pub fn init(self) -> anyhow::Result<()> {
        use tracing_subscriber::fmt;

        let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        let filter = EnvFilter::try_new(self.resolve_filter(rust_log.as_deref()))?;
        let registry = Registry::default().with(filter);

        match self.format {
            TracingFormat::Console => {
                let fmt_layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(fmt_layer).try_init()?;
            },
            TracingFormat::Compact => {
                let fmt_layer = fmt::layer().with_ansi(false).with_target(false).compact();
                registry.with(fmt_layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let fmt_layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true);
                registry.with(fmt_layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::debug!(session_id = %session_id, "Session started");
        }

        Ok(())
    }
}

/// Initialize tracing with CLI-friendly defaults and a fresh session id
///
/// # Errors
/// See [`TracingConfig::init`].
#[cfg(feature = "cli")]
pub fn init_cli_tracing(
    verbosity: u8,
    format: TracingFormat,
    env_filter: Option<&str>,
) -> anyhow::Result<()> {
    let mut config = TracingConfig::new()
        .with_verbosity(verbosity)
        .with_format(format)
        .with_session_id(uuid::Uuid::new_v4().to_string());
    if let Some(filter) = env_filter {
        config = config.with_env_filter(filter);
    }
    config.init()
}

/// Span helpers for the pipeline stages
pub mod spans {
    use tracing::{Level, Span};

    /// Span covering one whole pipeline run
    pub fn pipeline_run(epochs: usize, force_train: bool) -> Span {
        tracing::span!(Level::INFO, "pipeline", epochs = %epochs, force_train = %force_train)
    }

    /// Span covering the preparation of one class
    pub fn class_preparation(label: &str) -> Span {
        tracing::span!(Level::INFO, "class", label = %label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_mapping() {
        assert_eq!(TracingConfig::new().with_verbosity(0).verbosity_to_filter(), "warn,snapclass=info");
        assert_eq!(TracingConfig::new().with_verbosity(1).verbosity_to_filter(), "warn,snapclass=debug");
        assert_eq!(TracingConfig::new().with_verbosity(2).verbosity_to_filter(), "warn,snapclass=trace");
        assert_eq!(TracingConfig::new().with_verbosity(9).verbosity_to_filter(), "trace");
    }

    #[test]
    fn test_config_builder() {
        let config = TracingConfig::new()
            .with_verbosity(2)
            .with_format(TracingFormat::Compact)
            .with_env_filter("snapclass=trace")
            .with_session_id("test-session");

        assert_eq!(config.verbosity, 2);
        assert_eq!(config.format, TracingFormat::Compact);
        assert_eq!(config.env_filter.as_deref(), Some("snapclass=trace"));
        assert_eq!(config.session_id.as_deref(), Some("test-session"));
    }

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.verbosity, 0);
        assert_eq!(config.format, TracingFormat::Console);
        assert!(config.env_filter.is_none());
        assert!(config.session_id.is_none());
    }

    #[test]
    fn test_filter_precedence() {
        let config = TracingConfig::new().with_verbosity(1);
        assert_eq!(config.resolve_filter(None), "warn,snapclass=debug");
        assert_eq!(config.resolve_filter(Some("  ")), "warn,snapclass=debug");
        assert_eq!(config.resolve_filter(Some("snapclass=trace")), "snapclass=trace");

        let config = config.with_env_filter("burn=info");
        assert_eq!(config.resolve_filter(Some("snapclass=trace")), "burn=info");
    }

    #[test]
    fn test_spans_are_constructible() {
        let _ = spans::pipeline_run(3, false);
        let _ = spans::class_preparation("bird");
    }
}
