//! Error types for the image pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Error taxonomy for every pipeline stage
///
/// Retry and abort decisions are made by the calling site, not by the variant:
/// only `ImageFetcher::fetch_with_retry` retries, only the dataset builder
/// tolerates per-class failures, and the pipeline driver aborts on anything else.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No outbound network connectivity
    #[error("{0}")]
    Connectivity(String),

    /// Image search provider call failed
    #[error("Search error: {0}")]
    Search(String),

    /// Fetching an image failed (after retries, or validation failed)
    #[error("Download error: {0}")]
    Download(String),

    /// Dataset is empty or cannot be split meaningfully
    #[error("Data error: {0}")]
    Data(String),

    /// Underlying training library failed
    #[error("Training error: {0}")]
    Training(String),

    /// Operation called in a state that does not allow it
    #[error("State error: {0}")]
    State(String),

    /// Model artifact is missing pieces or cannot be decoded
    #[error("Model error: {0}")]
    Model(String),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),
}

impl PipelineError {
    /// Create a connectivity error with the user-facing "no internet" message
    pub fn no_internet<S: std::fmt::Display>(cause: S) -> Self {
        Self::Connectivity(format!(
            "STOP: No internet. Please connect before running this pipeline ({cause})"
        ))
    }

    pub fn search<S: Into<String>>(msg: S) -> Self {
        Self::Search(msg.into())
    }

    pub fn download<S: Into<String>>(msg: S) -> Self {
        Self::Download(msg.into())
    }

    pub fn data<S: Into<String>>(msg: S) -> Self {
        Self::Data(msg.into())
    }

    pub fn training<S: Into<String>>(msg: S) -> Self {
        Self::Training(msg.into())
    }

    pub fn state<S: Into<String>>(msg: S) -> Self {
        Self::State(msg.into())
    }

    pub fn model<S: Into<String>>(msg: S) -> Self {
        Self::Model(msg.into())
    }

    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a download error wrapping the underlying cause
    pub fn download_error<E: std::fmt::Display>(context: &str, url: &str, error: E) -> Self {
        Self::Download(format!("{context} '{url}': {error}"))
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {operation} '{path_display}': {error}"),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
    ) -> Self {
        Self::InvalidConfig(format!(
            "Invalid {parameter}: {value} (valid range: {valid_range})"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_display() {
        let err = PipelineError::data("no images found");
        assert_eq!(err.to_string(), "Data error: no images found");

        let err = PipelineError::state("no model loaded");
        assert_eq!(err.to_string(), "State error: no model loaded");
    }

    #[test]
    fn test_no_internet_message() {
        let err = PipelineError::no_internet("connection refused");
        assert!(matches!(err, PipelineError::Connectivity(_)));
        let message = err.to_string();
        assert!(message.contains("No internet"));
        assert!(message.contains("connection refused"));
    }

    #[test]
    fn test_contextual_errors() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = PipelineError::file_io_error("create directory", Path::new("/data/bird"), &io_error);
        let message = err.to_string();
        assert!(message.contains("create directory"));
        assert!(message.contains("/data/bird"));

        let err = PipelineError::download_error("HTTP 404 for", "http://x/y.jpg", "not found");
        assert!(matches!(err, PipelineError::Download(_)));
        assert!(err.to_string().contains("http://x/y.jpg"));

        let err = PipelineError::config_value_error("validation fraction", 1.5, "(0, 1)");
        assert!(err.to_string().contains("validation fraction"));
        assert!(err.to_string().contains("1.5"));
    }
}
