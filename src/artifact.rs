//! Single-file model artifact
//!
//! A gzip-compressed tar archive holding:
//! - `metadata.json`: label vocabulary, architecture, preprocessing and training info
//! - `model.bin`: backend-specific weights

use crate::error::{PipelineError, Result};
use crate::preprocessing::PreprocessingConfig;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tar::{Archive, Builder, Header};

/// Bumped whenever the archive layout changes
pub const FORMAT_VERSION: u32 = 1;

const METADATA_ENTRY: &str = "metadata.json";
const WEIGHTS_ENTRY: &str = "model.bin";

/// Everything besides the weights needed to run inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub format_version: u32,

    /// Label vocabulary; the model's output index `i` means `labels[i]`
    pub labels: Vec<String>,

    /// Backend architecture name, checked on load
    pub architecture: String,

    pub preprocessing: PreprocessingConfig,

    /// Epochs the weights were trained for
    pub epochs: usize,

    /// RFC 3339 timestamp of the training run
    pub trained_at: String,
}

impl ArtifactMetadata {
    /// Metadata stamped with the current local time
    pub fn new<S: Into<String>>(
        labels: Vec<String>,
        architecture: S,
        preprocessing: PreprocessingConfig,
        epochs: usize,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            labels,
            architecture: architecture.into(),
            preprocessing,
            epochs,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }
}

/// Write metadata and weights to `path`, creating parent directories
///
/// # Errors
/// - Parent directory or file cannot be created
/// - Archive cannot be written
pub fn save(path: &Path, metadata: &ArtifactMetadata, weights: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PipelineError::file_io_error("create directory", parent, &e))?;
        }
    }

    let json = serde_json::to_vec_pretty(metadata)
        .map_err(|e| PipelineError::model(format!("Failed to serialize metadata: {e}")))?;

    let file =
        File::create(path).map_err(|e| PipelineError::file_io_error("create artifact", path, &e))?;
    let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));

    append_entry(&mut builder, METADATA_ENTRY, &json)?;
    append_entry(&mut builder, WEIGHTS_ENTRY, weights)?;

    builder
        .into_inner()
        .and_then(GzEncoder::finish)
        .map_err(|e| PipelineError::file_io_error("finalize artifact", path, &e))?;

    tracing::info!(
        labels = ?metadata.labels,
        "Model artifact saved to {}",
        path.display()
    );
    Ok(())
}

fn append_entry<W: std::io::Write>(builder: &mut Builder<W>, name: &str, data: &[u8]) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_path(name)?;
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, data)?;
    Ok(())
}

/// Read metadata and weights back from `path`
///
/// # Errors
/// - File cannot be opened or is not a gzip tar archive
/// - Either entry is missing, or the metadata is malformed
/// - Format version is not supported
pub fn load(path: &Path) -> Result<(ArtifactMetadata, Vec<u8>)> {
    let file =
        File::open(path).map_err(|e| PipelineError::file_io_error("open artifact", path, &e))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut metadata = None;
    let mut weights = None;

    let entries = archive
        .entries()
        .map_err(|e| PipelineError::model(format!("{}: not a model archive: {e}", path.display())))?;
    for entry in entries {
        let mut entry = entry
            .map_err(|e| PipelineError::model(format!("{}: corrupt archive: {e}", path.display())))?;
        let name = entry.path()?.to_string_lossy().into_owned();

        match name.as_str() {
            METADATA_ENTRY => {
                let mut json = String::new();
                entry.read_to_string(&mut json)?;
                let parsed: ArtifactMetadata = serde_json::from_str(&json).map_err(|e| {
                    PipelineError::model(format!("{}: malformed metadata: {e}", path.display()))
                })?;
                metadata = Some(parsed);
            },
            WEIGHTS_ENTRY => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer)?;
                weights = Some(buffer);
            },
            _ => {},
        }
    }

    match (metadata, weights) {
        (Some(metadata), Some(weights)) => {
            if metadata.format_version != FORMAT_VERSION {
                return Err(PipelineError::model(format!(
                    "{}: unsupported artifact format {} (expected {})",
                    path.display(),
                    metadata.format_version,
                    FORMAT_VERSION
                )));
            }
            Ok((metadata, weights))
        },
        (None, _) => Err(PipelineError::model(format!(
            "{}: {METADATA_ENTRY} not found in archive",
            path.display()
        ))),
        (_, None) => Err(PipelineError::model(format!(
            "{}: {WEIGHTS_ENTRY} not found in archive",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_metadata() -> ArtifactMetadata {
        ArtifactMetadata::new(
            vec!["bird".to_string(), "forest".to_string()],
            "test-net",
            PreprocessingConfig::default(),
            3,
        )
    }

    #[test]
    fn test_save_creates_parent_dirs_and_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("models").join("nested").join("classifier.tar.gz");
        let metadata = sample_metadata();

        save(&path, &metadata, &[1, 2, 3, 4]).unwrap();
        let (loaded, weights) = load(&path).unwrap();

        assert_eq!(loaded, metadata);
        assert_eq!(weights, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = load(&dir.path().join("absent.tar.gz"));
        assert!(matches!(result, Err(PipelineError::Io(_))));
    }

    #[test]
    fn test_load_rejects_non_archive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.tar.gz");
        std::fs::write(&path, b"plain text, not gzip").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn test_load_rejects_missing_weights() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.tar.gz");

        let file = File::create(&path).unwrap();
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        let json = serde_json::to_vec(&sample_metadata()).unwrap();
        append_entry(&mut builder, METADATA_ENTRY, &json).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        match load(&path) {
            Err(PipelineError::Model(message)) => assert!(message.contains("model.bin")),
            other => panic!("expected model error, got {other:?}"),
        }
    }

    #[test]
    fn test_load_rejects_future_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("future.tar.gz");
        let mut metadata = sample_metadata();
        metadata.format_version = FORMAT_VERSION + 1;

        save(&path, &metadata, &[0]).unwrap();
        assert!(matches!(load(&path), Err(PipelineError::Model(_))));
    }
}
