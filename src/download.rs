//! Image downloading with bounded retries
//!
//! `HttpDownloader` streams a single URL to disk. `ImageFetcher` pairs a
//! downloader with an [`ImageSearch`] so a keyword can be turned into one
//! validated image file, or into a folder of candidate images.

use crate::dataset::IMAGE_EXTENSIONS;
use crate::error::{PipelineError, Result};
use crate::preprocessing::open_image;
use crate::search::ImageSearch;
use async_trait::async_trait;
use futures_util::stream::TryStreamExt;
#[cfg(feature = "cli")]
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;

/// Per-request timeout for image downloads
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Attempts made by [`ImageFetcher::fetch_with_retry`] unless configured otherwise
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Writes the resource behind a URL to a local path
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` to `dest`, creating parent directories, and return `dest`
    ///
    /// # Errors
    /// `DownloadError` wrapping the underlying cause. Nothing is retried.
    async fn download(&self, url: &str, dest: &Path) -> Result<PathBuf>;
}

/// Progress bar abstraction that works with and without CLI features
#[derive(Debug)]
pub enum ProgressIndicator {
    #[cfg(feature = "cli")]
    Indicatif(ProgressBar),
    NoOp,
}

impl ProgressIndicator {
    /// Progress bar when the `cli` feature is enabled, silent otherwise
    #[must_use]
    pub fn for_download() -> Self {
        #[cfg(feature = "cli")]
        {
            let pb = ProgressBar::new(0);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Self::Indicatif(pb)
        }
        #[cfg(not(feature = "cli"))]
        {
            Self::NoOp
        }
    }

    pub fn set_length(&self, len: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_length(len),
            Self::NoOp => {},
        }
    }

    pub fn set_position(&self, pos: u64) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.set_position(pos),
            Self::NoOp => {},
        }
    }

    pub fn finish_and_clear(&self) {
        match self {
            #[cfg(feature = "cli")]
            Self::Indicatif(pb) => pb.finish_and_clear(),
            Self::NoOp => {},
        }
    }
}

/// Plain HTTP GET downloader with a fixed timeout
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    show_progress: bool,
}

impl HttpDownloader {
    /// Create a downloader with the standard 10 second timeout
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn new() -> Result<Self> {
        Self::with_timeout(DOWNLOAD_TIMEOUT)
    }

    /// Create a downloader with a custom request timeout
    ///
    /// # Errors
    /// - Failed to create HTTP client
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PipelineError::download(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            show_progress: false,
        })
    }

    /// Display a progress bar while downloading (CLI builds only)
    #[must_use]
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    async fn stream_to_file(
        &self,
        url: &str,
        local_path: &Path,
        progress: Option<&ProgressIndicator>,
    ) -> Result<u64> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::download_error("Failed to download", url, e))?;

        if !response.status().is_success() {
            return Err(PipelineError::download_error(
                &format!("HTTP error {} for", response.status()),
                url,
                "non-success status",
            ));
        }

        let total_size = response.content_length();
        if let (Some(pb), Some(total)) = (progress, total_size) {
            pb.set_length(total);
        }

        let mut file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| PipelineError::file_io_error("create file", local_path, &e))?;

        let mut stream = StreamReader::new(
            response
                .bytes_stream()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e)),
        );

        let mut downloaded = 0u64;
        let mut buffer = vec![0; 8192];

        loop {
            let bytes_read = tokio::io::AsyncReadExt::read(&mut stream, &mut buffer)
                .await
                .map_err(|e| PipelineError::download_error("Failed to read body of", url, e))?;

            if bytes_read == 0 {
                break;
            }

            file.write_all(buffer.get(..bytes_read).unwrap_or(&[]))
                .await
                .map_err(|e| PipelineError::file_io_error("write to file", local_path, &e))?;

            downloaded += bytes_read as u64;
            if let Some(pb) = progress {
                pb.set_position(downloaded);
            }
        }

        file.flush()
            .await
            .map_err(|e| PipelineError::file_io_error("flush file", local_path, &e))?;

        Ok(downloaded)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        tracing::debug!("Downloading image from: {}", url);

        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| PipelineError::file_io_error("create directory", parent, &e))?;
            }
        }

        let progress = self.show_progress.then(ProgressIndicator::for_download);
        let result = self.stream_to_file(url, dest, progress.as_ref()).await;
        if let Some(pb) = &progress {
            pb.finish_and_clear();
        }

        let downloaded = result?;
        tracing::debug!("Downloaded {} bytes to {}", downloaded, dest.display());
        Ok(dest.to_path_buf())
    }
}

/// How `fetch_with_retry` repeats failed attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, each one a fresh search plus download
    pub max_attempts: u32,
    /// Pause between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Search-plus-download front end used by the dataset builder and the pipeline
#[derive(Debug)]
pub struct ImageFetcher<S, D> {
    search: S,
    downloader: D,
    retry: RetryPolicy,
}

impl<S: ImageSearch, D: Downloader> ImageFetcher<S, D> {
    pub fn new(search: S, downloader: D) -> Self {
        Self {
            search,
            downloader,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Candidate URLs for `query`, no retry
    ///
    /// # Errors
    /// Whatever the search provider reports.
    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        self.search.search(query, max_results).await
    }

    /// Download a single URL to `dest`, no retry
    ///
    /// # Errors
    /// `DownloadError` wrapping the cause.
    pub async fn fetch_one(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        self.downloader.download(url, dest).await
    }

    /// Search for one image matching `query` and store it at `dest`
    ///
    /// Every attempt performs a fresh search, since the previous URL may be
    /// dead, then downloads and decodes the result. On success exactly one
    /// valid image exists at `dest`. On failure `dest` may be absent.
    ///
    /// # Errors
    /// `DownloadError` once `max_attempts` attempts have failed.
    pub async fn fetch_with_retry(&self, query: &str, dest: &Path) -> Result<PathBuf> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.attempt_fetch(query, dest).await {
                Ok(path) => {
                    tracing::info!("Downloaded '{}' image to {}", query, path.display());
                    return Ok(path);
                },
                Err(e) => {
                    tracing::warn!(attempt, "Attempt {} to download '{}' failed: {}", attempt, query, e);
                    last_error = Some(e);
                    if attempt < max_attempts && !self.retry.backoff.is_zero() {
                        tokio::time::sleep(self.retry.backoff).await;
                    }
                },
            }
        }

        tracing::error!(
            "Failed to download '{}' image after {} attempts.",
            query,
            max_attempts
        );
        Err(PipelineError::download(format!(
            "'{}' failed after {} attempts: {}",
            query,
            max_attempts,
            last_error.map_or_else(|| "unknown error".to_string(), |e| e.to_string())
        )))
    }

    async fn attempt_fetch(&self, query: &str, dest: &Path) -> Result<PathBuf> {
        let url = self
            .search
            .search(query, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PipelineError::search(format!("no results for '{query}'")))?;

        let path = self.downloader.download(&url, dest).await?;
        validate_image(&path, &url)?;
        Ok(path)
    }

    /// Download every URL into `dir`, skipping the ones that fail
    ///
    /// Files are named after a hash of their URL, so the same URL never lands
    /// twice. Returns the paths that were written.
    pub async fn download_all(&self, urls: &[String], dir: &Path) -> Vec<PathBuf> {
        let mut written = Vec::with_capacity(urls.len());
        for url in urls {
            let dest = dir.join(file_name_for_url(url));
            match self.downloader.download(url, &dest).await {
                Ok(path) => written.push(path),
                Err(e) => {
                    tracing::debug!("Skipping {}: {}", url, e);
                    if dest.exists() {
                        let _ = fs::remove_file(&dest);
                    }
                },
            }
        }
        written
    }
}

/// Decode the downloaded file; remove it and fail if it is not an image
fn validate_image(path: &Path, url: &str) -> Result<()> {
    match open_image(path) {
        Ok(_) => Ok(()),
        Err(e) => {
            if let Err(remove_err) = fs::remove_file(path) {
                tracing::debug!("Failed to remove invalid download {}: {}", path.display(), remove_err);
            }
            Err(PipelineError::download_error("Downloaded file is not an image", url, e))
        },
    }
}

/// Stable file name for a URL: 16 hex chars of its SHA-256 plus its image extension
#[must_use]
pub fn file_name_for_url(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let hash_string = format!("{:x}", hasher.finalize());
    let stem = hash_string.get(..16).unwrap_or(&hash_string);
    format!("{}.{}", stem, url_extension(url))
}

fn url_extension(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last_segment = path.rsplit('/').next().unwrap_or(path);
    last_segment
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| "jpg".to_string())
}
