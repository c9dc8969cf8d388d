//! Stubs and helpers shared by unit tests

use crate::artifact::{self, ArtifactMetadata};
use crate::dataset::DataSplit;
use crate::download::Downloader;
use crate::error::{PipelineError, Result};
use crate::library::{ClassifierModel, VisionLibrary};
use crate::preprocessing::PreprocessingConfig;
use crate::search::ImageSearch;
use async_trait::async_trait;
use image::{DynamicImage, ImageBuffer, Rgb};
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Write a small gradient PNG at `path`, whatever its extension, creating parent dirs
pub fn write_png(path: &Path, width: u32, height: u32) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let image = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 90])
    });
    DynamicImage::ImageRgb8(image)
        .save_with_format(path, image::ImageFormat::Png)
        .unwrap();
}

#[derive(Debug)]
enum Script {
    Always(Vec<String>),
    Sequence(Vec<Vec<String>>),
    PerQuery(HashMap<String, Vec<String>>),
}

#[derive(Debug)]
struct SearchState {
    script: Script,
    failing: HashSet<String>,
    queries: Vec<String>,
}

/// Search that answers from a fixed script and records its queries
#[derive(Debug, Clone)]
pub struct ScriptedSearch {
    state: Arc<Mutex<SearchState>>,
}

impl ScriptedSearch {
    fn with_script(script: Script) -> Self {
        Self {
            state: Arc::new(Mutex::new(SearchState {
                script,
                failing: HashSet::new(),
                queries: Vec::new(),
            })),
        }
    }

    /// Same results for every query
    pub fn always(urls: Vec<String>) -> Self {
        Self::with_script(Script::Always(urls))
    }

    /// The n-th call gets the n-th result list; the last one repeats
    pub fn sequence(responses: Vec<Vec<String>>) -> Self {
        Self::with_script(Script::Sequence(responses))
    }

    /// Results keyed by query; unknown queries get nothing
    pub fn per_query(responses: Vec<(&str, Vec<String>)>) -> Self {
        Self::with_script(Script::PerQuery(
            responses.into_iter().map(|(q, urls)| (q.to_string(), urls)).collect(),
        ))
    }

    /// Fail with a search error whenever `query` is asked
    pub fn failing_on(self, query: &str) -> Self {
        self.state.lock().unwrap().failing.insert(query.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.state.lock().unwrap().queries.len()
    }

    pub fn queries(&self) -> Vec<String> {
        self.state.lock().unwrap().queries.clone()
    }
}

#[async_trait]
impl ImageSearch for ScriptedSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        let mut state = self.state.lock().unwrap();
        let call = state.queries.len();
        state.queries.push(query.to_string());

        if state.failing.contains(query) {
            return Err(PipelineError::search(format!("scripted failure for '{query}'")));
        }

        let mut urls = match &state.script {
            Script::Always(urls) => urls.clone(),
            Script::Sequence(responses) => responses
                .get(call)
                .or_else(|| responses.last())
                .cloned()
                .unwrap_or_default(),
            Script::PerQuery(responses) => responses.get(query).cloned().unwrap_or_default(),
        };
        urls.truncate(max_results);
        Ok(urls)
    }
}

/// Downloader keyed on host: `dead.*` fails, `junk.*` writes garbage, anything else a PNG
#[derive(Debug, Clone, Default)]
pub struct StubDownloader {
    calls: Arc<Mutex<Vec<String>>>,
}

impl StubDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Downloader for StubDownloader {
    async fn download(&self, url: &str, dest: &Path) -> Result<PathBuf> {
        self.calls.lock().unwrap().push(url.to_string());

        if url.contains("://dead.") {
            return Err(PipelineError::download_error("Failed to download", url, "connection refused"));
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if url.contains("://junk.") {
            std::fs::write(dest, b"<html>not an image</html>")?;
        } else {
            write_png(dest, 32, 24);
        }
        Ok(dest.to_path_buf())
    }
}

/// Collects formatted log output from a scoped subscriber
#[derive(Debug, Clone, Default)]
pub struct CaptureLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CaptureLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route this thread's events here until the guard drops
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buffer.lock().unwrap()).into_owned()
    }
}

impl Write for CaptureLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Vision library whose models always answer with fixed probabilities
#[derive(Debug, Clone)]
pub struct StubLibrary {
    probabilities: Vec<f32>,
    fail_training: bool,
    fine_tune_calls: Arc<Mutex<usize>>,
}

impl StubLibrary {
    pub fn new(probabilities: Vec<f32>) -> Self {
        Self {
            probabilities,
            fail_training: false,
            fine_tune_calls: Arc::new(Mutex::new(0)),
        }
    }

    /// Library whose `fine_tune` always fails
    pub fn failing() -> Self {
        Self {
            fail_training: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn fine_tune_calls(&self) -> usize {
        *self.fine_tune_calls.lock().unwrap()
    }
}

impl VisionLibrary for StubLibrary {
    type Model = StubModel;

    fn fine_tune(&self, split: &DataSplit, epochs: usize) -> Result<StubModel> {
        *self.fine_tune_calls.lock().unwrap() += 1;
        if self.fail_training {
            return Err(PipelineError::training("stub library refused to train"));
        }
        Ok(StubModel {
            labels: split.labels().to_vec(),
            probabilities: self.probabilities.clone(),
            epochs,
        })
    }

    fn load(&self, path: &Path) -> Result<StubModel> {
        let (metadata, weights) = artifact::load(path)?;
        if metadata.architecture != "stub" {
            return Err(PipelineError::model("not a stub artifact"));
        }
        let probabilities = weights
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();
        Ok(StubModel {
            labels: metadata.labels,
            probabilities,
            epochs: metadata.epochs,
        })
    }
}

/// Model returned by [`StubLibrary`]
#[derive(Debug, Clone)]
pub struct StubModel {
    labels: Vec<String>,
    probabilities: Vec<f32>,
    epochs: usize,
}

impl ClassifierModel for StubModel {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn predict(&self, _image: &DynamicImage) -> Result<Vec<f32>> {
        Ok(self.probabilities.clone())
    }

    fn save(&self, path: &Path) -> Result<()> {
        let weights: Vec<u8> = self.probabilities.iter().flat_map(|p| p.to_le_bytes()).collect();
        let metadata = ArtifactMetadata::new(
            self.labels.clone(),
            "stub",
            PreprocessingConfig::default(),
            self.epochs,
        );
        artifact::save(path, &metadata, &weights)
    }
}
