//! Per-class dataset download with throttling and resizing

use super::sanitize::find_image_files;
use crate::download::{Downloader, ImageFetcher};
use crate::error::{PipelineError, Result};
use crate::preprocessing::{open_image, resize_longest_side};
use crate::search::ImageSearch;
use crate::tracing_config::spans;
use std::path::Path;
use std::time::Duration;
use tracing::Instrument;

/// Pause between per-class batches unless configured otherwise
pub const DEFAULT_THROTTLE: Duration = Duration::from_secs(5);

/// Outcome of preparing one class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassReport {
    pub label: String,
    /// Files written by the bulk download
    pub downloaded: usize,
    /// Files rewritten at the target size
    pub resized: usize,
    /// Set when the class step failed; the class may hold fewer images
    pub error: Option<String>,
}

/// Outcome of a full `prepare` run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetReport {
    pub classes: Vec<ClassReport>,
}

impl DatasetReport {
    #[must_use]
    pub fn total_downloaded(&self) -> usize {
        self.classes.iter().map(|c| c.downloaded).sum()
    }

    /// Labels whose class step failed
    #[must_use]
    pub fn failed_classes(&self) -> Vec<&str> {
        self.classes
            .iter()
            .filter(|c| c.error.is_some())
            .map(|c| c.label.as_str())
            .collect()
    }
}

/// Downloads a labeled dataset into `root/<label>/`
pub struct DatasetBuilder<'a, S, D> {
    fetcher: &'a ImageFetcher<S, D>,
    throttle: Duration,
}

impl<'a, S: ImageSearch, D: Downloader> DatasetBuilder<'a, S, D> {
    pub fn new(fetcher: &'a ImageFetcher<S, D>) -> Self {
        Self {
            fetcher,
            throttle: DEFAULT_THROTTLE,
        }
    }

    #[must_use]
    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Search, download and resize images for every class, in list order
    ///
    /// A class whose search, download or resize step fails is logged and
    /// skipped; the remaining classes are still processed. The throttle delay
    /// separates consecutive classes.
    ///
    /// # Errors
    /// Only when a class directory cannot be created.
    pub async fn prepare(
        &self,
        classes: &[String],
        root: &Path,
        images_per_class: usize,
        resize_dim: u32,
    ) -> Result<DatasetReport> {
        let mut report = DatasetReport::default();

        for (index, label) in classes.iter().enumerate() {
            let class_dir = root.join(label);
            std::fs::create_dir_all(&class_dir)
                .map_err(|e| PipelineError::file_io_error("create class directory", &class_dir, &e))?;

            let is_last = index + 1 == classes.len();
            let mut class_report = ClassReport {
                label: label.clone(),
                downloaded: 0,
                resized: 0,
                error: None,
            };

            if let Err(e) = self
                .prepare_class(label, &class_dir, images_per_class, resize_dim, is_last, &mut class_report)
                .instrument(spans::class_preparation(label))
                .await
            {
                tracing::error!("Failed to prepare class '{}': {}", label, e);
                class_report.error = Some(e.to_string());
            }

            report.classes.push(class_report);
        }

        tracing::info!(
            images = report.total_downloaded(),
            failed = report.failed_classes().len(),
            "Dataset prepared in {}",
            root.display()
        );
        Ok(report)
    }

    async fn prepare_class(
        &self,
        label: &str,
        class_dir: &Path,
        images_per_class: usize,
        resize_dim: u32,
        is_last: bool,
        report: &mut ClassReport,
    ) -> Result<()> {
        let urls = self
            .fetcher
            .search(&format!("{label} photo"), images_per_class)
            .await?;

        let written = self.fetcher.download_all(&urls, class_dir).await;
        report.downloaded = written.len();
        tracing::info!("Downloaded {} of {} '{}' images", written.len(), urls.len(), label);

        if !is_last && !self.throttle.is_zero() {
            tokio::time::sleep(self.throttle).await;
        }

        report.resized = resize_images(class_dir, resize_dim)?;
        Ok(())
    }
}

/// Rewrite every decodable image in `dir` so its longest side is `dim`
///
/// Files that do not decode are left for the sanitizer. Returns how many files
/// were rewritten.
///
/// # Errors
/// Directory traversal failure.
pub fn resize_images(dir: &Path, dim: u32) -> Result<usize> {
    let mut resized = 0;

    for path in find_image_files(dir)? {
        let image = match open_image(&path) {
            Ok(image) => image,
            Err(e) => {
                tracing::debug!("Not resizing {}: {}", path.display(), e);
                continue;
            },
        };

        if image.width().max(image.height()) == dim {
            continue;
        }

        // RGB keeps every extension's encoder happy (JPEG has no alpha)
        let output = image::DynamicImage::ImageRgb8(resize_longest_side(&image, dim).to_rgb8());
        match output.save(&path) {
            Ok(()) => resized += 1,
            Err(e) => tracing::warn!("Failed to resize {}: {}", path.display(), e),
        }
    }

    Ok(resized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::RetryPolicy;
    use crate::test_support::{write_png, ScriptedSearch, StubDownloader};
    use tempfile::TempDir;

    fn urls(host: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("http://{host}/{i}.png")).collect()
    }

    fn fetcher(search: ScriptedSearch) -> ImageFetcher<ScriptedSearch, StubDownloader> {
        ImageFetcher::new(search, StubDownloader::new()).with_retry(RetryPolicy {
            max_attempts: 1,
            backoff: Duration::ZERO,
        })
    }

    fn classes(labels: &[&str]) -> Vec<String> {
        labels.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn test_prepare_downloads_and_resizes_each_class() {
        let dir = TempDir::new().unwrap();
        let search = ScriptedSearch::per_query(vec![
            ("bird photo", urls("good.example", 3)),
            ("forest photo", {
                let mut mixed = urls("good.example", 2);
                mixed.push("http://dead.example/x.jpg".to_string());
                mixed
            }),
        ]);
        let fetcher = fetcher(search.clone());
        let builder = DatasetBuilder::new(&fetcher).with_throttle(Duration::ZERO);

        let report = builder
            .prepare(&classes(&["bird", "forest"]), dir.path(), 10, 24)
            .await
            .unwrap();

        assert_eq!(report.classes[0].downloaded, 3);
        assert_eq!(report.classes[1].downloaded, 2);
        assert!(report.failed_classes().is_empty());
        assert_eq!(search.queries(), vec!["bird photo", "forest photo"]);

        for path in find_image_files(dir.path()).unwrap() {
            let image = open_image(&path).unwrap();
            assert_eq!(image.width().max(image.height()), 24);
        }
    }

    #[tokio::test]
    async fn test_failed_class_does_not_abort_others() {
        let dir = TempDir::new().unwrap();
        let search = ScriptedSearch::per_query(vec![("forest photo", urls("good.example", 2))])
            .failing_on("bird photo");
        let fetcher = fetcher(search);
        let builder = DatasetBuilder::new(&fetcher).with_throttle(Duration::ZERO);

        let report = builder
            .prepare(&classes(&["bird", "forest"]), dir.path(), 10, 16)
            .await
            .unwrap();

        assert_eq!(report.failed_classes(), vec!["bird"]);
        assert_eq!(report.classes[1].downloaded, 2);
        assert!(dir.path().join("bird").is_dir());
        assert_eq!(find_image_files(&dir.path().join("forest")).unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_between_classes_only() {
        let dir = TempDir::new().unwrap();
        let search = ScriptedSearch::always(urls("good.example", 1));
        let fetcher = fetcher(search);
        let builder = DatasetBuilder::new(&fetcher).with_throttle(Duration::from_secs(5));

        let started = tokio::time::Instant::now();
        builder
            .prepare(&classes(&["a", "b", "c"]), dir.path(), 1, 8)
            .await
            .unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(10));
    }

    #[test]
    fn test_resize_images_skips_undecodable() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("wide.png"), 40, 10);
        write_png(&dir.path().join("small.jpg"), 5, 10);
        std::fs::write(dir.path().join("broken.png"), b"nope").unwrap();

        assert_eq!(resize_images(dir.path(), 20).unwrap(), 2);

        let wide = open_image(&dir.path().join("wide.png")).unwrap();
        assert_eq!((wide.width(), wide.height()), (20, 5));
        let small = open_image(&dir.path().join("small.jpg")).unwrap();
        assert_eq!((small.width(), small.height()), (10, 20));
        assert!(dir.path().join("broken.png").exists());

        // Already at target size: nothing rewritten
        assert_eq!(resize_images(dir.path(), 20).unwrap(), 0);
    }
}
