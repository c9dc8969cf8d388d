//! Seeded train/validation split with parent-directory labels

use super::is_image_file;
use crate::error::{PipelineError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::path::{Path, PathBuf};

/// One labeled image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub path: PathBuf,
    /// Index into [`DataSplit::labels`]
    pub label: usize,
}

/// Train and validation items over a sorted label vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct DataSplit {
    labels: Vec<String>,
    train: Vec<DataItem>,
    valid: Vec<DataItem>,
}

impl DataSplit {
    /// Scan `root/<label>/*` and split the items
    ///
    /// Labels are the sorted names of class directories that hold at least one
    /// image. Files directly under `root` are ignored. The validation set gets
    /// `floor(len * validation_fraction)` items chosen by a `seed`-ed shuffle,
    /// so the same tree and seed always give the same membership.
    ///
    /// # Errors
    /// - `DataError` when no images are found or only one class has images
    /// - `InvalidConfig` when the fraction is outside `[0, 1)`
    pub fn scan(root: &Path, validation_fraction: f64, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&validation_fraction) {
            return Err(PipelineError::config_value_error(
                "validation fraction",
                validation_fraction,
                "[0, 1)",
            ));
        }
        if !root.is_dir() {
            return Err(PipelineError::data(format!(
                "dataset root {} does not exist",
                root.display()
            )));
        }

        let mut class_dirs = Vec::new();
        for entry in std::fs::read_dir(root)
            .map_err(|e| PipelineError::file_io_error("read dataset root", root, &e))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                class_dirs.push(entry.path());
            }
        }
        class_dirs.sort();

        let mut labels = Vec::new();
        let mut items = Vec::new();
        for class_dir in class_dirs {
            let mut files: Vec<PathBuf> = walkdir::WalkDir::new(&class_dir)
                .min_depth(1)
                .max_depth(1)
                .into_iter()
                .filter_map(std::result::Result::ok)
                .filter(|entry| entry.file_type().is_file() && is_image_file(entry.path()))
                .map(walkdir::DirEntry::into_path)
                .collect();
            if files.is_empty() {
                continue;
            }
            files.sort();

            let label = class_dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let index = labels.len();
            labels.push(label);
            items.extend(files.into_iter().map(|path| DataItem { path, label: index }));
        }

        match labels.len() {
            0 => Err(PipelineError::data(format!("no images found under {}", root.display()))),
            1 => Err(PipelineError::data(format!(
                "only class '{}' has images under {}; at least two are needed",
                labels.join(""),
                root.display()
            ))),
            _ => Ok(Self::split(labels, items, validation_fraction, seed)),
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn split(labels: Vec<String>, mut items: Vec<DataItem>, validation_fraction: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        items.shuffle(&mut rng);

        let valid_len = (items.len() as f64 * validation_fraction).floor() as usize;
        let train = items.split_off(valid_len);

        tracing::info!(
            classes = labels.len(),
            train = train.len(),
            valid = items.len(),
            "Built train/validation split"
        );

        Self {
            labels,
            train,
            valid: items,
        }
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    #[must_use]
    pub fn train(&self) -> &[DataItem] {
        &self.train
    }

    #[must_use]
    pub fn valid(&self) -> &[DataItem] {
        &self.valid
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.train.len() + self.valid.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
