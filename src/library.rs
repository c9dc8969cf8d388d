//! Capability interface over the vision-training library
//!
//! The training orchestrator only talks to these traits, so the modeling
//! library behind them can be swapped without touching orchestration.

use crate::dataset::DataSplit;
use crate::error::Result;
use image::DynamicImage;
use std::path::Path;

/// A trained, inference-ready classifier
pub trait ClassifierModel {
    /// Label vocabulary, in output-index order
    fn labels(&self) -> &[String];

    /// Per-class probabilities for one image, summing to 1
    ///
    /// No stochastic augmentation: the same image always yields the same vector.
    ///
    /// # Errors
    /// Preprocessing or inference failure.
    fn predict(&self, image: &DynamicImage) -> Result<Vec<f32>>;

    /// Serialize weights, labels and preprocessing to a single artifact file
    ///
    /// # Errors
    /// Serialization or file I/O failure.
    fn save(&self, path: &Path) -> Result<()>;
}

/// Builds datasets, fine-tunes and loads classifiers
pub trait VisionLibrary {
    type Model: ClassifierModel;

    /// Scan `root` and split it into train and validation items
    ///
    /// # Errors
    /// `DataError` when no images are found or fewer than two classes have images.
    fn build_split(&self, root: &Path, validation_fraction: f64, seed: u64) -> Result<DataSplit> {
        DataSplit::scan(root, validation_fraction, seed)
    }

    /// Fine-tune a classifier on `split` for `epochs` passes
    ///
    /// # Errors
    /// `TrainingError` on library failure.
    fn fine_tune(&self, split: &DataSplit, epochs: usize) -> Result<Self::Model>;

    /// Load a classifier previously written by [`ClassifierModel::save`]
    ///
    /// # Errors
    /// I/O or `ModelError` when the artifact cannot be decoded.
    fn load(&self, path: &Path) -> Result<Self::Model>;
}
