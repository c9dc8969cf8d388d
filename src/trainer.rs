//! Training orchestration over a [`VisionLibrary`]
//!
//! A [`Trainer`] walks `Uninitialized -> DataReady -> Trained -> Saved`.
//! Loading an artifact jumps straight to `Trained` from any state.

use crate::config::PipelineConfig;
use crate::dataset::DataSplit;
use crate::error::{PipelineError, Result};
use crate::library::{ClassifierModel, VisionLibrary};
use crate::predictor::{top_class, Prediction};
use crate::preprocessing::open_image;
use std::path::{Path, PathBuf};

/// Where a [`Trainer`] is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainerState {
    Uninitialized,
    DataReady,
    Trained,
    Saved,
}

/// Summary of a `train` call
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub epochs: usize,
    pub train_items: usize,
    pub valid_items: usize,
    /// Fraction of validation images misclassified; `None` without validation images
    pub error_rate: Option<f32>,
}

/// Owns the data split and the model for one training run
pub struct Trainer<L: VisionLibrary> {
    library: L,
    root: PathBuf,
    validation_fraction: f64,
    seed: u64,
    split: Option<DataSplit>,
    model: Option<L::Model>,
    state: TrainerState,
}

impl<L: VisionLibrary> Trainer<L> {
    /// Trainer over the dataset at `root` with a 0.2 validation fraction and seed 42
    pub fn new<P: Into<PathBuf>>(library: L, root: P) -> Self {
        Self {
            library,
            root: root.into(),
            validation_fraction: 0.2,
            seed: 42,
            split: None,
            model: None,
            state: TrainerState::Uninitialized,
        }
    }

    /// Trainer using the dataset location and split settings of `config`
    pub fn from_config(library: L, config: &PipelineConfig) -> Self {
        Self::new(library, config.dataset_root.clone())
            .with_validation_fraction(config.validation_fraction)
            .with_seed(config.split_seed)
    }

    #[must_use]
    pub fn with_validation_fraction(mut self, fraction: f64) -> Self {
        self.validation_fraction = fraction;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    #[must_use]
    pub fn state(&self) -> TrainerState {
        self.state
    }

    #[must_use]
    pub fn split(&self) -> Option<&DataSplit> {
        self.split.as_ref()
    }

    #[must_use]
    pub fn model(&self) -> Option<&L::Model> {
        self.model.as_ref()
    }

    /// Scan the dataset and build the train/validation split
    ///
    /// # Errors
    /// `DataError` when no images are found or fewer than two classes have images.
    pub fn build_dataloaders(&mut self) -> Result<&DataSplit> {
        let split = self
            .library
            .build_split(&self.root, self.validation_fraction, self.seed)?;
        self.state = TrainerState::DataReady;
        Ok(self.split.insert(split))
    }

    /// Fine-tune a model on the current split for `epochs` passes
    ///
    /// # Errors
    /// - `StateError` when called before `build_dataloaders`
    /// - `InvalidConfig` for zero epochs
    /// - `TrainingError` when the library fails
    pub fn train(&mut self, epochs: usize) -> Result<TrainingReport> {
        let split = self
            .split
            .as_ref()
            .ok_or_else(|| PipelineError::state("call build_dataloaders before train"))?;
        if epochs == 0 {
            return Err(PipelineError::config_value_error("epochs", 0, ">= 1"));
        }

        tracing::info!("Training for {} epochs on {} classes", epochs, split.labels().len());
        let model = self.library.fine_tune(split, epochs)?;

        let report = TrainingReport {
            epochs,
            train_items: split.train().len(),
            valid_items: split.valid().len(),
            error_rate: validation_error_rate(&model, split),
        };
        match report.error_rate {
            Some(rate) => tracing::info!("Training complete, validation error rate {:.3}", rate),
            None => tracing::info!("Training complete (no validation images)"),
        }

        self.model = Some(model);
        self.state = TrainerState::Trained;
        Ok(report)
    }

    /// Save the model to a single artifact file, creating parent directories
    ///
    /// # Errors
    /// `StateError` without a model, or the save failure.
    pub fn save_model(&mut self, path: &Path) -> Result<()> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PipelineError::state("no trained model to save"))?;
        model.save(path)?;
        self.state = TrainerState::Saved;
        Ok(())
    }

    /// Load a previously saved artifact, replacing any model held
    ///
    /// # Errors
    /// I/O or `ModelError` from the library.
    pub fn load_model(&mut self, path: &Path) -> Result<()> {
        self.model = Some(self.library.load(path)?);
        self.state = TrainerState::Trained;
        Ok(())
    }

    /// Classify one image without the confidence gate
    ///
    /// # Errors
    /// - `StateError("no model loaded")` without a model
    /// - Image decoding or inference failure
    pub fn predict(&self, image_path: &Path) -> Result<Prediction> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PipelineError::state("no model loaded"))?;

        let image = open_image(image_path)?;
        let probabilities = model.predict(&image)?;
        let (index, _) = top_class(&probabilities)
            .ok_or_else(|| PipelineError::model("model returned no finite probabilities"))?;
        let label = model.labels().get(index).cloned().ok_or_else(|| {
            PipelineError::model(format!(
                "class index {index} outside the {} known labels",
                model.labels().len()
            ))
        })?;

        Ok(Prediction {
            label: Some(label),
            index,
            probabilities,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn validation_error_rate<M: ClassifierModel>(model: &M, split: &DataSplit) -> Option<f32> {
    let mut evaluated = 0usize;
    let mut wrong = 0usize;

    for item in split.valid() {
        let outcome = open_image(&item.path).and_then(|image| model.predict(&image));
        match outcome {
            Ok(probabilities) => {
                evaluated += 1;
                if top_class(&probabilities).map(|(index, _)| index) != Some(item.label) {
                    wrong += 1;
                }
            },
            Err(e) => tracing::warn!("Skipping {} in validation: {}", item.path.display(), e),
        }
    }

    (evaluated > 0).then(|| wrong as f32 / evaluated as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{write_png, StubLibrary};
    use tempfile::TempDir;

    fn dataset(root: &Path) {
        for label in ["bird", "forest"] {
            for i in 0..5 {
                write_png(&root.join(label).join(format!("{i}.png")), 8, 8);
            }
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data");
        dataset(&root);

        let mut trainer = Trainer::new(StubLibrary::new(vec![0.8, 0.2]), &root);
        assert_eq!(trainer.state(), TrainerState::Uninitialized);

        let split = trainer.build_dataloaders().unwrap();
        assert_eq!(split.valid().len(), 2);
        assert_eq!(trainer.state(), TrainerState::DataReady);

        let report = trainer.train(1).unwrap();
        assert_eq!(report.train_items, 8);
        assert_eq!(report.valid_items, 2);
        assert!(report.error_rate.is_some());
        assert_eq!(trainer.state(), TrainerState::Trained);

        let artifact = dir.path().join("models").join("classifier.tar.gz");
        trainer.save_model(&artifact).unwrap();
        assert!(artifact.is_file());
        assert_eq!(trainer.state(), TrainerState::Saved);

        let prediction = trainer.predict(&root.join("bird").join("0.png")).unwrap();
        assert_eq!(prediction.label.as_deref(), Some("bird"));
        assert_eq!(prediction.index, 0);
    }

    #[test]
    fn test_train_requires_data() {
        let dir = TempDir::new().unwrap();
        let mut trainer = Trainer::new(StubLibrary::new(vec![0.5, 0.5]), dir.path());
        assert!(matches!(trainer.train(1), Err(PipelineError::State(_))));
        assert!(matches!(
            trainer.save_model(&dir.path().join("m.tar.gz")),
            Err(PipelineError::State(_))
        ));
    }

    #[test]
    fn test_empty_dataset_is_data_error() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("bird")).unwrap();
        let mut trainer = Trainer::new(StubLibrary::new(vec![0.5, 0.5]), dir.path());

        assert!(matches!(trainer.build_dataloaders(), Err(PipelineError::Data(_))));
        assert_eq!(trainer.state(), TrainerState::Uninitialized);
    }

    #[test]
    fn test_training_failure_propagates() {
        let dir = TempDir::new().unwrap();
        dataset(dir.path());
        let mut trainer = Trainer::new(StubLibrary::failing(), dir.path());

        trainer.build_dataloaders().unwrap();
        assert!(matches!(trainer.train(1), Err(PipelineError::Training(_))));
        assert_eq!(trainer.state(), TrainerState::DataReady);
    }

    #[test]
    fn test_predict_without_model() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("x.png");
        write_png(&image, 4, 4);
        let trainer = Trainer::new(StubLibrary::new(vec![1.0, 0.0]), dir.path());

        match trainer.predict(&image) {
            Err(PipelineError::State(message)) => assert_eq!(message, "no model loaded"),
            other => panic!("expected state error, got {other:?}"),
        }
    }

    #[test]
    fn test_diverged_model_prediction_is_model_error() {
        let dir = TempDir::new().unwrap();
        dataset(dir.path());
        let mut trainer = Trainer::new(StubLibrary::new(vec![f32::NAN, f32::NAN]), dir.path());
        trainer.build_dataloaders().unwrap();
        trainer.train(1).unwrap();

        let result = trainer.predict(&dir.path().join("bird").join("0.png"));
        assert!(matches!(result, Err(PipelineError::Model(_))));
    }

    #[test]
    fn test_load_model_in_fresh_trainer() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("data");
        dataset(&root);
        let artifact = dir.path().join("classifier.tar.gz");

        let mut first = Trainer::new(StubLibrary::new(vec![0.3, 0.7]), &root);
        first.build_dataloaders().unwrap();
        first.train(2).unwrap();
        first.save_model(&artifact).unwrap();

        // The fresh library's own probabilities are ignored; the artifact's are used
        let mut second = Trainer::new(StubLibrary::new(vec![1.0, 0.0]), &root);
        second.load_model(&artifact).unwrap();
        assert_eq!(second.state(), TrainerState::Trained);

        let prediction = second.predict(&root.join("bird").join("1.png")).unwrap();
        assert_eq!(prediction.label.as_deref(), Some("forest"));
        assert_eq!(prediction.probabilities, vec![0.3, 0.7]);
    }
}
