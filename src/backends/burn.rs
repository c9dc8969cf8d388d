//! Burn backend: a small CNN trained with burn's `Learner` on the CPU
//!
//! Training runs on `Autodiff<NdArray>`; the fitted model is converted to the
//! plain `NdArray` backend for inference and serialization.

use crate::artifact::{self, ArtifactMetadata};
use crate::config::TrainingOptions;
use crate::dataset::{DataItem, DataSplit};
// Renamed: the `Config` derive emits the two-argument `Result`
use crate::error::{PipelineError, Result as PipelineResult};
use crate::library::{ClassifierModel, VisionLibrary};
use crate::preprocessing::{open_image, ImagePreprocessor, PreprocessingConfig};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataloader::DataLoaderBuilder;
use burn::data::dataset::InMemDataset;
use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::loss::CrossEntropyLossConfig;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d, Relu};
use burn::optim::AdamConfig;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::activation::softmax;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Int, Tensor};
use burn::train::metric::{AccuracyMetric, LossMetric};
use burn::train::{
    ClassificationOutput, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
};
use image::DynamicImage;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};

/// Architecture name recorded in the artifact and checked on load
pub const ARCHITECTURE: &str = "snapclass-cnn-v1";

type TrainBackend = Autodiff<NdArray>;
type InferBackend = NdArray;

/// Channels of the three convolution blocks
const CHANNELS: [usize; 4] = [3, 32, 64, 128];

/// Network configuration
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    /// Number of output classes
    pub num_classes: usize,
    /// Dropout before the head
    #[config(default = 0.5)]
    pub dropout: f64,
}

impl ClassifierConfig {
    /// Initialize a network with fresh weights
    pub fn init<B: Backend>(&self, device: &B::Device) -> Classifier<B> {
        Classifier {
            backbone: Backbone::new(device),
            dropout: DropoutConfig::new(self.dropout).init(),
            head: LinearConfig::new(CHANNELS[3], self.num_classes).init(device),
        }
    }

    /// Reuse a trained backbone and attach a fresh head sized to `num_classes`
    pub fn init_with_backbone<B: Backend>(&self, backbone: Backbone<B>, device: &B::Device) -> Classifier<B> {
        Classifier {
            backbone,
            dropout: DropoutConfig::new(self.dropout).init(),
            head: LinearConfig::new(CHANNELS[3], self.num_classes).init(device),
        }
    }
}

/// Feature extractor: three conv blocks and global average pooling
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    conv1: Conv2d<B>,
    conv2: Conv2d<B>,
    conv3: Conv2d<B>,
    pool: MaxPool2d,
    global_pool: AdaptiveAvgPool2d,
    activation: Relu,
}

impl<B: Backend> Backbone<B> {
    fn new(device: &B::Device) -> Self {
        let conv = |input: usize, output: usize| {
            Conv2dConfig::new([input, output], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };

        Self {
            conv1: conv(CHANNELS[0], CHANNELS[1]),
            conv2: conv(CHANNELS[1], CHANNELS[2]),
            conv3: conv(CHANNELS[2], CHANNELS[3]),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            global_pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            activation: Relu::new(),
        }
    }

    /// `[batch, 3, size, size]` to `[batch, 128]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(self.activation.forward(self.conv1.forward(images)));
        let x = self.pool.forward(self.activation.forward(self.conv2.forward(x)));
        let x = self.activation.forward(self.conv3.forward(x));
        let x = self.global_pool.forward(x);

        let [batch_size, channels, _, _] = x.dims();
        x.reshape([batch_size, channels])
    }
}

/// Image classifier network
#[derive(Module, Debug)]
pub struct Classifier<B: Backend> {
    backbone: Backbone<B>,
    dropout: Dropout,
    head: Linear<B>,
}

impl<B: Backend> Classifier<B> {
    /// Class logits, `[batch, num_classes]`
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let features = self.backbone.forward(images);
        self.head.forward(self.dropout.forward(features))
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    fn into_backbone(self) -> Backbone<B> {
        self.backbone
    }
}

impl<B: AutodiffBackend> TrainStep<ImageBatch<B>, ClassificationOutput<B>> for Classifier<B> {
    fn step(&self, batch: ImageBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

impl<B: Backend> ValidStep<ImageBatch<B>, ClassificationOutput<B>> for Classifier<B> {
    fn step(&self, batch: ImageBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// A batch of preprocessed images with their label indices
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

/// Loads and preprocesses images lazily, one batch at a time
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    preprocessing: PreprocessingConfig,
}

impl ImageBatcher {
    #[must_use]
    pub fn new(preprocessing: PreprocessingConfig) -> Self {
        Self { preprocessing }
    }

    fn pixels(&self, path: &Path) -> PipelineResult<Vec<f32>> {
        let image = open_image(path)?;
        let tensor = ImagePreprocessor::preprocess(&image, &self.preprocessing)?;
        Ok(tensor.iter().copied().collect())
    }
}

impl<B: Backend> Batcher<B, DataItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<DataItem>, device: &B::Device) -> ImageBatch<B> {
        let size = self.preprocessing.image_size as usize;
        let batch_size = items.len();
        let mut all_pixels = Vec::with_capacity(batch_size * 3 * size * size);
        let mut targets = Vec::with_capacity(batch_size);

        for item in items {
            match self.pixels(&item.path) {
                Ok(pixels) => all_pixels.extend_from_slice(&pixels),
                Err(e) => {
                    // Sanitized datasets should never get here; zeros keep the batch shape
                    tracing::warn!("Failed to load {}: {}", item.path.display(), e);
                    all_pixels.extend(std::iter::repeat(0.0f32).take(3 * size * size));
                },
            }
            #[allow(clippy::cast_possible_wrap)]
            targets.push(item.label as i64);
        }

        let images = Tensor::<B, 1>::from_floats(all_pixels.as_slice(), device)
            .reshape([batch_size, 3, size, size]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), device);

        ImageBatch { images, targets }
    }
}

/// Fine-tunes [`Classifier`] networks with burn
#[derive(Debug, Clone)]
pub struct BurnLibrary {
    options: TrainingOptions,
    scratch_dir: PathBuf,
    device: NdArrayDevice,
}

impl BurnLibrary {
    /// `scratch_dir` receives the learner's checkpoints and logs during training
    pub fn new<P: Into<PathBuf>>(options: TrainingOptions, scratch_dir: P) -> Self {
        Self {
            options,
            scratch_dir: scratch_dir.into(),
            device: NdArrayDevice::Cpu,
        }
    }

    fn initial_model(&self, num_classes: usize) -> PipelineResult<Classifier<TrainBackend>> {
        let config = ClassifierConfig::new(num_classes);

        let Some(base_path) = &self.options.base_model else {
            tracing::info!("Training from scratch ({} classes)", num_classes);
            return Ok(config.init::<TrainBackend>(&self.device));
        };

        let (metadata, weights) = artifact::load(base_path)?;
        check_architecture(&metadata, base_path)?;

        let base = ClassifierConfig::new(metadata.labels.len())
            .init::<TrainBackend>(&self.device)
            .load_record(decode_record(weights, &self.device)?);

        tracing::info!(
            "Warm-starting from {} (backbone frozen, {} -> {} classes)",
            base_path.display(),
            metadata.labels.len(),
            num_classes
        );
        Ok(config.init_with_backbone(base.into_backbone().no_grad(), &self.device))
    }
}

impl VisionLibrary for BurnLibrary {
    type Model = BurnModel;

    fn fine_tune(&self, split: &DataSplit, epochs: usize) -> PipelineResult<BurnModel> {
        let preprocessing = self.options.preprocessing();
        let model = self.initial_model(split.labels().len())?;

        let batcher = ImageBatcher::new(preprocessing.clone());
        let dataloader_train = DataLoaderBuilder::<TrainBackend, _, _>::new(batcher.clone())
            .batch_size(self.options.batch_size)
            .shuffle(self.options.seed)
            .num_workers(1)
            .build(InMemDataset::new(split.train().to_vec()));
        let dataloader_valid = DataLoaderBuilder::<InferBackend, _, _>::new(batcher)
            .batch_size(self.options.batch_size)
            .num_workers(1)
            .build(InMemDataset::new(split.valid().to_vec()));

        std::fs::create_dir_all(&self.scratch_dir)
            .map_err(|e| PipelineError::file_io_error("create directory", &self.scratch_dir, &e))?;
        let scratch_dir = self.scratch_dir.to_string_lossy().into_owned();

        tracing::info!(
            epochs,
            batch_size = self.options.batch_size,
            learning_rate = self.options.learning_rate,
            "Fine-tuning on {} training images",
            split.train().len()
        );

        let learner = LearnerBuilder::new(&scratch_dir)
            .metric_train_numeric(AccuracyMetric::new())
            .metric_valid_numeric(AccuracyMetric::new())
            .metric_train_numeric(LossMetric::new())
            .metric_valid_numeric(LossMetric::new())
            .learning_strategy(LearningStrategy::SingleDevice(self.device.clone()))
            .num_epochs(epochs)
            .summary()
            .build(model, AdamConfig::new().init(), self.options.learning_rate);

        let trained = std::panic::catch_unwind(AssertUnwindSafe(|| {
            learner.fit(dataloader_train, dataloader_valid)
        }))
        .map_err(|panic| PipelineError::training(panic_message(panic.as_ref())))?;

        Ok(BurnModel {
            model: trained.model,
            labels: split.labels().to_vec(),
            preprocessing,
            epochs,
            device: self.device.clone(),
        })
    }

    fn load(&self, path: &Path) -> PipelineResult<BurnModel> {
        BurnModel::load(path, self.device.clone())
    }
}

/// Inference-ready classifier with its label vocabulary
#[derive(Debug)]
pub struct BurnModel {
    model: Classifier<InferBackend>,
    labels: Vec<String>,
    preprocessing: PreprocessingConfig,
    epochs: usize,
    device: NdArrayDevice,
}

impl BurnModel {
    /// Untrained model, used as the target of artifact loading
    #[must_use]
    pub fn untrained(labels: Vec<String>, preprocessing: PreprocessingConfig) -> Self {
        let device = NdArrayDevice::Cpu;
        Self {
            model: ClassifierConfig::new(labels.len()).init(&device),
            labels,
            preprocessing,
            epochs: 0,
            device,
        }
    }

    /// Load an artifact written by [`ClassifierModel::save`]
    ///
    /// # Errors
    /// I/O failure, or `ModelError` for a foreign architecture or undecodable weights.
    pub fn load(path: &Path, device: NdArrayDevice) -> PipelineResult<Self> {
        let (metadata, weights) = artifact::load(path)?;
        check_architecture(&metadata, path)?;

        let model = ClassifierConfig::new(metadata.labels.len())
            .init::<InferBackend>(&device)
            .load_record(decode_record(weights, &device)?);

        tracing::info!(labels = ?metadata.labels, "Loaded model from {}", path.display());
        Ok(Self {
            model,
            labels: metadata.labels,
            preprocessing: metadata.preprocessing,
            epochs: metadata.epochs,
            device,
        })
    }
}

impl ClassifierModel for BurnModel {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn predict(&self, image: &DynamicImage) -> PipelineResult<Vec<f32>> {
        let size = self.preprocessing.image_size as usize;
        let pixels: Vec<f32> = ImagePreprocessor::preprocess(image, &self.preprocessing)?
            .iter()
            .copied()
            .collect();

        let input = Tensor::<InferBackend, 1>::from_floats(pixels.as_slice(), &self.device)
            .reshape([1, 3, size, size]);
        let probabilities = softmax(self.model.forward(input), 1);

        probabilities
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| PipelineError::model(format!("Failed to read model output: {e:?}")))
    }

    fn save(&self, path: &Path) -> PipelineResult<()> {
        let weights = BinBytesRecorder::<FullPrecisionSettings>::default()
            .record(self.model.clone().into_record(), ())
            .map_err(|e| PipelineError::model(format!("Failed to serialize weights: {e:?}")))?;

        let metadata = ArtifactMetadata::new(
            self.labels.clone(),
            ARCHITECTURE,
            self.preprocessing.clone(),
            self.epochs,
        );
        artifact::save(path, &metadata, &weights)
    }
}

fn check_architecture(metadata: &ArtifactMetadata, path: &Path) -> PipelineResult<()> {
    if metadata.architecture == ARCHITECTURE {
        Ok(())
    } else {
        Err(PipelineError::model(format!(
            "{}: architecture '{}' is not supported (expected '{}')",
            path.display(),
            metadata.architecture,
            ARCHITECTURE
        )))
    }
}

fn decode_record<B: Backend>(weights: Vec<u8>, device: &B::Device) -> PipelineResult<ClassifierRecord<B>> {
    BinBytesRecorder::<FullPrecisionSettings>::default()
        .load(weights, device)
        .map_err(|e| PipelineError::model(format!("Failed to decode weights: {e:?}")))
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("training aborted: {detail}")
}
