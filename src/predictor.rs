//! Single-image prediction with a confidence gate

use crate::error::Result;
use crate::library::VisionLibrary;
use crate::trainer::Trainer;
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Top-class probability below which a prediction is reported as unknown
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Outcome of classifying one image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Predicted label, or `None` for "unknown"
    pub label: Option<String>,
    /// Index of the most probable class
    pub index: usize,
    /// Per-class probabilities in label order
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Probability of the top class
    #[must_use]
    pub fn confidence(&self) -> f32 {
        self.probabilities.get(self.index).copied().unwrap_or(0.0)
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        self.label.is_none()
    }

    /// Drop the label when the top probability is under [`CONFIDENCE_THRESHOLD`]
    ///
    /// The boundary keeps the label: exactly 0.5 stays labeled. A NaN
    /// confidence is never above the threshold.
    #[must_use]
    pub fn gated(mut self) -> Self {
        let confidence = self.confidence();
        if confidence.is_nan() || confidence < CONFIDENCE_THRESHOLD {
            self.label = None;
        }
        self
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.1}%)",
            self.label.as_deref().unwrap_or("unknown"),
            self.confidence() * 100.0
        )
    }
}

/// Index and probability of the most probable class; ties go to the lower index
///
/// Non-finite values are skipped. `None` when no value is finite.
#[must_use]
pub fn top_class(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, p)| p.is_finite())
        .fold(None, |best, (index, p)| match best {
            Some((_, best_p)) if best_p >= p => best,
            _ => Some((index, p)),
        })
}

/// Classifies images through a trainer's model and applies the confidence gate
pub struct Predictor<'a, L: VisionLibrary> {
    trainer: &'a Trainer<L>,
}

impl<'a, L: VisionLibrary> Predictor<'a, L> {
    pub fn new(trainer: &'a Trainer<L>) -> Self {
        Self { trainer }
    }

    /// Classify `image_path`, reporting "unknown" for low-confidence results
    ///
    /// # Errors
    /// `StateError` when the trainer has no model, plus image or inference failures.
    pub fn predict(&self, image_path: &Path) -> Result<Prediction> {
        let prediction = self.trainer.predict(image_path)?.gated();
        tracing::info!(
            probabilities = ?prediction.probabilities,
            "Prediction for {}: {}",
            image_path.display(),
            prediction
        );
        Ok(prediction)
    }
}
