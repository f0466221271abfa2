// Model module
// Trainable word decoder behind a backend abstraction, plus training hooks

pub mod decoder;
pub mod hooks;
pub mod network;
pub mod weights;

pub use decoder::{Decoder, DecoderKind};
pub use hooks::{EarlyStopping, HookAction, TrainingHook, WeightAverager};
pub use network::{DecoderBackend, DecoderModel, TrainConfig};
pub use weights::{Dense, Snapshot, Weights};

use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::labels::Vocabulary;

/// Errors raised by model backends
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Decoder head not available: {0:?}")]
    DecoderUnavailable(DecoderKind),

    #[error("Cannot train on an empty {0} split")]
    EmptyDataset(&'static str),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Incompatible model: {0}")]
    Incompatible(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Windows with their class indices
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Shape `[n, time_bins, electrodes]`
    pub windows: Array3<f32>,
    pub labels: Vec<usize>,
}

impl Dataset {
    pub fn new(windows: Array3<f32>, labels: Vec<usize>) -> Self {
        Dataset { windows, labels }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// One-hot label matrix `[n, n_classes]`
    pub fn one_hot(&self, n_classes: usize) -> Array2<f32> {
        let mut encoded = Array2::zeros((self.labels.len(), n_classes));
        for (row, &label) in self.labels.iter().enumerate() {
            if label < n_classes {
                encoded[[row, label]] = 1.0;
            }
        }
        encoded
    }
}

/// Metrics recorded at the end of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs {
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
}

/// Per-epoch training metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochLogs>,
}

impl History {
    pub fn push(&mut self, logs: EpochLogs) {
        self.epochs.push(logs);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Last value of every series, keyed by metric name
    pub fn final_metrics(&self) -> Vec<(&'static str, f64)> {
        match self.epochs.last() {
            Some(last) => vec![
                ("loss", last.loss),
                ("accuracy", last.accuracy),
                ("val_loss", last.val_loss),
                ("val_accuracy", last.val_accuracy),
            ],
            None => Vec::new(),
        }
    }
}

/// Scalar test metrics from a single model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalScalars {
    pub loss: f64,
    pub accuracy: f64,
}

/// A trained model and the history of its fit
#[derive(Debug, Clone)]
pub struct Fitted<M> {
    pub model: M,
    pub history: History,
}

/// A trained decoder, as seen by the fold loop
pub trait Model {
    /// Vocabulary the model's output classes are indexed by
    fn vocabulary(&self) -> &Vocabulary;

    /// Fails when windows of this shape cannot be fed to the model
    fn check_input(&self, windows: &Array3<f32>) -> ModelResult<()>;

    /// Class probabilities `[n, n_classes]`
    fn predict(&self, windows: &Array3<f32>) -> ModelResult<Array2<f32>>;

    fn evaluate(&self, data: &Dataset) -> ModelResult<EvalScalars>;

    fn to_bytes(&self) -> ModelResult<Vec<u8>>;

    /// Human-readable layer listing
    fn summary(&self) -> String;
}

/// Creates models by training or by loading persisted bytes
pub trait ModelBackend {
    type Model: Model;

    fn fit(
        &self,
        train: &Dataset,
        dev: &Dataset,
        vocabulary: &Vocabulary,
        seed: u64,
    ) -> ModelResult<Fitted<Self::Model>>;

    fn load(&self, data: &[u8]) -> ModelResult<Self::Model>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_hot_encoding() {
        let data = Dataset::new(Array3::zeros((3, 2, 1)), vec![2, 0, 2]);
        let encoded = data.one_hot(3);

        assert_eq!(encoded.dim(), (3, 3));
        assert_eq!(encoded.row(0).to_vec(), vec![0.0, 0.0, 1.0]);
        assert_eq!(encoded.row(1).to_vec(), vec![1.0, 0.0, 0.0]);
        assert_eq!(encoded.sum(), 3.0);
    }

    #[test]
    fn test_history_final_metrics() {
        let mut history = History::default();
        assert!(history.final_metrics().is_empty());

        for epoch in 0..3 {
            history.push(EpochLogs {
                loss: 3.0 - epoch as f64,
                accuracy: 0.1 * epoch as f64,
                val_loss: 4.0,
                val_accuracy: 0.5,
            });
        }

        let last = history.final_metrics();
        assert_eq!(last[0], ("loss", 1.0));
        assert_eq!(last[3], ("val_accuracy", 0.5));
    }
}
