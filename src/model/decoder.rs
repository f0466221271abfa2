// Decoder heads
// Maps encoder features to class scores; supports multiple head variants

use ndarray::Array2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::model::weights::Dense;
use crate::model::ModelError;

/// Head variant placed on top of the encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecoderKind {
    /// Trainable dense layer producing one logit per vocabulary word
    Dense,

    /// Frozen pretrained language-model decoder
    /// Needs an external model runtime that is not bundled
    LanguageModel,
}

impl DecoderKind {
    /// Select the head from the `--lm-head` flag
    pub fn from_lm_flag(lm_head: bool) -> Self {
        if lm_head {
            DecoderKind::LanguageModel
        } else {
            DecoderKind::Dense
        }
    }

    /// Whether this head can be built in-process
    pub fn is_available(&self) -> bool {
        matches!(self, DecoderKind::Dense)
    }
}

/// Anything that turns a batch of features into class scores
pub trait Decoder {
    /// Scores of shape `[batch, n_classes]` (logits, not probabilities)
    fn apply(&self, features: &Array2<f32>) -> Array2<f32>;

    fn n_classes(&self) -> usize;
}

impl Decoder for Dense {
    fn apply(&self, features: &Array2<f32>) -> Array2<f32> {
        self.forward(features)
    }

    fn n_classes(&self) -> usize {
        self.outputs()
    }
}

/// Build a freshly initialized head of the requested kind
pub fn new_decoder<R: Rng>(
    kind: DecoderKind,
    feature_dim: usize,
    n_classes: usize,
    rng: &mut R,
) -> Result<Dense, ModelError> {
    match kind {
        DecoderKind::Dense => Ok(Dense::glorot(feature_dim, n_classes, rng)),
        DecoderKind::LanguageModel => Err(ModelError::DecoderUnavailable(kind)),
    }
}
