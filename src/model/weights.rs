// Model parameters
// Dense layer tensors and the arithmetic needed for snapshot averaging

use ndarray::{Array1, Array2};
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

/// Fully connected layer: `y = x · kernel + bias`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dense {
    /// Shape `[inputs, outputs]`
    pub kernel: Array2<f32>,

    /// Shape `[outputs]`
    pub bias: Array1<f32>,
}

impl Dense {
    /// Glorot-normal kernel, zero bias
    pub fn glorot<R: Rng>(inputs: usize, outputs: usize, rng: &mut R) -> Self {
        let std_dev = (2.0 / (inputs + outputs).max(1) as f32).sqrt();
        let kernel = Array2::from_shape_fn((inputs, outputs), |_| {
            let z: f32 = StandardNormal.sample(rng);
            z * std_dev
        });

        Dense {
            kernel,
            bias: Array1::zeros(outputs),
        }
    }

    pub fn zeros(inputs: usize, outputs: usize) -> Self {
        Dense {
            kernel: Array2::zeros((inputs, outputs)),
            bias: Array1::zeros(outputs),
        }
    }

    pub fn inputs(&self) -> usize {
        self.kernel.nrows()
    }

    pub fn outputs(&self) -> usize {
        self.kernel.ncols()
    }

    pub fn param_count(&self) -> usize {
        self.kernel.len() + self.bias.len()
    }

    /// Forward pass over a batch `[batch, inputs]`
    pub fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.kernel) + &self.bias
    }

    /// Sum of squared kernel entries, used for the L2 penalty
    pub fn kernel_sq_norm(&self) -> f32 {
        self.kernel.iter().map(|w| w * w).sum()
    }

    fn blend(&self, next: &Dense, seen: f32) -> Dense {
        Dense {
            kernel: (&self.kernel * seen + &next.kernel) / (seen + 1.0),
            bias: (&self.bias * seen + &next.bias) / (seen + 1.0),
        }
    }
}

/// All trainable parameters of the decoder model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Weights {
    /// Window features to hidden units
    pub encoder: Dense,

    /// Hidden units to class scores
    pub head: Dense,
}

impl Weights {
    pub fn zeros_like(&self) -> Self {
        Weights {
            encoder: Dense::zeros(self.encoder.inputs(), self.encoder.outputs()),
            head: Dense::zeros(self.head.inputs(), self.head.outputs()),
        }
    }

    pub fn param_count(&self) -> usize {
        self.encoder.param_count() + self.head.param_count()
    }
}

/// Parameter snapshot that supports a cumulative running mean
pub trait Snapshot: Clone {
    /// Mean after folding `next` into a mean of `seen` earlier snapshots:
    /// `(self * seen + next) / (seen + 1)`
    fn running_mean(&self, next: &Self, seen: usize) -> Self;
}

impl Snapshot for Weights {
    fn running_mean(&self, next: &Self, seen: usize) -> Self {
        let seen = seen as f32;
        Weights {
            encoder: self.encoder.blend(&next.encoder, seen),
            head: self.head.blend(&next.head, seen),
        }
    }
}
