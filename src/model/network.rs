// Decoder network
// Window features -> ReLU hidden layer -> decoder head, trained with Adam on cross-entropy

use ndarray::{Array, Array1, Array2, Array3, Axis, Dimension, Zip};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::labels::Vocabulary;
use crate::model::decoder::{new_decoder, Decoder, DecoderKind};
use crate::model::hooks::{EarlyStopping, HookAction, TrainingHook, WeightAverager};
use crate::model::weights::{Dense, Weights};
use crate::model::{
    Dataset, EpochLogs, EvalScalars, Fitted, History, Model, ModelBackend, ModelError, ModelResult,
};

/// Persisted format version
const FORMAT_VERSION: u32 = 1;

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const ADAM_EPSILON: f32 = 1e-7;

/// Hyperparameters for one model fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    pub learning_rate: f32,
    pub batch_size: usize,
    /// Upper bound on epochs
    pub epochs: usize,
    /// Early stopping patience; 0 disables early stopping
    pub patience: usize,
    /// Epochs to weight-average at the end; 0 disables averaging
    pub n_weight_avg: usize,
    pub hidden_units: usize,
    /// L2 factor on the encoder kernel
    pub reg: f32,
    /// L2 factor on the head kernel
    pub reg_head: f32,
    /// Dropout rate on hidden units during training
    pub dropout: f32,
    pub decoder: DecoderKind,
    /// 0 silent, 1 debug-level epoch lines, 2 info-level epoch lines
    pub verbose: u8,
}

impl Default for TrainConfig {
    fn default() -> Self {
        TrainConfig {
            learning_rate: 0.01,
            batch_size: 512,
            epochs: 1000,
            patience: 150,
            n_weight_avg: 0,
            hidden_units: 128,
            reg: 0.35,
            reg_head: 0.0,
            dropout: 0.2,
            decoder: DecoderKind::Dense,
            verbose: 2,
        }
    }
}

/// Per-feature standardization fitted on the training windows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    pub mean: Array1<f32>,
    pub scale: Array1<f32>,
}

impl Normalizer {
    pub fn fit(features: &Array2<f32>) -> Self {
        let n_features = features.ncols();
        let mean = features
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(n_features));
        let scale = features
            .std_axis(Axis(0), 0.0)
            .mapv(|sd| if sd > 1e-6 { sd } else { 1.0 });
        Normalizer { mean, scale }
    }

    pub fn apply(&self, features: &Array2<f32>) -> Array2<f32> {
        (features - &self.mean) / &self.scale
    }
}

/// Flatten windows `[n, time, electrodes]` into rows `[n, time * electrodes]`
pub fn flatten_windows(windows: &Array3<f32>) -> Array2<f32> {
    let (n, time, electrodes) = windows.dim();
    let mut flat = Array2::zeros((n, time * electrodes));
    for (idx, window) in windows.outer_iter().enumerate() {
        flat.row_mut(idx)
            .iter_mut()
            .zip(window.iter())
            .for_each(|(dst, src)| *dst = *src);
    }
    flat
}

/// Row-wise softmax of logits
pub fn softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    probs
}

/// Trained decoder: normalizer, encoder layer and head
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderModel {
    version: u32,
    decoder: DecoderKind,
    /// `(time_bins, electrodes)` of the windows the model expects
    window_shape: (usize, usize),
    vocabulary: Vocabulary,
    normalizer: Normalizer,
    weights: Weights,
    reg: f32,
    reg_head: f32,
}

/// Intermediate activations of a forward pass
struct Forward {
    pre_hidden: Array2<f32>,
    hidden: Array2<f32>,
    logits: Array2<f32>,
}

impl DecoderModel {
    pub fn weights(&self) -> &Weights {
        &self.weights
    }

    pub fn window_shape(&self) -> (usize, usize) {
        self.window_shape
    }

    /// Every tensor must agree with the window shape and the vocabulary
    fn check_dimensions(&self) -> ModelResult<()> {
        let (time, electrodes) = self.window_shape;
        let n_features = time * electrodes;
        let encoder = &self.weights.encoder;
        let head = &self.weights.head;

        let checks = [
            ("normalizer mean", self.normalizer.mean.len(), n_features),
            ("normalizer scale", self.normalizer.scale.len(), n_features),
            ("encoder inputs", encoder.inputs(), n_features),
            ("encoder bias", encoder.bias.len(), encoder.outputs()),
            ("head inputs", head.inputs(), encoder.outputs()),
            ("head bias", head.bias.len(), head.outputs()),
            ("head outputs", head.outputs(), self.vocabulary.len()),
        ];
        for (what, found, expected) in checks {
            if found != expected {
                return Err(ModelError::Incompatible(format!(
                    "{} has length {}, expected {}",
                    what, found, expected
                )));
            }
        }
        Ok(())
    }

    fn features(&self, windows: &Array3<f32>) -> Array2<f32> {
        self.normalizer.apply(&flatten_windows(windows))
    }

    /// Forward pass, with an optional dropout mask already scaled by 1/(1-rate)
    fn forward(&self, features: &Array2<f32>, mask: Option<&Array2<f32>>) -> Forward {
        let pre_hidden = self.weights.encoder.forward(features);
        let mut hidden = pre_hidden.mapv(|v| v.max(0.0));
        if let Some(mask) = mask {
            hidden *= mask;
        }
        let logits = self.weights.head.apply(&hidden);
        Forward {
            pre_hidden,
            hidden,
            logits,
        }
    }

    fn l2_penalty(&self) -> f64 {
        (self.reg * self.weights.encoder.kernel_sq_norm()
            + self.reg_head * self.weights.head.kernel_sq_norm()) as f64
    }

    /// Cross-entropy sum and number of correct argmax predictions
    fn score_batch(logits: &Array2<f32>, labels: &[usize]) -> (f64, usize) {
        let probs = softmax(logits);
        let mut loss = 0.0;
        let mut correct = 0;

        for (row, &label) in probs.rows().into_iter().zip(labels) {
            loss -= (row[label].max(1e-12) as f64).ln();
            if argmax(row.iter().copied()) == label {
                correct += 1;
            }
        }

        (loss, correct)
    }

    /// Gradient of mean cross-entropy plus L2 penalty for one batch
    fn gradients(
        &self,
        features: &Array2<f32>,
        labels: &[usize],
        mask: Option<&Array2<f32>>,
        pass: &Forward,
    ) -> Weights {
        let batch = labels.len().max(1) as f32;

        let mut d_logits = softmax(&pass.logits);
        for (mut row, &label) in d_logits.rows_mut().into_iter().zip(labels) {
            row[label] -= 1.0;
        }
        d_logits /= batch;

        let head = &self.weights.head;
        let d_head_kernel = pass.hidden.t().dot(&d_logits) + &(&head.kernel * (2.0 * self.reg_head));
        let d_head_bias = d_logits.sum_axis(Axis(0));

        let mut d_hidden = d_logits.dot(&head.kernel.t());
        if let Some(mask) = mask {
            d_hidden *= mask;
        }
        Zip::from(&mut d_hidden)
            .and(&pass.pre_hidden)
            .for_each(|g, &z| {
                if z <= 0.0 {
                    *g = 0.0;
                }
            });

        let encoder = &self.weights.encoder;
        let d_enc_kernel = features.t().dot(&d_hidden) + &(&encoder.kernel * (2.0 * self.reg));
        let d_enc_bias = d_hidden.sum_axis(Axis(0));

        Weights {
            encoder: Dense {
                kernel: d_enc_kernel,
                bias: d_enc_bias,
            },
            head: Dense {
                kernel: d_head_kernel,
                bias: d_head_bias,
            },
        }
    }

    /// Loss and accuracy over a feature matrix without dropout
    fn score(&self, features: &Array2<f32>, labels: &[usize]) -> EvalScalars {
        if labels.is_empty() {
            return EvalScalars {
                loss: 0.0,
                accuracy: 0.0,
            };
        }
        let pass = self.forward(features, None);
        let (loss_sum, correct) = Self::score_batch(&pass.logits, labels);
        EvalScalars {
            loss: loss_sum / labels.len() as f64 + self.l2_penalty(),
            accuracy: correct as f64 / labels.len() as f64,
        }
    }
}

impl Model for DecoderModel {
    fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    fn check_input(&self, windows: &Array3<f32>) -> ModelResult<()> {
        let (_, time, electrodes) = windows.dim();
        if (time, electrodes) != self.window_shape {
            return Err(ModelError::ShapeMismatch(format!(
                "model expects windows of {:?}, got ({}, {})",
                self.window_shape, time, electrodes
            )));
        }
        Ok(())
    }

    fn predict(&self, windows: &Array3<f32>) -> ModelResult<Array2<f32>> {
        self.check_input(windows)?;
        let pass = self.forward(&self.features(windows), None);
        Ok(softmax(&pass.logits))
    }

    fn evaluate(&self, data: &Dataset) -> ModelResult<EvalScalars> {
        self.check_input(&data.windows)?;
        Ok(self.score(&self.features(&data.windows), &data.labels))
    }

    fn to_bytes(&self) -> ModelResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn summary(&self) -> String {
        let (time, electrodes) = self.window_shape;
        let encoder = &self.weights.encoder;
        let head = &self.weights.head;
        let mut lines = vec![
            format!("Decoder model ({:?} head)", self.decoder),
            format!("{:<24}{:<24}{:>12}", "Layer", "Output shape", "Params"),
            format!("{:<24}{:<24}{:>12}", "input", format!("({}, {})", time, electrodes), 0),
            format!("{:<24}{:<24}{:>12}", "flatten+normalize", format!("({})", encoder.inputs()), 0),
            format!(
                "{:<24}{:<24}{:>12}",
                "dense_relu",
                format!("({})", encoder.outputs()),
                encoder.param_count()
            ),
            format!(
                "{:<24}{:<24}{:>12}",
                "decoder",
                format!("({})", head.outputs()),
                head.param_count()
            ),
        ];
        lines.push(format!("Total params: {}", self.weights.param_count()));
        lines.push(format!("Vocabulary: {} words", self.vocabulary.len()));
        lines.join("\n") + "\n"
    }
}

/// Builds and trains `DecoderModel`s
#[derive(Debug, Clone)]
pub struct DecoderBackend {
    config: TrainConfig,
}

impl DecoderBackend {
    pub fn new(config: TrainConfig) -> Self {
        DecoderBackend { config }
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    fn log_epoch(&self, epoch: usize, logs: &EpochLogs) {
        let line = format!(
            "Epoch {}/{} - loss: {:.4} - accuracy: {:.4} - val_loss: {:.4} - val_accuracy: {:.4}",
            epoch + 1,
            self.config.epochs,
            logs.loss,
            logs.accuracy,
            logs.val_loss,
            logs.val_accuracy
        );
        match self.config.verbose {
            0 => {}
            1 => log::debug!("{}", line),
            _ => log::info!("{}", line),
        }
    }

    fn hooks(&self) -> Vec<Box<dyn TrainingHook<Weights>>> {
        let mut hooks: Vec<Box<dyn TrainingHook<Weights>>> = Vec::new();
        if self.config.patience > 0 {
            hooks.push(Box::new(EarlyStopping::<Weights>::new(self.config.patience)));
        }
        if self.config.n_weight_avg > 0 {
            hooks.push(Box::new(WeightAverager::<Weights>::new(
                self.config.n_weight_avg,
                self.config.patience,
            )));
        }
        hooks
    }

    fn dropout_mask<R: Rng>(&self, rows: usize, cols: usize, rng: &mut R) -> Option<Array2<f32>> {
        let rate = self.config.dropout;
        if rate <= 0.0 {
            return None;
        }
        let keep = 1.0 - rate;
        Some(Array2::from_shape_fn((rows, cols), |_| {
            if rng.gen::<f32>() < keep {
                1.0 / keep
            } else {
                0.0
            }
        }))
    }
}

impl ModelBackend for DecoderBackend {
    type Model = DecoderModel;

    fn fit(
        &self,
        train: &Dataset,
        dev: &Dataset,
        vocabulary: &Vocabulary,
        seed: u64,
    ) -> ModelResult<Fitted<DecoderModel>> {
        if train.is_empty() {
            return Err(ModelError::EmptyDataset("train"));
        }
        if dev.is_empty() {
            return Err(ModelError::EmptyDataset("dev"));
        }

        let (_, time, electrodes) = train.windows.dim();
        if dev.windows.dim().1 != time || dev.windows.dim().2 != electrodes {
            return Err(ModelError::ShapeMismatch(
                "train and dev windows differ in shape".to_string(),
            ));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let raw_train = flatten_windows(&train.windows);
        let normalizer = Normalizer::fit(&raw_train);
        let train_features = normalizer.apply(&raw_train);
        let dev_features = normalizer.apply(&flatten_windows(&dev.windows));

        let n_features = train_features.ncols();
        let hidden_units = self.config.hidden_units.max(1);
        let encoder = Dense::glorot(n_features, hidden_units, &mut rng);
        let head = new_decoder(self.config.decoder, hidden_units, vocabulary.len(), &mut rng)?;

        let mut model = DecoderModel {
            version: FORMAT_VERSION,
            decoder: self.config.decoder,
            window_shape: (time, electrodes),
            vocabulary: vocabulary.clone(),
            normalizer,
            weights: Weights { encoder, head },
            reg: self.config.reg,
            reg_head: self.config.reg_head,
        };

        let mut optimizer = Adam::new(&model.weights, self.config.learning_rate);
        let mut hooks = self.hooks();
        for hook in hooks.iter_mut() {
            hook.on_train_begin();
        }

        let mut history = History::default();
        let mut order: Vec<usize> = (0..train.len()).collect();
        let batch_size = self.config.batch_size.max(1);

        for epoch in 0..self.config.epochs {
            order.shuffle(&mut rng);
            let mut loss_sum = 0.0;
            let mut correct = 0;

            for batch in order.chunks(batch_size) {
                let features = train_features.select(Axis(0), batch);
                let labels: Vec<usize> = batch.iter().map(|&i| train.labels[i]).collect();
                let mask = self.dropout_mask(batch.len(), hidden_units, &mut rng);

                let pass = model.forward(&features, mask.as_ref());
                let (batch_loss, batch_correct) = DecoderModel::score_batch(&pass.logits, &labels);
                loss_sum += batch_loss;
                correct += batch_correct;

                let grads = model.gradients(&features, &labels, mask.as_ref(), &pass);
                optimizer.step(&mut model.weights, &grads);
            }

            let val = model.score(&dev_features, &dev.labels);
            let logs = EpochLogs {
                loss: loss_sum / train.len() as f64 + model.l2_penalty(),
                accuracy: correct as f64 / train.len() as f64,
                val_loss: val.loss,
                val_accuracy: val.accuracy,
            };
            self.log_epoch(epoch, &logs);
            history.push(logs.clone());

            let mut stop = false;
            for hook in hooks.iter_mut() {
                if hook.on_epoch_end(epoch, &logs, &model.weights) == HookAction::Stop {
                    stop = true;
                }
            }
            if stop {
                break;
            }
        }

        for hook in hooks.iter_mut() {
            if let Some(weights) = hook.on_train_end(&model.weights) {
                model.weights = weights;
            }
        }

        Ok(Fitted { model, history })
    }

    fn load(&self, data: &[u8]) -> ModelResult<DecoderModel> {
        let model: DecoderModel = serde_json::from_slice(data)?;
        if model.version != FORMAT_VERSION {
            return Err(ModelError::Incompatible(format!(
                "unsupported model format version {}",
                model.version
            )));
        }
        model.check_dimensions()?;
        Ok(model)
    }
}

/// Adam optimizer state mirroring the weight layout
struct Adam {
    learning_rate: f32,
    step: i32,
    m: Weights,
    v: Weights,
}

impl Adam {
    fn new(weights: &Weights, learning_rate: f32) -> Self {
        Adam {
            learning_rate,
            step: 0,
            m: weights.zeros_like(),
            v: weights.zeros_like(),
        }
    }

    fn step(&mut self, weights: &mut Weights, grads: &Weights) {
        self.step += 1;
        let lr_t = self.learning_rate * (1.0 - ADAM_BETA2.powi(self.step)).sqrt()
            / (1.0 - ADAM_BETA1.powi(self.step));

        let (m, v) = (&mut self.m, &mut self.v);
        adam_update(
            &mut weights.encoder.kernel,
            &grads.encoder.kernel,
            &mut m.encoder.kernel,
            &mut v.encoder.kernel,
            lr_t,
        );
        adam_update(
            &mut weights.encoder.bias,
            &grads.encoder.bias,
            &mut m.encoder.bias,
            &mut v.encoder.bias,
            lr_t,
        );
        adam_update(
            &mut weights.head.kernel,
            &grads.head.kernel,
            &mut m.head.kernel,
            &mut v.head.kernel,
            lr_t,
        );
        adam_update(
            &mut weights.head.bias,
            &grads.head.bias,
            &mut m.head.bias,
            &mut v.head.bias,
            lr_t,
        );
    }
}

fn adam_update<D: Dimension>(
    param: &mut Array<f32, D>,
    grad: &Array<f32, D>,
    m: &mut Array<f32, D>,
    v: &mut Array<f32, D>,
    lr_t: f32,
) {
    Zip::from(param)
        .and(grad)
        .and(m)
        .and(v)
        .for_each(|p, &g, m, v| {
            *m = ADAM_BETA1 * *m + (1.0 - ADAM_BETA1) * g;
            *v = ADAM_BETA2 * *v + (1.0 - ADAM_BETA2) * g * g;
            *p -= lr_t * *m / (v.sqrt() + ADAM_EPSILON);
        });
}

/// Index of the largest value; the first one wins ties
pub fn argmax<I: IntoIterator<Item = f32>>(values: I) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (idx, value) in values.into_iter().enumerate() {
        if value > best_value {
            best = idx;
            best_value = value;
        }
    }
    best
}
