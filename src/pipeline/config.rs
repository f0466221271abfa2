// Run configuration
// Immutable settings for one decoding run, resolved once from CLI and environment

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::model::{DecoderKind, TrainConfig};
use crate::signal::WindowSpec;
use crate::state::storage::make_nonce;

/// Environment variable naming the array job
pub const JOB_ID_VAR: &str = "SLURM_ARRAY_JOB_ID";
/// Environment variable carrying the 1-based array task index
pub const TASK_ID_VAR: &str = "SLURM_ARRAY_TASK_ID";

/// Run directory name shared by ensemble runs
pub const ENSEMBLE_NONCE: &str = "ensemble";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Array task id '{0}' is not a positive integer")]
    BadTaskId(String),

    #[error("Array task {task_id} does not select one of {count} lags")]
    LagOutOfRange { task_id: usize, count: usize },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// How each fold obtains its models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Fit a fresh model per fold and persist it
    Train,
    /// Average every model persisted by sibling runs
    Ensemble,
    /// Load the model this run directory already holds
    Reuse,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Lag in signal samples, after resolution
    pub lag: i64,
    pub lags: Vec<i64>,
    pub signal_file: PathBuf,
    pub label_file: PathBuf,
    pub half_window: usize,
    pub lr: f32,
    pub batch_size: usize,
    pub fine_epochs: usize,
    pub patience: usize,
    pub lm_head: bool,
    pub ensemble: bool,
    pub n_weight_avg: usize,
    pub hidden_units: usize,
    pub reg: f32,
    pub reg_head: f32,
    pub dropout: f32,
    /// Output name under the results directory
    pub model: String,
    pub results_dir: PathBuf,
    pub seed: u64,
    pub verbose: u8,
    /// Fixed run directory name; reuse mode points this at a trained run
    pub nonce: Option<String>,
    pub job_id: Option<String>,
    pub task_id: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        let train = TrainConfig::default();
        RunConfig {
            lag: 0,
            lags: Vec::new(),
            signal_file: PathBuf::new(),
            label_file: PathBuf::new(),
            half_window: 16,
            lr: train.learning_rate,
            batch_size: train.batch_size,
            fine_epochs: train.epochs,
            patience: train.patience,
            lm_head: false,
            ensemble: false,
            n_weight_avg: train.n_weight_avg,
            hidden_units: train.hidden_units,
            reg: train.reg,
            reg_head: train.reg_head,
            dropout: train.dropout,
            model: "default-out".to_string(),
            results_dir: PathBuf::from("results"),
            seed: 123,
            verbose: train.verbose,
            nonce: None,
            job_id: None,
            task_id: None,
        }
    }
}

impl RunConfig {
    /// Check value ranges; called once before a run starts
    pub fn validate(&self) -> ConfigResult<()> {
        if self.half_window == 0 {
            return Err(invalid("half_window", "must be positive"));
        }
        if self.batch_size == 0 {
            return Err(invalid("batch_size", "must be positive"));
        }
        if self.lr.is_nan() || self.lr <= 0.0 {
            return Err(invalid("lr", format!("must be positive, got {}", self.lr)));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(invalid(
                "dropout",
                format!("must lie in [0, 1), got {}", self.dropout),
            ));
        }
        if self.reg.is_nan() || self.reg < 0.0 {
            return Err(invalid("reg", "must be non-negative"));
        }
        if self.reg_head.is_nan() || self.reg_head < 0.0 {
            return Err(invalid("reg_head", "must be non-negative"));
        }
        if self.model.is_empty() {
            return Err(invalid("model", "must not be empty"));
        }
        Ok(())
    }

    pub fn mode(&self) -> RunMode {
        if self.ensemble {
            RunMode::Ensemble
        } else if self.fine_epochs > 0 {
            RunMode::Train
        } else {
            RunMode::Reuse
        }
    }

    pub fn window_spec(&self) -> WindowSpec {
        WindowSpec::new(self.lag, self.half_window)
    }

    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            learning_rate: self.lr,
            batch_size: self.batch_size,
            epochs: self.fine_epochs,
            patience: self.patience,
            n_weight_avg: self.n_weight_avg,
            hidden_units: self.hidden_units,
            reg: self.reg,
            reg_head: self.reg_head,
            dropout: self.dropout,
            decoder: DecoderKind::from_lm_flag(self.lm_head),
            verbose: self.verbose,
        }
    }

    /// Directory name for this run
    ///
    /// Ensemble runs always use `ensemble`; otherwise an explicit nonce wins
    /// over a generated one.
    pub fn run_nonce(&self) -> String {
        match (self.mode(), &self.nonce) {
            (RunMode::Ensemble, _) => ENSEMBLE_NONCE.to_string(),
            (_, Some(nonce)) => nonce.clone(),
            (_, None) => make_nonce(self.job_id.as_deref(), self.task_id.as_deref()),
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Pick the lag: explicit value, else the array task's entry of `lags`, else 0
pub fn resolve_lag(lag: Option<i64>, lags: &[i64], task_id: Option<&str>) -> ConfigResult<i64> {
    if let Some(lag) = lag {
        return Ok(lag);
    }

    match task_id {
        Some(raw) if !lags.is_empty() => {
            let task: usize = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::BadTaskId(raw.to_string()))?;
            if task == 0 || task > lags.len() {
                return Err(ConfigError::LagOutOfRange {
                    task_id: task,
                    count: lags.len(),
                });
            }
            Ok(lags[task - 1])
        }
        _ => Ok(0),
    }
}
