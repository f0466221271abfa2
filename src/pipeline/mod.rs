// Pipeline execution and monitoring module
// Orchestrates folds, aggregation and run output for one lag

pub mod aggregate;
pub mod config;
pub mod export;
pub mod fold;
pub mod run;
pub mod trace;

pub use aggregate::{aggregate, AggregateError};
pub use config::{resolve_lag, ConfigError, RunConfig, RunMode};
pub use fold::{model_file_name, FoldOutcome, FoldRunner};
pub use run::{run, run_with, RunReport};
pub use trace::{read_trace_file, Stage, TraceBuilder, TraceEntry, TraceError, TraceWriter};

use std::path::PathBuf;
use thiserror::Error;

use crate::eval::{EvalError, TableError};
use crate::labels::VocabularyError;
use crate::model::ModelError;
use crate::signal::SignalError;
use crate::state::StorageError;

/// Any failure that aborts a run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Signal error: {0}")]
    Signal(#[from] SignalError),

    #[error("Vocabulary error: {0}")]
    Vocabulary(#[from] VocabularyError),

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] EvalError),

    #[error("Table error: {0}")]
    Table(#[from] TableError),

    #[error("Aggregation error: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Trace error: {0}")]
    Trace(#[from] TraceError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Fold {fold}: the {split} split has no usable windows")]
    EmptySplit { fold: usize, split: &'static str },

    #[error("Fold {fold}: no trained model at {}", path.display())]
    NoTrainedModel { fold: usize, path: PathBuf },

    #[error("Fold {fold}: no ensemble member could be loaded")]
    NoEnsembleModels { fold: usize },

    #[error("Fold {fold}: model vocabulary ({found} words) does not match the fold's ({expected} words)")]
    VocabularyMismatch {
        fold: usize,
        expected: usize,
        found: usize,
    },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
