// Lexdecode command line
// Parses flags into a run configuration and runs all folds for one lag

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use lexdecode::pipeline::config::{JOB_ID_VAR, TASK_ID_VAR};
use lexdecode::pipeline::{resolve_lag, PipelineResult};
use lexdecode::RunConfig;

/// Train and evaluate a word decoder on lag-shifted signal windows
#[derive(Parser, Debug)]
#[command(name = "lexdecode", version)]
#[command(about = "Decode words from binned neural signal with 5-fold cross-validation", long_about = None)]
struct Cli {
    /// Lag in samples between word onset and window center
    #[arg(long, allow_negative_numbers = true)]
    lag: Option<i64>,

    /// Candidate lags, one per array task
    #[arg(long, num_args = 1.., allow_negative_numbers = true)]
    lags: Vec<i64>,

    /// Signal archive (JSON)
    #[arg(long)]
    signal_file: PathBuf,

    /// Label archive (JSON array or .jsonl)
    #[arg(long)]
    label_file: PathBuf,

    /// Half the window length, in bins
    #[arg(long, default_value_t = 16)]
    half_window: usize,

    #[arg(long, default_value_t = 0.01)]
    lr: f32,

    #[arg(long, default_value_t = 512)]
    batch_size: usize,

    /// Training epochs; 0 reuses the models already in the run directory
    #[arg(long, default_value_t = 1000)]
    fine_epochs: usize,

    /// Early stopping patience in epochs
    #[arg(long, default_value_t = 150)]
    patience: usize,

    /// Use the pretrained language-model decoder head
    #[arg(long)]
    lm_head: bool,

    /// Average the models persisted by earlier runs instead of training
    #[arg(long)]
    ensemble: bool,

    /// Epochs of weights to average at the end of training
    #[arg(long, default_value_t = 0)]
    n_weight_avg: usize,

    #[arg(long, default_value_t = 128)]
    hidden_units: usize,

    /// L2 factor on the hidden layer
    #[arg(long, default_value_t = 0.35)]
    reg: f32,

    /// L2 factor on the decoder head
    #[arg(long, default_value_t = 0.0)]
    reg_head: f32,

    #[arg(long, default_value_t = 0.2)]
    dropout: f32,

    /// Output name under the results directory
    #[arg(long, default_value = "default-out")]
    model: String,

    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Fixed run directory name instead of a generated one
    #[arg(long)]
    nonce: Option<String>,

    #[arg(long, default_value_t = 123)]
    seed: u64,

    /// Epoch logging: 0 silent, 1 debug, 2 info
    #[arg(long, default_value_t = 2)]
    verbose: u8,

    #[arg(long, env = JOB_ID_VAR, hide_env_values = true)]
    job_id: Option<String>,

    #[arg(long, env = TASK_ID_VAR, hide_env_values = true)]
    task_id: Option<String>,
}

impl Cli {
    fn into_config(self) -> PipelineResult<RunConfig> {
        let lag = resolve_lag(self.lag, &self.lags, self.task_id.as_deref())?;
        Ok(RunConfig {
            lag,
            lags: self.lags,
            signal_file: self.signal_file,
            label_file: self.label_file,
            half_window: self.half_window,
            lr: self.lr,
            batch_size: self.batch_size,
            fine_epochs: self.fine_epochs,
            patience: self.patience,
            lm_head: self.lm_head,
            ensemble: self.ensemble,
            n_weight_avg: self.n_weight_avg,
            hidden_units: self.hidden_units,
            reg: self.reg,
            reg_head: self.reg_head,
            dropout: self.dropout,
            model: self.model,
            results_dir: self.results_dir,
            seed: self.seed,
            verbose: self.verbose,
            nonce: self.nonce,
            job_id: self.job_id,
            task_id: self.task_id,
        })
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();
    let outcome = cli.into_config().and_then(|config| lexdecode::run(&config));

    match outcome {
        Ok(report) => {
            log::info!("Results written to {}", report.run_dir.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            // Wrapped errors already print their cause
            log::error!("Run failed: {}", e);
            ExitCode::from(1)
        }
    }
}
