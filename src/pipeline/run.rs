// Run driver
// Loads inputs, runs the five folds in order, aggregates and writes the run directory

use serde_json::json;
use std::path::PathBuf;

use crate::eval::{Evaluator, FoldResult, RankEvaluator};
use crate::labels::NUM_FOLDS;
use crate::model::{DecoderBackend, ModelBackend};
use crate::pipeline::aggregate::aggregate;
use crate::pipeline::config::RunConfig;
use crate::pipeline::export::{RunWriter, TRACE_FILE};
use crate::pipeline::fold::FoldRunner;
use crate::pipeline::trace::{Stage, TraceBuilder, TraceWriter};
use crate::pipeline::PipelineResult;
use crate::signal;
use crate::state::storage::{get_lag_dir, get_run_dir};
use crate::state::{ArtifactManifest, SiblingRunRegistry};

/// Everything a finished run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_dir: PathBuf,
    /// `avg_` metrics over all folds
    pub summary: FoldResult,
    pub folds: Vec<FoldResult>,
    pub manifest: ArtifactManifest,
}

/// Run with the built-in decoder and evaluator
pub fn run(config: &RunConfig) -> PipelineResult<RunReport> {
    let backend = DecoderBackend::new(config.train_config());
    run_with(config, &backend, &RankEvaluator::default())
}

pub fn run_with<B, E>(config: &RunConfig, backend: &B, evaluator: &E) -> PipelineResult<RunReport>
where
    B: ModelBackend,
    E: Evaluator,
{
    config.validate()?;

    let nonce = config.run_nonce();
    let run_dir = get_run_dir(&config.results_dir, &config.model, config.lag, &nonce)?;
    log::info!(
        "Run {} ({:?} mode, lag {}) writing to {}",
        nonce,
        config.mode(),
        config.lag,
        run_dir.display()
    );

    let trace = TraceWriter::new(run_dir.join(TRACE_FILE));
    let mut writer = RunWriter::new(&run_dir);
    writer.write_args(config)?;

    trace.write(TraceBuilder::new(Stage::Load).at(0.0, "Loading signal and labels"))?;
    let (store, events) = signal::load(&config.signal_file, &config.label_file)?;
    trace.write(
        TraceBuilder::new(Stage::Load)
            .data(json!({
                "bins": store.total_bins(),
                "electrodes": store.electrode_count(),
                "segments": store.stitch_index().segment_count(),
                "events": events.len(),
            }))
            .at(0.0, "Loaded inputs"),
    )?;

    let lag_dir = get_lag_dir(&config.results_dir, &config.model, config.lag);
    let registry = SiblingRunRegistry::new(lag_dir);
    let runner = FoldRunner {
        config,
        store: &store,
        events: &events,
        backend,
        evaluator,
        registry: &registry,
        run_dir: &run_dir,
        trace: Some(&trace),
    };

    let mut folds = Vec::with_capacity(NUM_FOLDS);
    let mut histories = Vec::new();
    let mut model_summary = None;
    for fold in 0..NUM_FOLDS {
        let outcome = runner.run_fold(fold)?;
        for artifact in outcome.artifacts {
            writer.push(artifact);
        }
        if let Some(history) = outcome.history {
            histories.push((fold, history));
        }
        if model_summary.is_none() {
            model_summary = outcome.summary;
        }
        folds.push(outcome.result);
    }

    let summary = aggregate(&folds)?;
    writer.write_results(&summary, &folds, config)?;
    writer.write_tables(&summary)?;
    if !histories.is_empty() {
        writer.write_history(&histories)?;
    }
    if let Some(text) = model_summary {
        writer.write_summary(&text)?;
    }

    trace.write(
        TraceBuilder::new(Stage::Aggregate)
            .data(json!({
                "folds": folds.len(),
                "avg_test_top1_acc": summary.scalar("avg_test_top1_acc"),
            }))
            .at(1.0, "Aggregated folds"),
    )?;

    let manifest = writer.finish()?;
    log::info!(
        "Finished run {}: {} artifacts, avg_test_top1_acc {:?}",
        nonce,
        manifest.artifacts.len(),
        summary.scalar("avg_test_top1_acc")
    );

    Ok(RunReport {
        run_dir,
        summary,
        folds,
        manifest,
    })
}
