// Run output
// Writes configuration, results, tables, histories and the artifact manifest

use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

use crate::eval::{FoldResult, MetricValue, Table};
use crate::model::History;
use crate::pipeline::aggregate::AVG_PREFIX;
use crate::pipeline::config::RunConfig;
use crate::pipeline::{PipelineError, PipelineResult};
use crate::state::storage::{calculate_sha256, read_file, store_file};
use crate::state::{Artifact, ArtifactKind, ArtifactManifest};

pub const ARGS_FILE: &str = "args.json";
pub const RESULTS_FILE: &str = "results.json";
pub const HISTORY_FILE: &str = "epoch-history.csv";
pub const SUMMARY_FILE: &str = "model2-summary.txt";
pub const MANIFEST_FILE: &str = "artifacts.json";
pub const TRACE_FILE: &str = "trace.jsonl";

const TOPK_TABLE: &str = "test_topk_df";
const ROC_TABLE: &str = "test_rocauc_df";
const JOINED_TABLE: &str = "test_topk_rocauc_df";
const JOIN_KEYS: [&str; 3] = ["word", "ds", "fold"];

/// Stores files in a run directory and keeps the manifest of what was written
#[derive(Debug)]
pub struct RunWriter {
    run_dir: PathBuf,
    manifest: ArtifactManifest,
}

impl RunWriter {
    pub fn new(run_dir: &Path) -> Self {
        RunWriter {
            run_dir: run_dir.to_path_buf(),
            manifest: ArtifactManifest::new(run_dir),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Record an artifact written elsewhere, e.g. a model stored by a fold
    pub fn push(&mut self, artifact: Artifact) {
        self.manifest.push(artifact);
    }

    pub fn store(
        &mut self,
        kind: ArtifactKind,
        filename: &str,
        data: &[u8],
    ) -> PipelineResult<PathBuf> {
        let (path, sha256) = store_file(&self.run_dir, filename, data)?;
        log::debug!("Wrote {} ({} bytes)", path.display(), data.len());
        self.manifest.push(Artifact::new(kind, &path, sha256, data.len()));
        Ok(path)
    }

    /// The run configuration, verbatim
    pub fn write_args(&mut self, config: &RunConfig) -> PipelineResult<PathBuf> {
        let data = serde_json::to_vec_pretty(config)?;
        self.store(ArtifactKind::Config, ARGS_FILE, &data)
    }

    /// Averaged scalars, per-fold scalars under `runs`, and the config under `args`
    pub fn write_results(
        &mut self,
        summary: &FoldResult,
        folds: &[FoldResult],
        config: &RunConfig,
    ) -> PipelineResult<PathBuf> {
        let data = serde_json::to_vec_pretty(&results_record(summary, folds, config)?)?;
        self.store(ArtifactKind::Results, RESULTS_FILE, &data)
    }

    /// One CSV per aggregated table, plus the top-k/ROC join when both exist
    pub fn write_tables(&mut self, summary: &FoldResult) -> PipelineResult<Vec<PathBuf>> {
        let mut written = Vec::new();
        for (name, value) in summary.iter() {
            if let MetricValue::Table(table) = value {
                let filename = format!("{}.csv", name);
                let csv = table_csv(table)?;
                written.push(self.store(ArtifactKind::Table, &filename, &csv)?);
            }
        }

        let topk = summary.table(&format!("{}{}", AVG_PREFIX, TOPK_TABLE));
        let roc = summary.table(&format!("{}{}", AVG_PREFIX, ROC_TABLE));
        if let (Some(topk), Some(roc)) = (topk, roc) {
            let joined = topk.inner_join(roc, &JOIN_KEYS)?;
            let filename = format!("{}{}.csv", AVG_PREFIX, JOINED_TABLE);
            let csv = table_csv(&joined)?;
            written.push(self.store(ArtifactKind::Table, &filename, &csv)?);
        }

        Ok(written)
    }

    /// Every fold's epoch-by-epoch training curves in one CSV
    pub fn write_history(&mut self, histories: &[(usize, History)]) -> PipelineResult<PathBuf> {
        let table = history_table(histories)?;
        let csv = table_csv(&table)?;
        self.store(ArtifactKind::History, HISTORY_FILE, &csv)
    }

    pub fn write_summary(&mut self, summary: &str) -> PipelineResult<PathBuf> {
        self.store(ArtifactKind::Summary, SUMMARY_FILE, summary.as_bytes())
    }

    /// Register the trace file and write `artifacts.json`
    pub fn finish(mut self) -> PipelineResult<ArtifactManifest> {
        let trace_path = self.run_dir.join(TRACE_FILE);
        if trace_path.is_file() {
            let data = read_file(&trace_path)?;
            self.manifest.push(Artifact::new(
                ArtifactKind::Trace,
                &trace_path,
                calculate_sha256(&data),
                data.len(),
            ));
        }

        let data = serde_json::to_vec_pretty(&self.manifest)?;
        store_file(&self.run_dir, MANIFEST_FILE, &data)?;
        Ok(self.manifest)
    }
}

/// JSON object written to `results.json`
pub fn results_record(
    summary: &FoldResult,
    folds: &[FoldResult],
    config: &RunConfig,
) -> PipelineResult<Value> {
    let mut record = Map::new();
    for (name, value) in summary.scalars() {
        record.insert(name, json!(value));
    }
    let runs: Vec<Value> = folds.iter().map(|fold| json!(fold.scalars())).collect();
    record.insert("runs".to_string(), Value::Array(runs));
    record.insert("args".to_string(), serde_json::to_value(config)?);
    Ok(Value::Object(record))
}

/// Header line then one record per row
pub fn table_csv(table: &Table) -> PipelineResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|cell| cell.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| PipelineError::Csv(csv::Error::from(e.into_error())))
}

fn history_table(histories: &[(usize, History)]) -> PipelineResult<Table> {
    let mut table = Table::new(&[
        "fold",
        "epoch",
        "loss",
        "accuracy",
        "val_loss",
        "val_accuracy",
    ]);
    for (fold, history) in histories {
        for (epoch, logs) in history.epochs.iter().enumerate() {
            table.push_row(vec![
                (*fold).into(),
                (epoch + 1).into(),
                logs.loss.into(),
                logs.accuracy.into(),
                logs.val_loss.into(),
                logs.val_accuracy.into(),
            ])?;
        }
    }
    Ok(table)
}
