// Run progress tracing
// One JSON object per line, appended as stages of a run complete

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TraceError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Stages a run passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Load,
    Fold,
    Train,
    Evaluate,
    Aggregate,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Fold => "fold",
            Stage::Train => "train",
            Stage::Evaluate => "evaluate",
            Stage::Aggregate => "aggregate",
        }
    }
}

/// One line of `trace.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    /// RFC 3339 wall-clock time
    pub timestamp: String,

    /// Milliseconds since the writer was opened
    #[serde(default)]
    pub elapsed_ms: u64,

    pub stage: Stage,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fold: Option<usize>,

    /// Fraction of the whole run done, in [0.0, 1.0]
    pub progress: f32,

    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
}

/// Builds an entry for one stage; finish with [`TraceBuilder::at`]
#[derive(Debug, Clone)]
pub struct TraceBuilder {
    stage: Stage,
    fold: Option<usize>,
    data: Option<Value>,
}

impl TraceBuilder {
    pub fn new(stage: Stage) -> Self {
        TraceBuilder {
            stage,
            fold: None,
            data: None,
        }
    }

    pub fn fold(mut self, fold: usize) -> Self {
        self.fold = Some(fold);
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn at(self, progress: f32, message: impl Into<String>) -> TraceEntry {
        TraceEntry {
            timestamp: Utc::now().to_rfc3339(),
            elapsed_ms: 0,
            stage: self.stage,
            fold: self.fold,
            progress: progress.clamp(0.0, 1.0),
            message: message.into(),
            data: self.data,
        }
    }
}

/// Appends entries to a run's trace file, stamping elapsed time
#[derive(Debug, Clone)]
pub struct TraceWriter {
    file_path: PathBuf,
    opened: Instant,
}

impl TraceWriter {
    pub fn new(file_path: PathBuf) -> Self {
        TraceWriter {
            file_path,
            opened: Instant::now(),
        }
    }

    pub fn write(&self, mut entry: TraceEntry) -> Result<(), TraceError> {
        entry.elapsed_ms = self.opened.elapsed().as_millis() as u64;

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        file.write_all(line.as_bytes())?;
        file.flush()?;

        log::trace!("{} {}", entry.stage.as_str(), entry.message);
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

/// Read back every entry of a trace file, skipping blank lines
pub fn read_trace_file(path: &Path) -> Result<Vec<TraceEntry>, TraceError> {
    let contents = std::fs::read_to_string(path)?;
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(TraceError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_progress_is_clamped() {
        let low = TraceBuilder::new(Stage::Load).at(-0.5, "early");
        assert_eq!(low.progress, 0.0);

        let high = TraceBuilder::new(Stage::Aggregate).at(1.5, "late");
        assert_eq!(high.progress, 1.0);
    }

    #[test]
    fn test_builder_carries_fold_and_data() {
        let entry = TraceBuilder::new(Stage::Fold)
            .fold(3)
            .data(serde_json::json!({ "n_train": 42 }))
            .at(0.6, "Prepared fold 3");

        assert_eq!(entry.stage, Stage::Fold);
        assert_eq!(entry.fold, Some(3));
        assert_eq!(entry.message, "Prepared fold 3");
        assert_eq!(entry.data.unwrap()["n_train"], 42);
    }

    #[test]
    fn test_stage_serializes_lowercase() {
        let json = serde_json::to_string(&Stage::Evaluate).unwrap();
        assert_eq!(json, "\"evaluate\"");
        assert_eq!(Stage::Evaluate.as_str(), "evaluate");
    }

    #[test]
    fn test_writer_appends_lines() {
        let temp_dir = TempDir::new().unwrap();
        let trace_path = temp_dir.path().join("trace.jsonl");
        let writer = TraceWriter::new(trace_path.clone());

        writer
            .write(TraceBuilder::new(Stage::Load).at(0.0, "Loading"))
            .unwrap();
        writer
            .write(TraceBuilder::new(Stage::Evaluate).fold(1).at(1.0, "Done"))
            .unwrap();

        let entries = read_trace_file(&trace_path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stage, Stage::Load);
        assert_eq!(entries[0].fold, None);
        assert_eq!(entries[1].fold, Some(1));
        assert!(entries[1].elapsed_ms >= entries[0].elapsed_ms);

        let raw = std::fs::read_to_string(&trace_path).unwrap();
        let first = raw.lines().next().unwrap();
        assert!(!first.contains("\"fold\""));
        assert!(!first.contains("\"data\""));
    }

    #[test]
    fn test_read_rejects_malformed_line() {
        let temp_dir = TempDir::new().unwrap();
        let trace_path = temp_dir.path().join("trace.jsonl");
        std::fs::write(&trace_path, "{\"stage\":\"load\"}\nnot json\n").unwrap();

        assert!(matches!(
            read_trace_file(&trace_path),
            Err(TraceError::SerializationError(_))
        ));
    }
}
