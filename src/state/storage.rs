// File system operations for storing run artifacts
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cannot scan '{0}' for artifacts")]
    UnreadableRoot(PathBuf),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Run identifier: `{job}-{task}-{uuid8}`, job and task only when present
pub fn make_nonce(job_id: Option<&str>, task_id: Option<&str>) -> String {
    let short = Uuid::new_v4().simple().to_string()[..8].to_string();
    let mut parts: Vec<&str> = Vec::new();
    if let Some(job) = job_id {
        parts.push(job);
    }
    if let Some(task) = task_id {
        parts.push(task);
    }
    parts.push(&short);
    parts.join("-")
}

/// Directory shared by all runs of one model at one lag
pub fn get_lag_dir(results_dir: &Path, model: &str, lag: i64) -> PathBuf {
    results_dir.join(model).join(lag.to_string())
}

/// Get the directory for a specific run, creating it if needed
pub fn get_run_dir(results_dir: &Path, model: &str, lag: i64, nonce: &str) -> StorageResult<PathBuf> {
    let run_dir = get_lag_dir(results_dir, model, lag).join(nonce);
    fs::create_dir_all(&run_dir)?;
    Ok(run_dir)
}

/// Store a file in the run directory and return its path and SHA256 hash
pub fn store_file(dir: &Path, filename: &str, data: &[u8]) -> StorageResult<(PathBuf, String)> {
    fs::create_dir_all(dir)?;
    let file_path = dir.join(filename);
    let mut file = fs::File::create(&file_path)?;
    file.write_all(data)?;

    Ok((file_path, calculate_sha256(data)))
}

/// Read a file from disk
pub fn read_file(path: &Path) -> StorageResult<Vec<u8>> {
    Ok(fs::read(path)?)
}

/// Calculate SHA256 hash of data
pub fn calculate_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
