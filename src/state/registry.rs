// Artifact discovery
// Lists persisted artifacts that earlier runs left next to the current one

use std::fs;
use std::path::{Path, PathBuf};

use crate::state::storage::{StorageError, StorageResult};

/// Source of previously persisted artifacts
pub trait ArtifactRegistry {
    /// Paths of every artifact named `file_name`, in a stable order
    fn list_artifacts(&self, file_name: &str) -> StorageResult<Vec<PathBuf>>;
}

/// Finds `root/*/file_name` across sibling run directories
#[derive(Debug, Clone)]
pub struct SiblingRunRegistry {
    root: PathBuf,
}

impl SiblingRunRegistry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SiblingRunRegistry { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ArtifactRegistry for SiblingRunRegistry {
    fn list_artifacts(&self, file_name: &str) -> StorageResult<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Err(StorageError::UnreadableRoot(self.root.clone()));
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let run_dir = entry?.path();
            if !run_dir.is_dir() {
                continue;
            }
            let candidate = run_dir.join(file_name);
            if candidate.is_file() {
                found.push(candidate);
            }
        }

        found.sort();
        log::debug!(
            "Found {} '{}' artifacts under {}",
            found.len(),
            file_name,
            self.root.display()
        );
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lists_sibling_artifacts_sorted() {
        let temp_dir = TempDir::new().unwrap();
        for run in ["b-run", "a-run", "c-run"] {
            fs::create_dir_all(temp_dir.path().join(run)).unwrap();
        }
        fs::write(temp_dir.path().join("b-run/model2-fold0.json"), b"{}").unwrap();
        fs::write(temp_dir.path().join("a-run/model2-fold0.json"), b"{}").unwrap();
        fs::write(temp_dir.path().join("c-run/model2-fold1.json"), b"{}").unwrap();
        fs::write(temp_dir.path().join("model2-fold0.json"), b"{}").unwrap();

        let registry = SiblingRunRegistry::new(temp_dir.path());
        let found = registry.list_artifacts("model2-fold0.json").unwrap();

        assert_eq!(
            found,
            vec![
                temp_dir.path().join("a-run/model2-fold0.json"),
                temp_dir.path().join("b-run/model2-fold0.json"),
            ]
        );
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let registry = SiblingRunRegistry::new(temp_dir.path().join("absent"));

        assert!(matches!(
            registry.list_artifacts("model2-fold0.json"),
            Err(StorageError::UnreadableRoot(_))
        ));
    }
}
