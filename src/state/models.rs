// Data models for run artifacts
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub kind: ArtifactKind,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fold: Option<usize>,
    pub created_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(kind: ArtifactKind, path: &Path, sha256: String, bytes: usize) -> Self {
        Artifact {
            kind,
            path: path.to_string_lossy().into_owned(),
            sha256,
            bytes: bytes as u64,
            fold: None,
            created_at: Utc::now(),
        }
    }

    pub fn for_fold(mut self, fold: usize) -> Self {
        self.fold = Some(fold);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Model,
    Config,
    Results,
    Table,
    History,
    Summary,
    Trace,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Model => "model",
            ArtifactKind::Config => "config",
            ArtifactKind::Results => "results",
            ArtifactKind::Table => "table",
            ArtifactKind::History => "history",
            ArtifactKind::Summary => "summary",
            ArtifactKind::Trace => "trace",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a run wrote, in write order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub run_dir: String,
    pub artifacts: Vec<Artifact>,
}

impl ArtifactManifest {
    pub fn new(run_dir: &Path) -> Self {
        ArtifactManifest {
            run_dir: run_dir.to_string_lossy().into_owned(),
            artifacts: Vec::new(),
        }
    }

    pub fn push(&mut self, artifact: Artifact) {
        self.artifacts.push(artifact);
    }

    pub fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(move |a| a.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_artifact_kind_serializes_lowercase() {
        let json = serde_json::to_string(&ArtifactKind::Model).unwrap();
        assert_eq!(json, "\"model\"");
        assert_eq!(ArtifactKind::History.to_string(), "history");
    }

    #[test]
    fn test_manifest_filters_by_kind() {
        let mut manifest = ArtifactManifest::new(&PathBuf::from("results/m/0/abc"));
        manifest.push(
            Artifact::new(ArtifactKind::Model, &PathBuf::from("model2-fold0.json"), "aa".into(), 3)
                .for_fold(0),
        );
        manifest.push(Artifact::new(
            ArtifactKind::Config,
            &PathBuf::from("args.json"),
            "bb".into(),
            2,
        ));

        let models: Vec<_> = manifest.of_kind(ArtifactKind::Model).collect();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].fold, Some(0));
        assert_eq!(models[0].bytes, 3);
    }
}
