// State management module
// Handles run directories, artifact files and discovery of earlier runs

pub mod models;
pub mod registry;
pub mod storage;

pub use models::{Artifact, ArtifactKind, ArtifactManifest};
pub use registry::{ArtifactRegistry, SiblingRunRegistry};
pub use storage::{StorageError, StorageResult};
