//! Artifact Record - one file written by the persistence layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Kind of persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Serialized model object
    Model,
    /// Plain-text model export
    ModelDump,
    /// Feature prefix, labels and scores of a test call
    Predictions,
    /// Cross-validation metrics
    CvResults,
}

/// Artifact Record describes a file written for a run.
///
/// Records are returned by every write of [`super::ArtifactStore`] so a job
/// can report exactly what it produced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    region: String,
    test_region: Option<String>,
    run_id: String,
    kind: ArtifactKind,
    path: PathBuf,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    /// Create a new artifact record stamped with the current time.
    ///
    /// # Arguments
    ///
    /// * `region` - Model region the artifact belongs to
    /// * `test_region` - Scored region, for prediction artifacts
    /// * `run_id` - Run identifier
    /// * `kind` - What the file holds
    /// * `path` - Where it was written
    /// * `size_bytes` - Size on disk
    #[must_use]
    pub fn new(
        region: impl Into<String>,
        test_region: Option<String>,
        run_id: impl Into<String>,
        kind: ArtifactKind,
        path: impl Into<PathBuf>,
        size_bytes: u64,
    ) -> Self {
        Self {
            region: region.into(),
            test_region,
            run_id: run_id.into(),
            kind,
            path: path.into(),
            size_bytes,
            created_at: Utc::now(),
        }
    }

    /// Get the model region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Get the scored region, if any.
    #[must_use]
    pub fn test_region(&self) -> Option<&str> {
        self.test_region.as_deref()
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the artifact kind.
    #[must_use]
    pub const fn kind(&self) -> ArtifactKind {
        self.kind
    }

    /// Get the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the artifact size in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
