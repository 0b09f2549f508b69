//! Run Record - lifecycle of one orchestrated job

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Job is submitted but not yet started.
    Pending,
    /// Job is currently executing.
    Running,
    /// Job completed successfully.
    Succeeded,
    /// Job failed with an error or panic.
    Failed,
}

/// Run Record tracks a single job from submission to completion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    job: String,
    status: RunStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    failure: Option<String>,
}

impl RunRecord {
    /// Create a new run record in Pending status.
    #[must_use]
    pub fn new(job: impl Into<String>) -> Self {
        Self {
            job: job.into(),
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
            failure: None,
        }
    }

    /// Get the job name.
    #[must_use]
    pub fn job(&self) -> &str {
        &self.job
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the start timestamp, if the job has started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the end timestamp, if the job has finished.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Get the failure reason, if the job failed.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Transition from Pending to Running.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark the job successful.
    pub fn succeed(&mut self) {
        self.status = RunStatus::Succeeded;
        self.ended_at = Some(Utc::now());
    }

    /// Mark the job failed with `reason`.
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.failure = Some(reason.into());
        self.ended_at = Some(Utc::now());
    }
}
