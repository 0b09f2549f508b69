//! Job orchestrator: submit all, then collect all.
//!
//! Every job runs on tokio's blocking pool (jobs do file IO and dense
//! numeric work) behind a semaphore of `workers` permits, which bounds how
//! many dense arrays are alive at once. Jobs share nothing; each writes to its
//! own log and artifact paths.
//!
//! Failures never propagate: an error or a panic becomes
//! [`JobOutcome::Failed`] and sibling jobs keep running. There is no
//! cancellation and no timeout; a stuck job blocks the final join.

use crate::experiment::{RunRecord, RunStatus};
use crate::Result;
use std::sync::Arc;
use tokio::sync::Semaphore;

type Task<T> = Box<dyn FnOnce() -> Result<T> + Send + 'static>;

/// A named unit of independent work.
pub struct Job<T> {
    name: String,
    task: Task<T>,
}

impl<T> Job<T> {
    /// Wrap a closure as a job.
    pub fn new(name: impl Into<String>, task: impl FnOnce() -> Result<T> + Send + 'static) -> Self {
        Self {
            name: name.into(),
            task: Box::new(task),
        }
    }

    /// Job name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Result variant of one job
#[derive(Debug)]
pub enum JobOutcome<T> {
    /// Job returned a value
    Succeeded(T),
    /// Job returned an error or panicked
    Failed {
        /// Error message or panic description
        reason: String,
    },
}

/// Outcome of one job plus its lifecycle record
#[derive(Debug)]
pub struct JobResult<T> {
    /// Lifecycle record
    pub run: RunRecord,
    /// What the job produced
    pub outcome: JobOutcome<T>,
}

/// All job results, in submission order
#[derive(Debug)]
pub struct JobReport<T> {
    /// One entry per submitted job
    pub results: Vec<JobResult<T>>,
}

impl<T> JobReport<T> {
    /// Number of successful jobs
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.run.status() == RunStatus::Succeeded)
            .count()
    }

    /// Names and reasons of failed jobs
    #[must_use]
    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                JobOutcome::Failed { reason } => Some((r.run.job(), reason.as_str())),
                JobOutcome::Succeeded(_) => None,
            })
            .collect()
    }

    /// True when every job succeeded
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.succeeded() == self.results.len()
    }
}

fn failed<T>(mut run: RunRecord, reason: String) -> JobResult<T> {
    tracing::error!(job = run.job(), %reason, "job failed");
    run.fail(reason.clone());
    JobResult {
        run,
        outcome: JobOutcome::Failed { reason },
    }
}

fn panic_reason(err: &tokio::task::JoinError) -> String {
    if err.is_panic() {
        format!("job panicked: {err}")
    } else {
        format!("job aborted: {err}")
    }
}

/// Run `jobs` with at most `workers` in flight and join every handle.
pub async fn run_jobs<T: Send + 'static>(jobs: Vec<Job<T>>, workers: usize) -> JobReport<T> {
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut handles = Vec::with_capacity(jobs.len());

    for Job { name, task } in jobs {
        let permits = Arc::clone(&permits);
        let job_name = name.clone();
        let handle = tokio::spawn(async move {
            let mut run = RunRecord::new(job_name);
            let Ok(_permit) = permits.acquire_owned().await else {
                return failed(run, "worker pool closed".to_string());
            };
            run.start();
            tracing::info!(job = run.job(), "job started");
            match tokio::task::spawn_blocking(task).await {
                Ok(Ok(value)) => {
                    run.succeed();
                    tracing::info!(job = run.job(), "job finished");
                    JobResult {
                        run,
                        outcome: JobOutcome::Succeeded(value),
                    }
                }
                Ok(Err(e)) => failed(run, e.to_string()),
                Err(join) => failed(run, panic_reason(&join)),
            }
        });
        handles.push((name, handle));
    }

    let mut results = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let result = match handle.await {
            Ok(result) => result,
            Err(join) => failed(RunRecord::new(name), panic_reason(&join)),
        };
        results.push(result);
    }
    JobReport { results }
}
