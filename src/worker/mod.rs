//! Worker loops that claim, execute and finalize jobs.
//!
//! # Components
//!
//! - [`CommandExecutor`]: runs a job's shell command and captures its output
//! - [`Worker`]: one polling loop; executes at most one job at a time
//!
//! # Execution Flow
//!
//! 1. [`JobStore::claim_next`] hands the worker the oldest eligible job
//! 2. [`CommandExecutor::execute`] runs `sh -c <command>`
//! 3. The outcome is written back: `completed`, `pending` with a backoff
//!    (`backoff_base ^ attempts` seconds), or `dead`
//! 4. With nothing eligible the worker sleeps for the idle interval
//!
//! Shutdown is cooperative: the cancellation token is only checked between
//! jobs, so a running command always finishes and is finalized.

pub mod executor;

pub use executor::{CommandExecutor, ExecutionResult};

use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::Result;
use crate::scheduler::{epoch_now, FailureDecision, Job, RetryPolicy};
use crate::store::JobStore;

/// Where a processed job ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retrying { attempts: u32, run_at: i64 },
    Dead { attempts: u32 },
}

/// Per-worker counters, logged when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub dead_lettered: u64,
}

impl std::ops::AddAssign for WorkerStats {
    fn add_assign(&mut self, other: Self) {
        self.processed += other.processed;
        self.succeeded += other.succeeded;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
    }
}

impl WorkerStats {
    fn record(&mut self, outcome: &JobOutcome) {
        self.processed += 1;
        match outcome {
            JobOutcome::Completed => self.succeeded += 1,
            JobOutcome::Retrying { .. } => self.retried += 1,
            JobOutcome::Dead { .. } => self.dead_lettered += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Worker {
    id: usize,
    store: JobStore,
    executor: CommandExecutor,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(id: usize, store: JobStore, config: WorkerConfig) -> Self {
        Self {
            id,
            store,
            executor: CommandExecutor::new(config.shell.clone()),
            config,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Poll until `shutdown` is cancelled. Returns early with the error if
    /// the store reports corruption, cancelling `shutdown` for every other
    /// worker as well.
    pub async fn run(self, shutdown: CancellationToken) -> Result<WorkerStats> {
        tracing::info!(worker_id = self.id, "Worker started");
        let mut stats = WorkerStats::default();

        while !shutdown.is_cancelled() {
            match self.run_once().await {
                Ok(Some(outcome)) => stats.record(&outcome),
                Ok(None) => self.idle(&shutdown).await,
                Err(e) if e.is_fatal() => {
                    tracing::error!(worker_id = self.id, error = %e, "Fatal store error, stopping all workers");
                    shutdown.cancel();
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(worker_id = self.id, error = %e, "Worker iteration failed");
                    self.idle(&shutdown).await;
                }
            }
        }

        tracing::info!(
            worker_id = self.id,
            processed = stats.processed,
            succeeded = stats.succeeded,
            retried = stats.retried,
            dead_lettered = stats.dead_lettered,
            "Worker stopped"
        );
        Ok(stats)
    }

    /// One iteration: claim a job and process it. `None` when nothing was
    /// eligible, in which case the store was not modified.
    pub async fn run_once(&self) -> Result<Option<JobOutcome>> {
        let Some(job) = self.store.claim_next().await? else {
            return Ok(None);
        };
        tracing::info!(worker_id = self.id, job_id = %job.id, "Picked up job");
        self.process(job).await.map(Some)
    }

    /// Execute a claimed job and move it out of `processing`.
    pub async fn process(&self, job: Job) -> Result<JobOutcome> {
        tracing::info!(worker_id = self.id, job_id = %job.id, command = %job.command, "Executing job");
        let result = self.executor.execute(&job.id, &job.command).await;
        self.finalize(&job, &result).await
    }

    async fn finalize(&self, job: &Job, result: &ExecutionResult) -> Result<JobOutcome> {
        let now = epoch_now();
        let store = &self.store;
        let job_id = job.id.as_str();

        if result.success {
            let output = result.output.as_str();
            self.persist(job_id, move || store.complete(job_id, output, now))
                .await?;
            tracing::info!(worker_id = self.id, job_id = %job.id, "Completed job");
            return Ok(JobOutcome::Completed);
        }

        let detail = result.failure_detail();
        let decision = RetryPolicy::for_job(job).on_failure(job.attempts, now);
        self.persist(job_id, move || store.record_failure(job_id, decision, detail, now))
            .await?;

        Ok(match decision {
            FailureDecision::Retry { attempts, run_at } => {
                tracing::warn!(
                    worker_id = self.id,
                    job_id = %job.id,
                    attempts,
                    delay_secs = run_at - now,
                    error = %detail.trim_end(),
                    "Job failed, will retry"
                );
                JobOutcome::Retrying { attempts, run_at }
            }
            FailureDecision::Dead { attempts } => {
                tracing::warn!(
                    worker_id = self.id,
                    job_id = %job.id,
                    attempts,
                    error = %detail.trim_end(),
                    "Job exhausted retries, moved to DLQ"
                );
                JobOutcome::Dead { attempts }
            }
        })
    }

    /// Write an outcome, retrying transient store errors so a finished job
    /// is not left in `processing` by a momentary lock.
    ///
    /// Once `finalize_attempts` writes have failed the job stays in
    /// `processing`; the next manager start returns it to `pending` through
    /// [`JobStore::recover_orphans`].
    async fn persist<F, Fut>(&self, job_id: &str, mut write: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let attempts = self.config.finalize_attempts.max(1);
        let mut tries = 0;
        loop {
            tries += 1;
            match write().await {
                Ok(true) => return Ok(()),
                Ok(false) => {
                    tracing::warn!(
                        worker_id = self.id,
                        job_id,
                        "Job left processing before its outcome was recorded"
                    );
                    return Ok(());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if tries >= attempts => {
                    tracing::error!(
                        worker_id = self.id,
                        job_id,
                        error = %e,
                        tries,
                        "Could not record job outcome; job stays processing until the next manager start"
                    );
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(worker_id = self.id, job_id, error = %e, tries, "Retrying outcome write");
                    tokio::time::sleep(self.config.idle_interval).await;
                }
            }
        }
    }

    async fn idle(&self, shutdown: &CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.idle_interval) => {}
            _ = shutdown.cancelled() => {}
        }
    }
}
