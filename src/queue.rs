//! Operator-facing queue operations.
//!
//! [`Queue`] wraps a [`JobStore`] and the manager's [`PidLease`] and returns
//! serializable views that the CLI prints as tables or JSON.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{normalize_key, QueueConfig};
use crate::error::Result;
use crate::lease::{ManagerStatus, PidLease, StopOutcome};
use crate::scheduler::{
    epoch_now, format_timestamp, Job, JobState, NewJob, RetryPolicy, StateCounts,
};
use crate::store::{Enqueued, JobStore};

/// Reply to an enqueue.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueReceipt {
    pub id: String,
    pub state: JobState,
    /// True when a finished job was reset rather than a new one created
    pub requeued: bool,
    pub max_retries: u32,
    pub backoff_base: u32,
}

/// A row of `list`.
#[derive(Debug, Clone, Serialize)]
pub struct JobListItem {
    pub id: String,
    pub state: JobState,
    pub attempts: u32,
    pub command: String,
    pub run_at: String,
}

impl From<Job> for JobListItem {
    fn from(job: Job) -> Self {
        Self {
            run_at: format_timestamp(job.run_at),
            id: job.id,
            state: job.state,
            attempts: job.attempts,
            command: job.command,
        }
    }
}

/// A row of `dlq list`.
#[derive(Debug, Clone, Serialize)]
pub struct DlqItem {
    pub id: String,
    pub state: JobState,
    pub command: String,
    pub output: Option<String>,
    pub updated_at: String,
}

impl From<Job> for DlqItem {
    fn from(job: Job) -> Self {
        Self {
            updated_at: format_timestamp(job.updated_at),
            id: job.id,
            state: job.state,
            command: job.command,
            output: job.output,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub counts: StateCounts,
    pub manager: String,
    /// PID of a live manager, if any
    pub manager_pid: Option<u32>,
}

impl StatusReport {
    fn new(counts: StateCounts, manager: ManagerStatus) -> Self {
        let manager_pid = match manager {
            ManagerStatus::Running(pid) => Some(pid),
            _ => None,
        };
        Self {
            counts,
            manager: manager.to_string(),
            manager_pid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Queue {
    store: JobStore,
    lease: PidLease,
}

impl Queue {
    pub fn new(store: JobStore, lease: PidLease) -> Self {
        Self { store, lease }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Parse a JSON payload and enqueue it with the current retry settings.
    pub async fn enqueue(&self, payload: &str) -> Result<EnqueueReceipt> {
        let new = NewJob::parse(payload)?;
        self.enqueue_job(&new).await
    }

    pub async fn enqueue_job(&self, new: &NewJob) -> Result<EnqueueReceipt> {
        let policy = RetryPolicy::from(self.store.queue_config().await?);
        let enqueued = self.store.enqueue(new, policy, epoch_now()).await?;
        let requeued = matches!(enqueued, Enqueued::Requeued(_));
        let job = enqueued.job();

        tracing::debug!(job_id = %job.id, requeued, "Job enqueued");
        Ok(EnqueueReceipt {
            id: job.id.clone(),
            state: job.state,
            requeued,
            max_retries: job.max_retries,
            backoff_base: job.backoff_base,
        })
    }

    /// Non-dead jobs, optionally filtered by a state name.
    pub async fn list(&self, state: Option<&str>) -> Result<Vec<JobListItem>> {
        let state = state.map(str::parse::<JobState>).transpose()?;
        let jobs = self.store.list(state).await?;
        Ok(jobs.into_iter().map(JobListItem::from).collect())
    }

    pub async fn dlq_list(&self) -> Result<Vec<DlqItem>> {
        let jobs = self.store.list_dead().await?;
        Ok(jobs.into_iter().map(DlqItem::from).collect())
    }

    /// Move a dead job back to pending. Fails with `NotFoundInDlq` and
    /// changes nothing if `id` is not currently dead.
    pub async fn dlq_retry(&self, id: &str) -> Result<JobListItem> {
        let job = self.store.revive(id.trim(), epoch_now()).await?;
        tracing::info!(job_id = %job.id, "Job revived from DLQ");
        Ok(JobListItem::from(job))
    }

    pub async fn status(&self) -> Result<StatusReport> {
        let counts = self.store.counts().await?;
        let manager = self.lease.status()?;
        Ok(StatusReport::new(counts, manager))
    }

    pub fn stop_manager(&self) -> Result<StopOutcome> {
        self.lease.stop()
    }

    pub async fn config_list(&self) -> Result<BTreeMap<String, String>> {
        self.store.config_entries().await
    }

    /// Stored value for `key`, or the built-in default for a known key.
    pub async fn config_get(&self, key: &str) -> Result<Option<String>> {
        match self.store.config_value(key).await? {
            Some(value) => Ok(Some(value)),
            None => Ok(QueueConfig::default_for(&normalize_key(key))),
        }
    }

    pub async fn config_set(&self, key: &str, value: &str) -> Result<(String, String)> {
        let key = self.store.set_config(key, value).await?;
        Ok((key, value.trim().to_string()))
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}
