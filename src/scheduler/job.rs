use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Durable job states. `failed` exists only as a reporting bucket and is
/// never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Processing,
    Completed,
    Failed,
    Dead,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobState::Pending),
            "processing" => Ok(JobState::Processing),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "dead" => Ok(JobState::Dead),
            other => Err(QueueError::InvalidState(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub command: String,
    pub state: JobState,
    pub attempts: u32,
    pub max_retries: u32,
    pub backoff_base: u32,
    /// Epoch seconds. Eligibility time while pending, claim time while processing.
    pub run_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub output: Option<String>,
}

impl Job {
    /// A pending job is eligible once its `run_at` has passed.
    pub fn is_eligible(&self, now: i64) -> bool {
        self.state == JobState::Pending && self.run_at <= now
    }
}

/// Enqueue payload: `{"id"?: string, "command": string}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewJob {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
}

impl NewJob {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            id: None,
            command: Some(command.into()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Parse and validate a JSON payload. Empty ids count as absent.
    pub fn parse(payload: &str) -> Result<Self, QueueError> {
        let mut job: NewJob = serde_json::from_str(payload)
            .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;

        match job.command.as_deref() {
            Some(cmd) if !cmd.trim().is_empty() => {}
            _ => return Err(QueueError::MissingCommand),
        }
        if job.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            job.id = None;
        }
        Ok(job)
    }
}

/// Aggregate counts per state as reported by `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub dead: u64,
}

impl StateCounts {
    pub fn add(&mut self, state: JobState, count: u64) {
        match state {
            JobState::Pending => self.pending += count,
            JobState::Processing => self.processing += count,
            JobState::Completed => self.completed += count,
            JobState::Failed => self.failed += count,
            JobState::Dead => self.dead += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed + self.dead
    }
}

/// Current wall-clock time in epoch seconds.
pub fn epoch_now() -> i64 {
    Utc::now().timestamp()
}

/// Render epoch seconds as an RFC 3339 timestamp.
pub fn format_timestamp(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}
