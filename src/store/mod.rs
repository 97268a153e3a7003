//! Durable job store backed by SQLite.
//!
//! All workers and the CLI share one [`JobStore`]. The pool is capped at a
//! single connection, so every statement and transaction issued by this
//! process is serialized; SQLite's own locking (with a busy timeout) covers
//! other processes touching the same file.
//!
//! # Components
//!
//! - [`JobStore`]: schema setup, inserts, lookups, scans and state transitions
//! - [`claim`]: the transactional claim of the next eligible job
//! - [`settings`]: the flat key/value config table

pub mod claim;
pub mod settings;

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    Sqlite, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::Transaction;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::scheduler::{FailureDecision, Job, JobState, NewJob, RetryPolicy, StateCounts};

/// Output written on a job revived from the dead letter queue.
pub const REVIVED_MARKER: &str = "Retrying from DLQ...";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    command: String,
    state: String,
    attempts: i64,
    max_retries: i64,
    backoff_base: i64,
    run_at: i64,
    created_at: i64,
    updated_at: i64,
    output: Option<String>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self> {
        let corrupt = |reason: String| QueueError::CorruptRecord {
            id: row.id.clone(),
            reason,
        };
        let state = row
            .state
            .parse::<JobState>()
            .map_err(|_| corrupt(format!("unknown state {:?}", row.state)))?;
        if state == JobState::Failed {
            return Err(corrupt("\"failed\" is not a persisted state".to_string()));
        }
        let attempts = u32::try_from(row.attempts)
            .map_err(|_| corrupt(format!("attempts out of range: {}", row.attempts)))?;
        let max_retries = u32::try_from(row.max_retries)
            .map_err(|_| corrupt(format!("max_retries out of range: {}", row.max_retries)))?;
        let backoff_base = u32::try_from(row.backoff_base)
            .map_err(|_| corrupt(format!("backoff_base out of range: {}", row.backoff_base)))?;

        Ok(Job {
            id: row.id,
            command: row.command,
            state,
            attempts,
            max_retries,
            backoff_base,
            run_at: row.run_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
            output: row.output,
        })
    }
}

fn into_jobs(rows: Vec<JobRow>) -> Result<Vec<Job>> {
    rows.into_iter().map(Job::try_from).collect()
}

/// Result of an enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// A new job row was created
    Created(Job),
    /// A finished job with the same id and command was reset to pending
    Requeued(Job),
}

impl Enqueued {
    pub fn job(&self) -> &Job {
        match self {
            Enqueued::Created(job) | Enqueued::Requeued(job) => job,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobStore {
    pool: SqlitePool,
}

impl JobStore {
    /// Open (creating if needed) the database file and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        tracing::debug!(path = %path.display(), "Job store opened");
        Ok(Self { pool })
    }

    /// Insert a pending job, or reset a finished one with the same id and command.
    ///
    /// The retry policy is captured on the row and governs the job from here on.
    pub async fn enqueue(&self, new: &NewJob, policy: RetryPolicy, now: i64) -> Result<Enqueued> {
        let command = new
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or(QueueError::MissingCommand)?
            .to_string();
        let id = new
            .id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut tx = self.begin_write().await?;

        let existing = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?1")
            .bind(&id)
            .fetch_optional(&mut *tx)
            .await?
            .map(Job::try_from)
            .transpose()?;

        let job = Job {
            id: id.clone(),
            command,
            state: JobState::Pending,
            attempts: 0,
            max_retries: policy.max_retries,
            backoff_base: policy.backoff_base,
            run_at: now,
            created_at: now,
            updated_at: now,
            output: None,
        };

        let outcome = match existing {
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO jobs (
                        id, command, state, attempts, max_retries, backoff_base,
                        run_at, created_at, updated_at, output
                    )
                    VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?5, ?5, ?5, NULL)
                    "#,
                )
                .bind(&job.id)
                .bind(&job.command)
                .bind(i64::from(job.max_retries))
                .bind(i64::from(job.backoff_base))
                .bind(now)
                .execute(&mut *tx)
                .await?;
                Enqueued::Created(job)
            }
            Some(current) if current.state.is_terminal() && current.command == job.command => {
                sqlx::query(
                    r#"
                    UPDATE jobs
                    SET state = 'pending', attempts = 0, max_retries = ?1, backoff_base = ?2,
                        run_at = ?3, updated_at = ?3, output = NULL
                    WHERE id = ?4
                    "#,
                )
                .bind(i64::from(job.max_retries))
                .bind(i64::from(job.backoff_base))
                .bind(now)
                .bind(&job.id)
                .execute(&mut *tx)
                .await?;
                Enqueued::Requeued(Job {
                    created_at: current.created_at,
                    ..job
                })
            }
            Some(current) => {
                return Err(QueueError::JobConflict {
                    id,
                    state: current.state.to_string(),
                });
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Job>> {
        sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(Job::try_from)
            .transpose()
    }

    /// Non-dead jobs in creation order, optionally restricted to one state.
    pub async fn list(&self, state: Option<JobState>) -> Result<Vec<Job>> {
        let rows = match state {
            Some(JobState::Dead) => return Ok(Vec::new()),
            Some(state) => {
                sqlx::query_as::<_, JobRow>(
                    "SELECT * FROM jobs WHERE state != 'dead' AND state = ?1 \
                     ORDER BY created_at ASC, rowid ASC",
                )
                .bind(state.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, JobRow>(
                    "SELECT * FROM jobs WHERE state != 'dead' ORDER BY created_at ASC, rowid ASC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        into_jobs(rows)
    }

    /// Jobs in the dead letter queue, oldest first.
    pub async fn list_dead(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs WHERE state = 'dead' ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        into_jobs(rows)
    }

    pub async fn counts(&self) -> Result<StateCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) AS count FROM jobs GROUP BY state")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = StateCounts::default();
        for (state, count) in rows {
            let parsed = state.parse::<JobState>().map_err(|_| QueueError::CorruptRecord {
                id: "*".to_string(),
                reason: format!("unknown state {state:?} in state counts"),
            })?;
            counts.add(parsed, u64::try_from(count).unwrap_or_default());
        }
        // Never persisted; always reported as zero.
        counts.failed = 0;
        Ok(counts)
    }

    /// `processing -> completed`. Returns false if the job was no longer processing.
    pub async fn complete(&self, id: &str, output: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'completed', output = ?1, updated_at = ?2 \
             WHERE id = ?3 AND state = 'processing'",
        )
        .bind(output)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `processing -> pending` (retry) or `processing -> dead`, per the decision.
    /// Returns false if the job was no longer processing.
    pub async fn record_failure(
        &self,
        id: &str,
        decision: FailureDecision,
        detail: &str,
        now: i64,
    ) -> Result<bool> {
        let result = match decision {
            FailureDecision::Retry { attempts, run_at } => {
                sqlx::query(
                    "UPDATE jobs SET state = 'pending', attempts = ?1, run_at = ?2, output = ?3, \
                     updated_at = ?4 WHERE id = ?5 AND state = 'processing'",
                )
                .bind(i64::from(attempts))
                .bind(run_at)
                .bind(detail)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
            FailureDecision::Dead { attempts } => {
                sqlx::query(
                    "UPDATE jobs SET state = 'dead', attempts = ?1, output = ?2, updated_at = ?3 \
                     WHERE id = ?4 AND state = 'processing'",
                )
                .bind(i64::from(attempts))
                .bind(detail)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected() == 1)
    }

    /// `dead -> pending`: attempts reset, immediately eligible.
    ///
    /// Anything other than a dead job with this id is reported as not found
    /// and left untouched.
    pub async fn revive(&self, id: &str, now: i64) -> Result<Job> {
        let revived = sqlx::query_as::<_, JobRow>(
            "UPDATE jobs SET state = 'pending', attempts = 0, run_at = ?1, output = ?2, \
             updated_at = ?1 WHERE id = ?3 AND state = 'dead' RETURNING *",
        )
        .bind(now)
        .bind(REVIVED_MARKER)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match revived {
            Some(row) => Job::try_from(row),
            None => Err(QueueError::NotFoundInDlq(id.to_string())),
        }
    }

    /// Return jobs stranded in `processing` by a manager that died mid-run.
    ///
    /// Only safe while holding the manager lease.
    pub async fn recover_orphans(&self, now: i64) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET state = 'pending', run_at = ?1, updated_at = ?1 \
             WHERE state = 'processing'",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Release the connection. Later calls on any clone fail.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Open a transaction that takes the write lock immediately.
    ///
    /// A deferred transaction that reads first and later upgrades to a
    /// writer fails at once with `SQLITE_BUSY` when another connection holds
    /// the lock; `BEGIN IMMEDIATE` waits for it under the busy timeout.
    pub(crate) async fn begin_write(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
