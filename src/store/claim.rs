//! Claim engine: hands exactly one eligible job to exactly one worker.
//!
//! The select and the `pending -> processing` transition run in one
//! transaction. The update is additionally guarded on `state = 'pending'`
//! and must touch exactly one row before the transaction commits, so a
//! job can never be observed as claimed by two callers.

use crate::error::Result;
use crate::scheduler::{epoch_now, Job, JobState};
use crate::store::{JobRow, JobStore};

impl JobStore {
    /// Claim the oldest eligible pending job, if any.
    pub async fn claim_next(&self) -> Result<Option<Job>> {
        self.claim_next_at(epoch_now()).await
    }

    /// Claim as of `now` (epoch seconds). The claimed row's `run_at` is set
    /// to `now` as a claimed-at marker; the returned job carries the
    /// pre-claim record with its state switched to `processing`.
    pub async fn claim_next_at(&self, now: i64) -> Result<Option<Job>> {
        let mut tx = self.begin_write().await?;

        let candidate = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE state = 'pending' AND run_at <= ?1
            ORDER BY created_at ASC, rowid ASC
            LIMIT 1
            "#,
        )
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = candidate else {
            tx.rollback().await?;
            return Ok(None);
        };
        let mut job = Job::try_from(row)?;

        let claimed = sqlx::query(
            "UPDATE jobs SET state = 'processing', run_at = ?1, updated_at = ?1 \
             WHERE id = ?2 AND state = 'pending'",
        )
        .bind(now)
        .bind(&job.id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() != 1 {
            tx.rollback().await?;
            tracing::debug!(job_id = %job.id, "Claim lost to a concurrent writer");
            return Ok(None);
        }

        tx.commit().await?;
        job.state = JobState::Processing;
        Ok(Some(job))
    }
}
