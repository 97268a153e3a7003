use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::{QueueError, Result};
use crate::lease::PidLease;
use crate::scheduler::epoch_now;
use crate::store::JobStore;
use crate::worker::{Worker, WorkerStats};

/// Summary of a manager run, returned after every worker has stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerReport {
    pub workers: usize,
    /// Jobs found stranded in `processing` at startup and returned to `pending`
    pub recovered: u64,
    pub totals: WorkerStats,
}

/// Owns a fixed pool of workers sharing one store.
pub struct WorkerManager {
    store: JobStore,
    lease: PidLease,
    config: WorkerConfig,
    pid: u32,
}

impl WorkerManager {
    pub fn new(store: JobStore, lease: PidLease, config: WorkerConfig) -> Self {
        Self {
            store,
            lease,
            config,
            pid: std::process::id(),
        }
    }

    /// PID recorded in the lease marker. Defaults to this process.
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = pid;
        self
    }

    /// Run the worker pool until `shutdown` is cancelled.
    ///
    /// 1. Takes the single-instance lease (refusing if a live manager holds it)
    /// 2. Loads the queue config once; it is not reloaded during the run
    /// 3. Returns jobs orphaned in `processing` by a previous manager to `pending`
    /// 4. Spawns `concurrency` worker loops
    /// 5. Waits for every worker to finish its current job after cancellation
    /// 6. Closes the store and removes the lease marker
    ///
    /// # Errors
    ///
    /// Fails if the lease is held by a live manager, if startup store access
    /// fails, or if a worker stopped on a fatal store error.
    pub async fn run(self, shutdown: CancellationToken) -> Result<ManagerReport> {
        let guard = self.lease.acquire(self.pid)?;

        let queue_config = self.store.queue_config().await?;
        tracing::info!(
            pid = guard.pid(),
            concurrency = self.config.concurrency,
            max_retries = queue_config.max_retries,
            backoff_base = queue_config.backoff_base,
            "Starting workers"
        );

        let recovered = self.store.recover_orphans(epoch_now()).await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Returned orphaned processing jobs to pending");
        }

        let mut workers = JoinSet::new();
        for id in 0..self.config.concurrency.max(1) {
            let worker = Worker::new(id, self.store.clone(), self.config.clone());
            workers.spawn(worker.run(shutdown.clone()));
        }

        let mut report = ManagerReport {
            workers: workers.len(),
            recovered,
            ..Default::default()
        };
        let mut failure: Option<QueueError> = None;

        while let Some(joined) = workers.join_next().await {
            record_exit(joined, &mut report, &mut failure, &shutdown);
        }

        tracing::info!(
            processed = report.totals.processed,
            succeeded = report.totals.succeeded,
            dead_lettered = report.totals.dead_lettered,
            "All workers stopped"
        );

        self.store.close().await;
        guard.release()?;

        match failure {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}

/// Fold one finished worker task into the report. Any failure stops the
/// remaining workers; the first one is kept as the run's error.
fn record_exit(
    joined: std::result::Result<Result<WorkerStats>, JoinError>,
    report: &mut ManagerReport,
    failure: &mut Option<QueueError>,
    shutdown: &CancellationToken,
) {
    let error = match joined {
        Ok(Ok(stats)) => {
            report.totals += stats;
            return;
        }
        Ok(Err(e)) => e,
        Err(e) => {
            tracing::error!(error = %e, "Worker task panicked");
            QueueError::WorkerPanicked(e.to_string())
        }
    };
    shutdown.cancel();
    failure.get_or_insert(error);
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn panicked_task() -> JoinError {
        tokio::spawn(async { panic!("worker blew up") })
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn panicked_worker_fails_the_run() {
        let shutdown = CancellationToken::new();
        let mut report = ManagerReport::default();
        let mut failure = None;

        record_exit(
            Err(panicked_task().await),
            &mut report,
            &mut failure,
            &shutdown,
        );

        assert!(shutdown.is_cancelled());
        assert!(matches!(failure, Some(QueueError::WorkerPanicked(_))));
    }

    #[tokio::test]
    async fn first_failure_is_kept() {
        let shutdown = CancellationToken::new();
        let mut report = ManagerReport::default();
        let mut failure = None;
        let stats = WorkerStats {
            processed: 2,
            succeeded: 2,
            ..Default::default()
        };

        record_exit(Ok(Ok(stats)), &mut report, &mut failure, &shutdown);
        assert!(!shutdown.is_cancelled());
        assert_eq!(report.totals.processed, 2);

        let corrupt = QueueError::CorruptRecord {
            id: "a".to_string(),
            reason: "bad state".to_string(),
        };
        record_exit(Ok(Err(corrupt)), &mut report, &mut failure, &shutdown);
        record_exit(
            Err(panicked_task().await),
            &mut report,
            &mut failure,
            &shutdown,
        );

        assert!(shutdown.is_cancelled());
        assert!(matches!(failure, Some(QueueError::CorruptRecord { .. })));
    }
}
