//! Retry and dead-letter policy applied when a job attempt fails.

use crate::config::QueueConfig;
use crate::scheduler::job::Job;

/// Retry ceiling and exponential backoff base, frozen on each job at enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: u32,
}

/// What a failed attempt turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Back to pending, eligible again at `run_at`
    Retry { attempts: u32, run_at: i64 },
    /// Retry budget exhausted
    Dead { attempts: u32 },
}

impl From<QueueConfig> for RetryPolicy {
    fn from(cfg: QueueConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff_base: cfg.backoff_base,
        }
    }
}

impl RetryPolicy {
    pub fn for_job(job: &Job) -> Self {
        Self {
            max_retries: job.max_retries,
            backoff_base: job.backoff_base,
        }
    }

    /// Backoff in seconds after the given (post-increment) attempt count:
    /// `backoff_base ^ attempts`, saturating instead of overflowing.
    pub fn delay_secs(&self, attempts: u32) -> i64 {
        i64::from(self.backoff_base).saturating_pow(attempts)
    }

    /// Decide the outcome of a failure for a job that had `attempts`
    /// failures before this one.
    pub fn on_failure(&self, attempts: u32, now: i64) -> FailureDecision {
        let attempts = attempts.saturating_add(1);
        if attempts >= self.max_retries {
            FailureDecision::Dead { attempts }
        } else {
            FailureDecision::Retry {
                attempts,
                run_at: now.saturating_add(self.delay_secs(attempts)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_policy() -> RetryPolicy {
        RetryPolicy::from(QueueConfig::default())
    }

    #[test]
    fn exponential_delay_uses_post_increment_attempts() {
        let policy = default_policy();
        assert_eq!(policy.delay_secs(1), 2);
        assert_eq!(policy.delay_secs(2), 4);
        assert_eq!(policy.delay_secs(3), 8);
    }

    #[test]
    fn default_policy_retries_twice_then_dies() {
        let policy = default_policy();
        let now = 1_000;

        assert_eq!(
            policy.on_failure(0, now),
            FailureDecision::Retry {
                attempts: 1,
                run_at: 1_002
            }
        );
        assert_eq!(
            policy.on_failure(1, now),
            FailureDecision::Retry {
                attempts: 2,
                run_at: 1_004
            }
        );
        assert_eq!(policy.on_failure(2, now), FailureDecision::Dead { attempts: 3 });
    }

    #[test]
    fn zero_or_one_retries_dead_letters_immediately() {
        for max_retries in [0, 1] {
            let policy = RetryPolicy {
                max_retries,
                backoff_base: 2,
            };
            assert_eq!(policy.on_failure(0, 0), FailureDecision::Dead { attempts: 1 });
        }
    }

    #[test]
    fn huge_backoff_saturates() {
        let policy = RetryPolicy {
            max_retries: u32::MAX,
            backoff_base: u32::MAX,
        };
        assert_eq!(policy.delay_secs(10), i64::MAX);
        match policy.on_failure(9, 1) {
            FailureDecision::Retry { run_at, .. } => assert_eq!(run_at, i64::MAX),
            other => panic!("unexpected decision {other:?}"),
        }
    }

    #[test]
    fn retry_run_at_is_strictly_in_the_future() {
        let policy = RetryPolicy {
            max_retries: 10,
            backoff_base: 1,
        };
        match policy.on_failure(4, 50) {
            FailureDecision::Retry { run_at, .. } => assert!(run_at > 50),
            other => panic!("unexpected decision {other:?}"),
        }
    }
}
