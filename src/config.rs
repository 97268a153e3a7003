use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{QueueError, Result};

pub const MAX_RETRIES_KEY: &str = "max_retries";
pub const BACKOFF_BASE_KEY: &str = "backoff_base";

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: u32 = 2;

/// Normalize a config key so `max-retries` and `max_retries` name the same entry.
pub fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('-', "_")
}

/// Retry settings read from the store's key/value config table.
///
/// Missing or unparsable values fall back to the built-in defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub max_retries: u32,
    pub backoff_base: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
        }
    }
}

impl QueueConfig {
    pub fn from_entries(entries: &BTreeMap<String, String>) -> Self {
        let parse = |key: &str| {
            entries
                .get(key)
                .and_then(|v| v.trim().parse::<u32>().ok())
        };

        Self {
            max_retries: parse(MAX_RETRIES_KEY).unwrap_or(DEFAULT_MAX_RETRIES),
            // A zero base would schedule retries at the failure instant.
            backoff_base: parse(BACKOFF_BASE_KEY)
                .filter(|base| *base >= 1)
                .unwrap_or(DEFAULT_BACKOFF_BASE),
        }
    }

    /// Built-in default for a known key, if any.
    pub fn default_for(key: &str) -> Option<String> {
        match key {
            MAX_RETRIES_KEY => Some(DEFAULT_MAX_RETRIES.to_string()),
            BACKOFF_BASE_KEY => Some(DEFAULT_BACKOFF_BASE.to_string()),
            _ => None,
        }
    }

    /// Reject values for known keys that the retry policy could not use.
    /// Unknown keys are stored as free-form strings.
    pub fn validate(key: &str, value: &str) -> Result<()> {
        let invalid = || QueueError::InvalidConfig {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            MAX_RETRIES_KEY => {
                value.trim().parse::<u32>().map_err(|_| invalid())?;
            }
            BACKOFF_BASE_KEY => {
                let base = value.trim().parse::<u32>().map_err(|_| invalid())?;
                if base == 0 {
                    return Err(invalid());
                }
            }
            "" => return Err(invalid()),
            _ => {}
        }
        Ok(())
    }
}

/// Settings handed to every worker loop by the manager.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of concurrent worker loops
    pub concurrency: usize,
    /// How long a worker sleeps when no job is eligible
    pub idle_interval: Duration,
    /// Shell used to run job commands (`<shell> -c <command>`)
    pub shell: String,
    /// Attempts at persisting a job's outcome before giving up
    pub finalize_attempts: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            idle_interval: Duration::from_secs(1),
            shell: "sh".to_string(),
            finalize_attempts: 3,
        }
    }
}

impl WorkerConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_idle_interval(mut self, interval: Duration) -> Self {
        self.idle_interval = interval;
        self
    }
}

/// Process-level configuration: where the store and the manager marker live.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub pid_file: PathBuf,
    pub worker: WorkerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("jobs.db"),
            pid_file: PathBuf::from(".queuectl.pid"),
            worker: WorkerConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn new(db_path: PathBuf, pid_file: PathBuf) -> Self {
        Self {
            db_path,
            pid_file,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn queue_config_default() {
        let cfg = QueueConfig::default();
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.backoff_base, 2);
    }

    #[test]
    fn queue_config_reads_overrides() {
        let cfg = QueueConfig::from_entries(&entries(&[
            ("max_retries", "5"),
            ("backoff_base", " 3 "),
        ]));
        assert_eq!(cfg.max_retries, 5);
        assert_eq!(cfg.backoff_base, 3);
    }

    #[test]
    fn queue_config_falls_back_on_garbage() {
        let cfg = QueueConfig::from_entries(&entries(&[
            ("max_retries", "lots"),
            ("backoff_base", "-1"),
        ]));
        assert_eq!(cfg, QueueConfig::default());

        let cfg = QueueConfig::from_entries(&entries(&[("backoff_base", "0")]));
        assert_eq!(cfg.backoff_base, 2);
    }

    #[test]
    fn normalize_key_accepts_dashes() {
        assert_eq!(normalize_key("max-retries"), "max_retries");
        assert_eq!(normalize_key(" Backoff_Base "), "backoff_base");
    }

    #[test]
    fn validate_known_keys() {
        assert!(QueueConfig::validate("max_retries", "0").is_ok());
        assert!(QueueConfig::validate("max_retries", "x").is_err());
        assert!(QueueConfig::validate("backoff_base", "0").is_err());
        assert!(QueueConfig::validate("backoff_base", "2").is_ok());
        assert!(QueueConfig::validate("anything_else", "whatever").is_ok());
    }

    #[test]
    fn default_for_known_keys_only() {
        assert_eq!(QueueConfig::default_for("max_retries").as_deref(), Some("3"));
        assert_eq!(QueueConfig::default_for("backoff_base").as_deref(), Some("2"));
        assert!(QueueConfig::default_for("colour").is_none());
    }

    #[test]
    fn worker_config_default() {
        let cfg = WorkerConfig::default();
        assert_eq!(cfg.concurrency, 1);
        assert_eq!(cfg.idle_interval, Duration::from_secs(1));
        assert_eq!(cfg.shell, "sh");
    }

    #[test]
    fn worker_config_concurrency_floor() {
        let cfg = WorkerConfig::default().with_concurrency(0);
        assert_eq!(cfg.concurrency, 1);
    }

    #[test]
    fn app_config_default_paths() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.db_path, PathBuf::from("jobs.db"));
        assert_eq!(cfg.pid_file, PathBuf::from(".queuectl.pid"));
    }
}
