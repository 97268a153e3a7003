use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("The \"command\" field is required")]
    MissingCommand,

    #[error("Job {id} already exists in state {state}")]
    JobConflict { id: String, state: String },

    #[error("Job {0} not found in the dead letter queue")]
    NotFoundInDlq(String),

    #[error("Unknown job state: {0}")]
    InvalidState(String),

    #[error("Invalid value for config key {key}: {value}")]
    InvalidConfig { key: String, value: String },

    #[error("Worker manager is already running (PID {0})")]
    AlreadyRunning(u32),

    #[error("Worker task failed: {0}")]
    WorkerPanicked(String),

    #[error("Corrupt job record {id}: {reason}")]
    CorruptRecord { id: String, reason: String },

    #[error("Failed to signal process {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    /// Corruption means the store can no longer be trusted to uphold the
    /// single-claim invariant, so callers stop instead of retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QueueError::CorruptRecord { .. })
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
