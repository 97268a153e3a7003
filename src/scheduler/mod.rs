pub mod job;
pub mod policy;

pub use job::{epoch_now, format_timestamp, Job, JobState, NewJob, StateCounts};
pub use policy::{FailureDecision, RetryPolicy};
