pub mod config;
pub mod error;
pub mod lease;
pub mod manager;
pub mod queue;
pub mod scheduler;
pub mod shutdown;
pub mod store;
pub mod worker;
