//! vmsctl Common - Shared types, traits and options
//!
//! This crate provides the data model, error taxonomy and collaborator
//! traits used by the worker pool, the remote task poller and the fan-out
//! orchestrator.

pub mod error;
pub mod options;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use error::{QueryError, VmsError, VmsResult};
pub use options::{PollerOptions, PoolOptions};
pub use traits::{ClientFactory, FnTask, RemoteSubmitter, Task, TaskClient, TaskContext, WorkItem};
pub use types::{
    ErrorCategory, ErrorRecord, JobId, JobResult, JobState, Parameters, ProgressEstimate,
    RemoteTaskHandle, TaskState, TaskStatus,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
