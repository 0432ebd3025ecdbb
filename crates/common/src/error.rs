//! Error types for vmsctl
//!
//! Validation errors are raised at the call that introduced them and are
//! never retried. Communication errors are the only retryable class.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum VmsError {
    #[error("Invalid task handle '{0}': expected <TypeName>[<positive-integer>]")]
    InvalidHandle(String),

    #[error("Invalid pool size {0}: capacity must be at least 1")]
    InvalidPoolSize(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Worker pool has been shut down")]
    PoolShutdown,

    #[error("Query error: {0}")]
    Query(#[from] QueryError),
}

/// Errors raised by the external status query and submission collaborators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The channel to the server failed; the call may succeed after reconnecting.
    #[error("communication failure: {0}")]
    Communication(String),

    /// The server understood the request and refused it.
    #[error("request rejected: {0}")]
    Rejected(String),
}

impl QueryError {
    #[inline]
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, QueryError::Communication(_))
    }
}

/// Result type alias for vmsctl operations
pub type VmsResult<T> = Result<T, VmsError>;
