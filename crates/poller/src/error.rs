use thiserror::Error;
use vmsctl_common::{QueryError, RemoteTaskHandle};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PollError {
    /// A handle did not match `<TypeName>[<positive-integer>]`. Only that
    /// handle is dropped; the rest of the batch is still polled.
    #[error("invalid task handle '{0}'")]
    InvalidHandle(String),

    #[error("status query for {handle} failed after {attempts} attempt(s): {last}")]
    RetriesExhausted {
        handle: RemoteTaskHandle,
        attempts: u32,
        last: QueryError,
    },

    #[error("status query for {handle} was rejected: {source}")]
    Query {
        handle: RemoteTaskHandle,
        source: QueryError,
    },

    #[error("cleanup of {handle} failed: {source}")]
    Cleanup {
        handle: RemoteTaskHandle,
        source: QueryError,
    },
}

impl PollError {
    /// Fatal errors end the whole poll session.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, PollError::InvalidHandle(_))
    }

    /// Handle the error is attributed to, when it parsed.
    #[must_use]
    pub fn handle(&self) -> Option<&RemoteTaskHandle> {
        match self {
            PollError::InvalidHandle(_) => None,
            PollError::RetriesExhausted { handle, .. }
            | PollError::Query { handle, .. }
            | PollError::Cleanup { handle, .. } => Some(handle),
        }
    }
}
