//! Remote task poller
//!
//! Tracks server-side tasks, addressed by [`RemoteTaskHandle`]s, until each
//! reaches a terminal state. Status queries go through a [`Channel`] that
//! reconnects and retries on communication failures.
//!
//! [`RemoteTaskHandle`]: vmsctl_common::RemoteTaskHandle

mod channel;
mod error;
mod poller;

pub use channel::Channel;
pub use error::PollError;
pub use poller::{PollSession, RemoteTaskPoller, TaskOutcome};
