//! Worker pool and job runner
//!
//! [`WorkerPool`] executes work items with bounded parallelism;
//! [`JobRunner`] keeps track of what was submitted and hands back finished
//! results exactly once.

mod pool;
mod runner;

pub use pool::{Job, WorkerPool};
pub use runner::JobRunner;
