//! Orchestrator - fan-out across targets and aggregate reporting

mod orchestrator;
mod progress;
mod report;

pub use orchestrator::{Orchestrator, RemoteRequest};
pub use progress::ProgressTracker;
pub use report::{AggregateReport, ReportSummary, TargetReport, TargetStatus};
