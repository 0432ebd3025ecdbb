//! Core data types for the vmsctl job engine
//!
//! Everything here is plain data: work parameters, job results, structured
//! error records, remote task handles and statuses, and the derived progress
//! estimate. Execution lives in the pool and poller crates.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::VmsError;

/// A single named parameter handed to a unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

/// Ordered name→value mapping. Insertion order is preserved and a repeated
/// name replaces the earlier value in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(Vec<Parameter>);

impl Parameters {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|p| p.name == name) {
            Some(existing) => existing.value = value,
            None => self.0.push(Parameter { name, value }),
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    #[must_use]
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(Value::as_u64)
    }

    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|p| (p.name.as_str(), &p.value))
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Runner-internal job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Lifecycle of a job inside the runner.
///
/// `Submitted → Running → Completed → Retrieved`; no state is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Submitted,
    Running,
    Completed,
    Retrieved,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Submitted => "submitted",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Retrieved => "retrieved",
        };
        f.write_str(s)
    }
}

/// Where an error record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// The work item's own logic failed or reported a non-terminating error.
    Execution,
    /// The work item panicked.
    Panic,
    /// The job was abandoned by a pool shutdown.
    Cancelled,
    /// The remote task finished in the `Error` state.
    RemoteTask,
    /// Talking to the server failed after all retries.
    Communication,
    /// Bad input, e.g. a malformed task handle.
    Validation,
    /// Starting the remote operation failed.
    Submission,
}

impl ErrorCategory {
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Execution => "execution",
            ErrorCategory::Panic => "panic",
            ErrorCategory::Cancelled => "cancelled",
            ErrorCategory::RemoteTask => "remote-task",
            ErrorCategory::Communication => "communication",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Submission => "submission",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured error attributed to the entity it happened for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub key: String,
    pub category: ErrorCategory,
    pub message: String,
    pub code: Option<String>,
    pub at: DateTime<Utc>,
}

impl ErrorRecord {
    #[must_use]
    pub fn new(key: impl Into<String>, category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            category,
            message: message.into(),
            code: None,
            at: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {} ({}): {}", self.category, self.key, code, self.message),
            None => write!(f, "[{}] {}: {}", self.category, self.key, self.message),
        }
    }
}

/// Output of one job, produced exactly once at retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub key: String,
    pub output: Vec<Value>,
    pub errors: Vec<ErrorRecord>,
    /// `None` when the job never got an execution slot.
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
}

impl JobResult {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Wall time spent executing (zero when the job never started).
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.started_at
            .and_then(|start| (self.finished_at - start).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

static HANDLE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    // Infallible: the pattern is a literal.
    Regex::new(r"^([A-Za-z][A-Za-z0-9_]*)\[([1-9][0-9]*)\]$").unwrap()
});

/// Address of a server-side task, textually `<TypeName>[<positive-integer>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteTaskHandle {
    type_name: String,
    id: u64,
}

impl RemoteTaskHandle {
    /// Build a handle from parts; fails when either part breaks the grammar.
    pub fn new(type_name: impl Into<String>, id: u64) -> Result<Self, VmsError> {
        format!("{}[{}]", type_name.into(), id).parse()
    }

    #[inline]
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    #[inline]
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl FromStr for RemoteTaskHandle {
    type Err = VmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = HANDLE_PATTERN
            .captures(s)
            .ok_or_else(|| VmsError::InvalidHandle(s.to_string()))?;
        let id = caps[2]
            .parse::<u64>()
            .map_err(|_| VmsError::InvalidHandle(s.to_string()))?;
        Ok(Self {
            type_name: caps[1].to_string(),
            id,
        })
    }
}

impl TryFrom<String> for RemoteTaskHandle {
    type Error = VmsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RemoteTaskHandle> for String {
    fn from(handle: RemoteTaskHandle) -> Self {
        handle.to_string()
    }
}

impl fmt::Display for RemoteTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.type_name, self.id)
    }
}

/// State reported by the server for a remote task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    InProgress,
    Success,
    Error,
    Completed,
}

impl TaskState {
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Error | TaskState::Completed)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::InProgress => "in-progress",
            TaskState::Success => "success",
            TaskState::Error => "error",
            TaskState::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Snapshot of a remote task returned by the status query interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    /// 0 to 100.
    pub progress: u8,
    pub display_name: String,
    pub error_code: Option<String>,
    pub error_text: Option<String>,
    /// Whatever the task produced, when the server reports it with the status.
    #[serde(default)]
    pub payload: Option<Value>,
}

impl TaskStatus {
    #[must_use]
    pub fn new(state: TaskState, progress: u8) -> Self {
        Self {
            state,
            progress: progress.min(100),
            display_name: String::new(),
            error_code: None,
            error_text: None,
            payload: None,
        }
    }

    #[must_use]
    pub fn pending() -> Self {
        Self::new(TaskState::Pending, 0)
    }

    #[must_use]
    pub fn in_progress(progress: u8) -> Self {
        Self::new(TaskState::InProgress, progress)
    }

    #[must_use]
    pub fn success() -> Self {
        Self::new(TaskState::Success, 100)
    }

    #[must_use]
    pub fn failed(code: impl Into<String>, text: impl Into<String>) -> Self {
        let mut status = Self::new(TaskState::Error, 100);
        status.error_code = Some(code.into());
        status.error_text = Some(text.into());
        status
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Elapsed time and remaining-time estimate for a batch of tasks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEstimate {
    pub elapsed: Duration,
    pub remaining: Option<Duration>,
    pub completed: usize,
    pub total: usize,
}

impl ProgressEstimate {
    /// Derive an estimate.
    ///
    /// With at least one finished task the per-task average drives the
    /// estimate. Before that, a positive percent reported by the task being
    /// watched is extrapolated. Otherwise there is no estimate.
    #[must_use]
    pub fn compute(
        elapsed: Duration,
        completed: usize,
        total: usize,
        current_percent: Option<u8>,
    ) -> Self {
        let remaining = if completed > 0 {
            let left = total.saturating_sub(completed) as f64;
            Some(elapsed.mul_f64(left / completed as f64))
        } else {
            match current_percent {
                Some(p) if p > 0 => {
                    let p = f64::from(p.min(100));
                    Some(elapsed.mul_f64((100.0 - p) / p))
                }
                _ => None,
            }
        };
        Self {
            elapsed,
            remaining,
            completed,
            total,
        }
    }

    /// Batch progress percentage in [0.0, 100.0].
    #[inline]
    #[must_use]
    pub fn percent(&self) -> f32 {
        if self.total == 0 {
            0.0
        } else {
            (self.completed as f32 / self.total as f32) * 100.0
        }
    }
}
