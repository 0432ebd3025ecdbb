//! Seams between the engine and its external collaborators
//!
//! - [`Task`]: a unit of work run by the worker pool
//! - [`TaskClient`] / [`ClientFactory`]: the remote status query interface
//! - [`RemoteSubmitter`]: starts a remote operation and returns its handle

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::QueryError;
use crate::types::{ErrorCategory, ErrorRecord, JobId, Parameters, RemoteTaskHandle, TaskStatus};

/// Per-job execution context handed to [`Task::run`].
///
/// Cheap to clone. Connections or session objects a task needs belong in the
/// task itself, not in shared globals.
#[derive(Clone)]
pub struct TaskContext {
    job_id: JobId,
    key: Arc<str>,
    params: Arc<Parameters>,
    errors: Arc<Mutex<Vec<ErrorRecord>>>,
}

impl TaskContext {
    pub fn new(job_id: JobId, key: impl Into<Arc<str>>, params: Arc<Parameters>) -> Self {
        Self {
            job_id,
            key: key.into(),
            params,
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    #[inline]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn params(&self) -> &Parameters {
        &self.params
    }

    /// Record a non-terminating error; the task keeps running and the error
    /// lands in the job result next to its output.
    pub fn report_error(&self, message: impl Into<String>) {
        let record = ErrorRecord::new(self.key.as_ref(), ErrorCategory::Execution, message);
        self.errors.lock().push(record);
    }

    /// Drain errors reported so far.
    pub fn take_errors(&self) -> Vec<ErrorRecord> {
        std::mem::take(&mut *self.errors.lock())
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("job_id", &self.job_id)
            .field("key", &self.key)
            .field("params", &self.params.len())
            .finish()
    }
}

/// A unit of work executed on the worker pool.
#[async_trait]
pub trait Task: Send + Sync {
    /// Run to completion. Returned values become the job output; an `Err`
    /// becomes an execution error record in the job result.
    async fn run(&self, ctx: TaskContext) -> Result<Vec<Value>>;

    /// Short description used in logs.
    fn name(&self) -> &str {
        "task"
    }
}

/// Adapts an async closure into a [`Task`].
pub struct FnTask<F> {
    name: String,
    f: F,
}

impl<F> FnTask<F> {
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F, Fut> Task for FnTask<F>
where
    F: Fn(TaskContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Vec<Value>>> + Send + 'static,
{
    async fn run(&self, ctx: TaskContext) -> Result<Vec<Value>> {
        (self.f)(ctx).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// A task plus its parameters, attributed to an entity key.
#[derive(Clone)]
pub struct WorkItem {
    key: String,
    task: Arc<dyn Task>,
    params: Arc<Parameters>,
}

impl WorkItem {
    pub fn new(key: impl Into<String>, task: Arc<dyn Task>, params: Parameters) -> Self {
        Self {
            key: key.into(),
            task,
            params: Arc::new(params),
        }
    }

    /// Wrap an async closure.
    pub fn from_fn<F, Fut>(key: impl Into<String>, params: Parameters, f: F) -> Self
    where
        F: Fn(TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Value>>> + Send + 'static,
    {
        let key = key.into();
        let task = Arc::new(FnTask::new(key.clone(), f));
        Self::new(key, task, params)
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[inline]
    pub fn task(&self) -> &Arc<dyn Task> {
        &self.task
    }

    #[inline]
    pub fn params(&self) -> &Arc<Parameters> {
        &self.params
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("key", &self.key)
            .field("task", &self.task.name())
            .field("params", &self.params)
            .finish()
    }
}

/// Status query channel to a server.
#[async_trait]
pub trait TaskClient: Send + Sync {
    /// Current status of a remote task.
    async fn get_status(&self, handle: &RemoteTaskHandle) -> Result<TaskStatus, QueryError>;

    /// Whether tasks of this handle's type can be cleaned up after finishing.
    fn supports_cleanup(&self, _handle: &RemoteTaskHandle) -> bool {
        false
    }

    /// Remove a finished task from the server.
    async fn cleanup(&self, handle: &RemoteTaskHandle) -> Result<(), QueryError> {
        Err(QueryError::Rejected(format!(
            "cleanup is not supported for {}",
            handle.type_name()
        )))
    }
}

/// Opens a fresh [`TaskClient`]. Called on first use and again before every
/// retry of a failed query.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn TaskClient>, QueryError>;
}

/// Starts a remote operation for an entity and returns its task handle.
#[async_trait]
pub trait RemoteSubmitter: Send + Sync {
    async fn submit(&self, key: &str, params: &Parameters) -> Result<RemoteTaskHandle, QueryError>;
}
