// crates/pool/src/pool.rs
//! Worker pool - bounded concurrent execution of work items

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use vmsctl_common::{
    ErrorCategory, ErrorRecord, JobId, JobResult, JobState, PoolOptions, TaskContext, VmsError,
    VmsResult, WorkItem,
};

const SUBMITTED: u8 = 0;
const RUNNING: u8 = 1;
const COMPLETED: u8 = 2;

/// State shared between a [`Job`] and the task executing it.
struct JobShared {
    state: AtomicU8,
    started_at: Mutex<Option<DateTime<Utc>>>,
}

impl JobShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SUBMITTED),
            started_at: Mutex::new(None),
        }
    }

    fn start(&self) -> DateTime<Utc> {
        let now = Utc::now();
        *self.started_at.lock() = Some(now);
        self.state.store(RUNNING, Ordering::Release);
        now
    }
}

/// Handle to a submitted work item.
///
/// `end_invoke` consumes the handle, so a result can be collected at most once.
pub struct Job {
    id: JobId,
    key: String,
    shared: Arc<JobShared>,
    handle: JoinHandle<JobResult>,
}

impl Job {
    #[inline]
    pub fn id(&self) -> JobId {
        self.id
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Non-blocking completion check.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn state(&self) -> JobState {
        if self.handle.is_finished() {
            return JobState::Completed;
        }
        match self.shared.state.load(Ordering::Acquire) {
            SUBMITTED => JobState::Submitted,
            RUNNING => JobState::Running,
            _ => JobState::Completed,
        }
    }

    /// Wait for the job and collect its result. Failures of the work item,
    /// including panics, are returned as error records, never raised.
    pub async fn end_invoke(self) -> JobResult {
        let Job {
            id,
            key,
            shared,
            handle,
        } = self;
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                let started_at = *shared.started_at.lock();
                let record = if e.is_panic() {
                    let message = panic_message(e.into_panic());
                    ErrorRecord::new(key.as_str(), ErrorCategory::Panic, format!("work item panicked: {message}"))
                } else {
                    ErrorRecord::new(key.as_str(), ErrorCategory::Cancelled, "job was aborted")
                };
                JobResult {
                    job_id: id,
                    key,
                    output: Vec::new(),
                    errors: vec![record],
                    started_at,
                    finished_at: Utc::now(),
                }
            }
        }
    }

    /// Stop the job; a later `end_invoke` reports it as cancelled.
    pub(crate) fn abort(&self) {
        self.handle.abort();
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("state", &self.state())
            .finish()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Decrements the running count and marks the job finished, also on panic or abort.
struct RunningGuard {
    running: Arc<AtomicUsize>,
    shared: Arc<JobShared>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::AcqRel);
        self.shared.state.store(COMPLETED, Ordering::Release);
    }
}

/// Fixed-capacity pool. Every submitted item gets its own tokio task, which
/// waits for one of `capacity` permits before running, so excess work queues
/// inside the pool instead of blocking the submitter.
pub struct WorkerPool {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    next_id: AtomicU64,
}

impl WorkerPool {
    /// Create a pool; a capacity of zero is rejected.
    pub fn new(capacity: usize) -> VmsResult<Self> {
        if capacity == 0 {
            return Err(VmsError::InvalidPoolSize(capacity));
        }
        Ok(Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn with_options(options: &PoolOptions) -> VmsResult<Self> {
        options.validate()?;
        Self::new(options.capacity)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Work items executing right now.
    #[inline]
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Acquire)
    }

    /// Highest number of items that ever executed at once.
    #[inline]
    pub fn peak_running(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.semaphore.is_closed()
    }

    /// Submit a work item. Never waits for a free slot; fails only after
    /// [`WorkerPool::shutdown`]. Must be called from within a tokio runtime.
    #[instrument(skip(self, item), fields(key = item.key()))]
    pub fn submit(&self, item: WorkItem) -> VmsResult<Job> {
        if self.is_shut_down() {
            return Err(VmsError::PoolShutdown);
        }

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let key = item.key().to_string();
        let shared = Arc::new(JobShared::new());

        let handle = tokio::spawn(execute(
            id,
            item,
            self.semaphore.clone(),
            self.running.clone(),
            self.peak.clone(),
            shared.clone(),
        ));
        debug!("Submitted {} for {}", id, key);

        Ok(Job {
            id,
            key,
            shared,
            handle,
        })
    }

    /// Refuse new work. Items still waiting for a slot finish as cancelled;
    /// items already running are left alone.
    pub fn shutdown(&self) {
        if !self.semaphore.is_closed() {
            debug!("Shutting down worker pool (capacity={})", self.capacity);
            self.semaphore.close();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.semaphore.close();
    }
}

async fn execute(
    id: JobId,
    item: WorkItem,
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    shared: Arc<JobShared>,
) -> JobResult {
    let key = item.key().to_string();

    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            shared.state.store(COMPLETED, Ordering::Release);
            return JobResult {
                job_id: id,
                errors: vec![ErrorRecord::new(
                    key.as_str(),
                    ErrorCategory::Cancelled,
                    "pool shut down before the job started",
                )],
                key,
                output: Vec::new(),
                started_at: None,
                finished_at: Utc::now(),
            };
        }
    };

    // Declared after the permit so the running count drops before the slot is released.
    let now_running = running.fetch_add(1, Ordering::AcqRel) + 1;
    peak.fetch_max(now_running, Ordering::AcqRel);
    let _guard = RunningGuard {
        running,
        shared: shared.clone(),
    };
    let started_at = shared.start();

    let ctx = TaskContext::new(id, key.as_str(), item.params().clone());
    let outcome = item.task().run(ctx.clone()).await;

    let mut errors = ctx.take_errors();
    let output = match outcome {
        Ok(values) => values,
        Err(e) => {
            warn!("{} ({}) failed: {:#}", id, key, e);
            errors.push(ErrorRecord::new(key.as_str(), ErrorCategory::Execution, format!("{e:#}")));
            Vec::new()
        }
    };

    JobResult {
        job_id: id,
        key,
        output,
        errors,
        started_at: Some(started_at),
        finished_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::time::Duration;
    use vmsctl_common::{Parameters, TaskContext};

    fn sleeper(key: &str, value: u64, ms: u64) -> WorkItem {
        WorkItem::from_fn(key, Parameters::new().with("value", value), move |ctx: TaskContext| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(vec![ctx.params().get("value").cloned().unwrap_or(Value::Null)])
        })
    }

    #[test]
    fn zero_capacity_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(VmsError::InvalidPoolSize(0))));
    }

    #[tokio::test]
    async fn returns_output_of_work_item() {
        let pool = WorkerPool::new(2).unwrap();
        let job = pool.submit(sleeper("rec-1", 5, 1)).unwrap();
        assert_eq!(job.key(), "rec-1");

        let result = job.end_invoke().await;
        assert_eq!(result.key, "rec-1");
        assert_eq!(result.output, vec![Value::from(5)]);
        assert!(result.is_success());
        assert!(result.started_at.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn never_exceeds_capacity() {
        let pool = WorkerPool::new(3).unwrap();
        let jobs: Vec<Job> = (0..12)
            .map(|i| pool.submit(sleeper(&format!("t{i}"), i, 30)).unwrap())
            .collect();

        // Submission did not block behind the running items.
        assert!(jobs.iter().any(|j| !j.is_complete()));

        for job in jobs {
            job.end_invoke().await;
        }
        assert!(pool.peak_running() <= 3);
        assert!(pool.peak_running() >= 1);
        assert_eq!(pool.running(), 0);
    }

    #[tokio::test]
    async fn execution_error_is_captured() {
        let pool = WorkerPool::new(1).unwrap();
        let item = WorkItem::from_fn("cam-7", Parameters::new(), |_ctx: TaskContext| async move {
            Err(anyhow::anyhow!("device unreachable"))
        });
        let result = pool.submit(item).unwrap().end_invoke().await;
        assert!(result.output.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].category, ErrorCategory::Execution);
        assert!(result.errors[0].message.contains("device unreachable"));
    }

    #[tokio::test]
    async fn partial_output_with_reported_errors() {
        let pool = WorkerPool::new(1).unwrap();
        let item = WorkItem::from_fn("rec-3", Parameters::new(), |ctx: TaskContext| async move {
            ctx.report_error("camera 4 skipped");
            Ok(vec![Value::from("cam-1"), Value::from("cam-2")])
        });
        let result = pool.submit(item).unwrap().end_invoke().await;
        assert_eq!(result.output.len(), 2);
        assert_eq!(result.errors.len(), 1);
        assert!(!result.is_success());
    }

    #[tokio::test]
    async fn panic_is_captured() {
        let pool = WorkerPool::new(1).unwrap();
        let item = WorkItem::from_fn("rec-p", Parameters::new(), |_ctx: TaskContext| async move {
            if true {
                panic!("boom");
            }
            Ok(Vec::new())
        });
        let result = pool.submit(item).unwrap().end_invoke().await;
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].category, ErrorCategory::Panic);
        assert!(result.errors[0].message.contains("boom"));
        assert_eq!(pool.running(), 0);

        // The slot was released.
        let next = pool.submit(sleeper("after", 1, 1)).unwrap().end_invoke().await;
        assert!(next.is_success());
    }

    #[tokio::test]
    async fn submit_after_shutdown_fails_and_queued_items_cancel() {
        let pool = WorkerPool::new(1).unwrap();
        let running = pool.submit(sleeper("first", 1, 50)).unwrap();
        let queued = pool.submit(sleeper("second", 2, 1)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(queued.state(), JobState::Submitted);

        pool.shutdown();
        assert!(matches!(pool.submit(sleeper("third", 3, 1)), Err(VmsError::PoolShutdown)));

        let queued = queued.end_invoke().await;
        assert_eq!(queued.errors[0].category, ErrorCategory::Cancelled);
        assert!(queued.started_at.is_none());

        let running = running.end_invoke().await;
        assert!(running.is_success());
    }

    #[tokio::test]
    async fn aborted_job_reports_cancelled() {
        let pool = WorkerPool::new(1).unwrap();
        let job = pool.submit(sleeper("slow", 1, 10_000)).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(job.state(), JobState::Running);
        job.abort();
        let result = job.end_invoke().await;
        assert_eq!(result.errors[0].category, ErrorCategory::Cancelled);
        assert!(result.started_at.is_some());
    }
}
