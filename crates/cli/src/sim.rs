//! In-process stand-in for a management server.
//!
//! Implements the submission, status query and statistics collaborators so
//! the commands can run without a real server.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use vmsctl_common::{
    ClientFactory, Parameters, QueryError, RemoteSubmitter, RemoteTaskHandle, Task, TaskClient,
    TaskContext, TaskStatus,
};

/// Task type used for hardware scans.
pub const SCAN_TASK_TYPE: &str = "HardwareScan";

#[derive(Debug)]
struct SimTask {
    key: String,
    polls_needed: u32,
    polls: u32,
    fails: bool,
}

#[derive(Default)]
struct ServerState {
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, SimTask>>,
    transient_left: AtomicU32,
    connects: AtomicU32,
}

/// Simulated server. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SimulatedServer {
    state: Arc<ServerState>,
    max_polls: u32,
    fail_every: usize,
}

impl SimulatedServer {
    pub fn new(max_polls: u32, fail_every: usize, transient_failures: u32) -> Self {
        let state = ServerState::default();
        state.transient_left.store(transient_failures, Ordering::Relaxed);
        Self {
            state: Arc::new(state),
            max_polls: max_polls.max(1),
            fail_every,
        }
    }

    /// Channels opened so far.
    pub fn connects(&self) -> u32 {
        self.state.connects.load(Ordering::Relaxed)
    }

    fn should_fail(&self, index: u64) -> bool {
        self.fail_every > 0 && index % self.fail_every as u64 == 0
    }
}

#[async_trait]
impl RemoteSubmitter for SimulatedServer {
    async fn submit(&self, key: &str, _params: &Parameters) -> Result<RemoteTaskHandle, QueryError> {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let polls_needed = rand::thread_rng().gen_range(1..=self.max_polls);
        self.state.tasks.lock().insert(
            id,
            SimTask {
                key: key.to_string(),
                polls_needed,
                polls: 0,
                fails: self.should_fail(id),
            },
        );
        debug!("Simulated scan {} for {} needs {} poll(s)", id, key, polls_needed);
        RemoteTaskHandle::new(SCAN_TASK_TYPE, id).map_err(|e| QueryError::Rejected(e.to_string()))
    }
}

#[async_trait]
impl ClientFactory for SimulatedServer {
    async fn connect(&self) -> Result<Arc<dyn TaskClient>, QueryError> {
        self.state.connects.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(SimClient(self.state.clone())))
    }
}

struct SimClient(Arc<ServerState>);

#[async_trait]
impl TaskClient for SimClient {
    async fn get_status(&self, handle: &RemoteTaskHandle) -> Result<TaskStatus, QueryError> {
        let injected = self
            .0
            .transient_left
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |left| left.checked_sub(1));
        if injected.is_ok() {
            return Err(QueryError::Communication("connection reset by peer".into()));
        }

        let mut tasks = self.0.tasks.lock();
        let task = tasks
            .get_mut(&handle.id())
            .ok_or_else(|| QueryError::Rejected(format!("no such task {handle}")))?;
        task.polls += 1;

        let status = if task.polls < task.polls_needed {
            let percent = (task.polls * 100 / task.polls_needed).min(99) as u8;
            TaskStatus::in_progress(percent)
        } else if task.fails {
            TaskStatus::failed("0x80004005", format!("hardware scan of {} timed out", task.key))
        } else {
            TaskStatus::success().with_payload(json!({
                "hardware": task.key,
                "driver": "ONVIF",
                "channels": (handle.id() % 4) + 1,
            }))
        };
        Ok(status.with_display_name(format!("Scan {}", task.key)))
    }

    fn supports_cleanup(&self, handle: &RemoteTaskHandle) -> bool {
        handle.type_name() == SCAN_TASK_TYPE
    }

    async fn cleanup(&self, handle: &RemoteTaskHandle) -> Result<(), QueryError> {
        self.0
            .tasks
            .lock()
            .remove(&handle.id())
            .map(|_| ())
            .ok_or_else(|| QueryError::Rejected(format!("no such task {handle}")))
    }
}

/// Reads statistics from one recorder.
pub struct RecorderStatsTask {
    delay: Duration,
    fail_every: usize,
}

impl RecorderStatsTask {
    pub fn new(delay: Duration, fail_every: usize) -> Self {
        Self { delay, fail_every }
    }
}

#[async_trait]
impl Task for RecorderStatsTask {
    async fn run(&self, ctx: TaskContext) -> Result<Vec<Value>> {
        let index = ctx.params().get_u64("index").unwrap_or(0);
        let jitter = rand::thread_rng().gen_range(0..=self.delay.as_millis() as u64 / 4);
        tokio::time::sleep(self.delay + Duration::from_millis(jitter)).await;

        if self.fail_every > 0 && (index + 1) % self.fail_every as u64 == 0 {
            bail!("recorder {} did not answer", ctx.key());
        }

        let (cameras, offline, used_gb) = {
            let mut rng = rand::thread_rng();
            let cameras: u64 = rng.gen_range(4..=32);
            (cameras, rng.gen_range(0..=2u64), rng.gen_range(100..=4000u64))
        };
        if offline > 0 {
            ctx.report_error(format!("{offline} camera(s) not reporting"));
        }

        Ok(vec![json!({
            "recorder": ctx.key(),
            "cameras": cameras,
            "cameras_offline": offline,
            "storage_used_gb": used_gb,
        })])
    }

    fn name(&self) -> &str {
        "recorder-stats"
    }
}
