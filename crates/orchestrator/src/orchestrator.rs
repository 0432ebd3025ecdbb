// crates/orchestrator/src/orchestrator.rs
//! Orchestrator - fan-out of work across many targets and result aggregation

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use vmsctl_common::{
    ErrorCategory, ErrorRecord, Parameters, PoolOptions, RemoteSubmitter, RemoteTaskHandle,
    VmsResult, WorkItem,
};
use vmsctl_poller::{PollError, RemoteTaskPoller};
use vmsctl_pool::JobRunner;

use crate::progress::ProgressTracker;
use crate::report::AggregateReport;

/// A remote operation to start for one entity.
#[derive(Debug, Clone)]
pub struct RemoteRequest {
    pub key: String,
    pub params: Parameters,
}

impl RemoteRequest {
    pub fn new(key: impl Into<String>, params: Parameters) -> Self {
        Self {
            key: key.into(),
            params,
        }
    }
}

/// Runs one logical query against many targets and joins the results into
/// an [`AggregateReport`]. A failing target never stops the others.
pub struct Orchestrator {
    options: PoolOptions,
    progress: Arc<ProgressTracker>,
}

impl Orchestrator {
    pub fn new(options: PoolOptions) -> VmsResult<Self> {
        options.validate()?;
        Ok(Self {
            options,
            progress: Arc::new(ProgressTracker::new()),
        })
    }

    #[inline]
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }

    /// Run every work item on a pool of `capacity` slots.
    ///
    /// At most `capacity` jobs are tracked at a time; further items are
    /// submitted only as finished ones are collected.
    #[instrument(skip(self, items), fields(targets = items.len(), capacity = self.options.capacity))]
    pub async fn fan_out(&self, items: Vec<WorkItem>) -> VmsResult<AggregateReport> {
        let started = Instant::now();
        let mut report = AggregateReport::new();
        let mut runner = JobRunner::new(&self.options)?;
        let capacity = self.options.capacity;

        info!("Fanning out {} work item(s)", items.len());
        self.progress.reset(items.len());

        let mut pending: VecDeque<WorkItem> = items.into();
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while !pending.is_empty() || runner.has_pending_jobs() {
            while runner.tracked_count() < capacity {
                let Some(item) = pending.pop_front() else {
                    break;
                };
                let key = item.key().to_string();
                if let Err(e) = runner.add_job(item) {
                    warn!("Could not submit work for {}: {}", key, e);
                    report.record_error(ErrorRecord::new(key, ErrorCategory::Submission, e.to_string()));
                    self.progress.record(false);
                }
            }

            ticker.tick().await;

            let results = runner.receive_jobs(None).await;
            if results.is_empty() {
                continue;
            }
            for result in results {
                debug!("{} finished for {} ({} error(s))", result.job_id, result.key, result.errors.len());
                self.progress.record(result.is_success());
                report.record_job(result);
            }
            self.progress.log_progress();
        }

        runner.dispose();
        self.progress.print_summary();
        Ok(report.finish(started.elapsed()))
    }

    /// Start a remote operation per request and poll all of them to the end.
    ///
    /// Submission failures, remote `Error` states and a fatal polling error
    /// are all attributed to the affected keys; every request ends up in the
    /// report.
    #[instrument(skip_all, fields(targets = requests.len()))]
    pub async fn fan_out_remote(
        &self,
        submitter: &dyn RemoteSubmitter,
        poller: &RemoteTaskPoller,
        requests: Vec<RemoteRequest>,
    ) -> AggregateReport {
        let started = Instant::now();
        let mut report = AggregateReport::new();
        self.progress.reset(requests.len());

        let mut owners: HashMap<RemoteTaskHandle, VecDeque<String>> = HashMap::new();
        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            match submitter.submit(&request.key, &request.params).await {
                Ok(handle) => {
                    debug!("Started {} for {}", handle, request.key);
                    owners.entry(handle.clone()).or_default().push_back(request.key);
                    handles.push(handle);
                }
                Err(e) => {
                    warn!("Submission for {} failed: {}", request.key, e);
                    report.record_error(ErrorRecord::new(request.key, ErrorCategory::Submission, e.to_string()));
                    self.progress.record(false);
                }
            }
        }

        info!("Polling {} remote task(s)", handles.len());
        let mut session = poller.poll_handles(handles);
        let mut fatal: Option<PollError> = None;

        while let Some(item) = session.next().await {
            match item {
                Ok(outcome) => {
                    let owner = owners.get_mut(&outcome.handle).and_then(VecDeque::pop_front);
                    let key = owner.unwrap_or_else(|| outcome.handle.to_string());
                    self.progress.record(outcome.is_success());
                    report.record_outcome(&key, &outcome);
                    self.progress.log_progress();
                }
                Err(err) if err.is_fatal() => fatal = Some(err),
                Err(err) => warn!("Skipping task: {}", err),
            }
        }

        if let Some(err) = fatal {
            let failed_handle = err.handle().cloned();
            for (handle, keys) in owners {
                for key in keys {
                    let message = if Some(&handle) == failed_handle.as_ref() {
                        err.to_string()
                    } else {
                        format!("polling aborted before {handle} finished: {err}")
                    };
                    report.record_error(ErrorRecord::new(key, ErrorCategory::Communication, message));
                    self.progress.record(false);
                }
            }
        }

        self.progress.print_summary();
        report.finish(started.elapsed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;
    use vmsctl_common::{
        ClientFactory, PollerOptions, QueryError, TaskClient, TaskContext, TaskStatus,
    };

    use crate::report::TargetStatus;

    fn options(capacity: usize) -> PoolOptions {
        PoolOptions::default()
            .with_capacity(capacity)
            .with_poll_interval(Duration::from_millis(5))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fan_out_keeps_going_past_failures() {
        let orch = Orchestrator::new(options(3)).unwrap();
        let items: Vec<WorkItem> = (0..9)
            .map(|i| {
                WorkItem::from_fn(
                    format!("rec-{i}"),
                    Parameters::new().with("index", i),
                    |ctx: TaskContext| async move {
                        let index = ctx.params().get_u64("index").unwrap_or(0);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        match index % 3 {
                            0 => Err(anyhow::anyhow!("recorder {index} offline")),
                            1 => {
                                ctx.report_error("one camera disabled");
                                Ok(vec![Value::from(index)])
                            }
                            _ => Ok(vec![Value::from(index)]),
                        }
                    },
                )
            })
            .collect();

        let report = orch.fan_out(items).await.unwrap();
        assert_eq!(report.len(), 9);
        let summary = report.summary();
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.partially_failed, 3);
        assert_eq!(summary.passed, 3);

        let failed = report.get("rec-3").unwrap();
        assert_eq!(failed.status, TargetStatus::Failed);
        assert!(failed.errors[0].message.contains("recorder 3 offline"));
        assert_eq!(failed.errors[0].key, "rec-3");

        let progress = orch.progress();
        assert_eq!(progress.completed(), 9);
        assert_eq!(progress.failed(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fan_out_bounds_in_flight_work() {
        let orch = Orchestrator::new(options(2)).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items: Vec<WorkItem> = (0..8)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                WorkItem::from_fn(format!("dev-{i}"), Parameters::new(), move |_ctx: TaskContext| {
                    let running = running.clone();
                    let peak = peak.clone();
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(15)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(Vec::new())
                    }
                })
            })
            .collect();

        let report = orch.fan_out(items).await.unwrap();
        assert_eq!(report.summary().passed, 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    // Simulated server: Scan[n] finishes after n polls, keys containing
    // "broken" end in the Error state, keys containing "refuse" cannot be
    // submitted, and the handle listed in `drop_on` loses the connection.
    #[derive(Default)]
    struct Server {
        next: AtomicU64,
        polls: Mutex<HashMap<u64, u32>>,
        broken: Mutex<Vec<u64>>,
        drop_on: Option<u64>,
    }

    #[async_trait]
    impl RemoteSubmitter for Server {
        async fn submit(&self, key: &str, _params: &Parameters) -> Result<RemoteTaskHandle, QueryError> {
            if key.contains("refuse") {
                return Err(QueryError::Rejected(format!("{key} is read-only")));
            }
            let id = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            if key.contains("broken") {
                self.broken.lock().push(id);
            }
            RemoteTaskHandle::new("Scan", id).map_err(|e| QueryError::Rejected(e.to_string()))
        }
    }

    struct ServerClient(Arc<Server>);

    #[async_trait]
    impl TaskClient for ServerClient {
        async fn get_status(&self, handle: &RemoteTaskHandle) -> Result<TaskStatus, QueryError> {
            let id = handle.id();
            if self.0.drop_on == Some(id) {
                return Err(QueryError::Communication("connection reset".into()));
            }
            let mut polls = self.0.polls.lock();
            let count = polls.entry(id).or_insert(0);
            *count += 1;
            if u64::from(*count) < id {
                return Ok(TaskStatus::in_progress(50));
            }
            if self.0.broken.lock().contains(&id) {
                return Ok(TaskStatus::failed("E500", "scan crashed"));
            }
            Ok(TaskStatus::success().with_payload(serde_json::json!({ "found": id })))
        }
    }

    struct ServerFactory(Arc<Server>);

    #[async_trait]
    impl ClientFactory for ServerFactory {
        async fn connect(&self) -> Result<Arc<dyn TaskClient>, QueryError> {
            Ok(Arc::new(ServerClient(self.0.clone())))
        }
    }

    fn remote_poller(server: &Arc<Server>) -> RemoteTaskPoller {
        let options = PollerOptions::fast()
            .with_interval(Duration::from_millis(1))
            .with_retry_delay(Duration::from_millis(1));
        RemoteTaskPoller::new(Arc::new(ServerFactory(server.clone())), options).unwrap()
    }

    #[tokio::test]
    async fn remote_fan_out_attributes_each_outcome() {
        let server = Arc::new(Server::default());
        let orch = Orchestrator::new(options(2)).unwrap();
        let requests = vec![
            RemoteRequest::new("hw-a", Parameters::new()),
            RemoteRequest::new("hw-broken", Parameters::new()),
            RemoteRequest::new("hw-refuse", Parameters::new()),
            RemoteRequest::new("hw-c", Parameters::new()),
        ];

        let report = orch
            .fan_out_remote(server.as_ref(), &remote_poller(&server), requests)
            .await;

        assert_eq!(report.len(), 4);
        let a = report.get("hw-a").unwrap();
        assert_eq!(a.status, TargetStatus::Passed);
        assert_eq!(a.output[0]["payload"]["found"], 1);
        assert_eq!(a.sources, vec!["Scan[1]".to_string()]);

        let broken = report.get("hw-broken").unwrap();
        assert_eq!(broken.status, TargetStatus::Failed);
        assert_eq!(broken.errors[0].code.as_deref(), Some("E500"));

        let refused = report.get("hw-refuse").unwrap();
        assert_eq!(refused.errors[0].category, ErrorCategory::Submission);

        assert_eq!(report.get("hw-c").unwrap().status, TargetStatus::Passed);
        assert_eq!(report.summary().passed, 2);
    }

    #[tokio::test]
    async fn fatal_poll_error_fails_unfinished_targets() {
        let server = Arc::new(Server {
            drop_on: Some(2),
            ..Server::default()
        });
        let orch = Orchestrator::new(options(2)).unwrap();
        let requests = vec![
            RemoteRequest::new("hw-1", Parameters::new()),
            RemoteRequest::new("hw-2", Parameters::new()),
            RemoteRequest::new("hw-3", Parameters::new()),
        ];

        let report = orch
            .fan_out_remote(server.as_ref(), &remote_poller(&server), requests)
            .await;

        assert_eq!(report.len(), 3);
        assert_eq!(report.get("hw-1").unwrap().status, TargetStatus::Passed);

        let dropped = report.get("hw-2").unwrap();
        assert_eq!(dropped.status, TargetStatus::Failed);
        assert_eq!(dropped.errors[0].category, ErrorCategory::Communication);
        assert!(dropped.errors[0].message.contains("5 attempt"));

        let abandoned = report.get("hw-3").unwrap();
        assert_eq!(abandoned.status, TargetStatus::Failed);
        assert!(abandoned.errors[0].message.contains("polling aborted"));
    }
}
