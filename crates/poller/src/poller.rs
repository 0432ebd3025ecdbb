// crates/poller/src/poller.rs
//! Remote task poller - tracks server-side tasks until they finish

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use vmsctl_common::{
    ClientFactory, PollerOptions, ProgressEstimate, RemoteTaskHandle, TaskState, TaskStatus,
    VmsResult,
};

use crate::channel::Channel;
use crate::error::PollError;

/// Terminal status of one remote task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub handle: RemoteTaskHandle,
    pub status: TaskStatus,
    /// Status queries it took to see the terminal state.
    pub polls: u32,
    /// Time from the start of the session until the terminal state was seen.
    pub elapsed: Duration,
    pub cleaned_up: bool,
}

impl TaskOutcome {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.state != TaskState::Error
    }
}

/// Entry point for polling batches of remote tasks.
#[derive(Clone)]
pub struct RemoteTaskPoller {
    factory: Arc<dyn ClientFactory>,
    options: PollerOptions,
}

impl RemoteTaskPoller {
    pub fn new(factory: Arc<dyn ClientFactory>, options: PollerOptions) -> VmsResult<Self> {
        options.validate()?;
        Ok(Self { factory, options })
    }

    #[inline]
    pub fn options(&self) -> &PollerOptions {
        &self.options
    }

    /// Start tracking raw handles. Malformed ones are rejected right away and
    /// come out of the session first, before any status query is made.
    pub fn poll<I, S>(&self, handles: I) -> PollSession
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut valid = Vec::new();
        let mut invalid = VecDeque::new();
        for raw in handles {
            let raw = raw.as_ref();
            match raw.parse::<RemoteTaskHandle>() {
                Ok(handle) => valid.push(handle),
                Err(_) => {
                    warn!("Rejecting malformed task handle '{}'", raw);
                    invalid.push_back(raw.to_string());
                }
            }
        }
        PollSession::new(Channel::new(self.factory.clone(), &self.options), self.options.clone(), valid, invalid)
    }

    /// Start tracking already-validated handles.
    pub fn poll_handles(&self, handles: Vec<RemoteTaskHandle>) -> PollSession {
        PollSession::new(
            Channel::new(self.factory.clone(), &self.options),
            self.options.clone(),
            handles,
            VecDeque::new(),
        )
    }
}

#[derive(Debug)]
struct Tracked {
    handle: RemoteTaskHandle,
    polls: u32,
}

/// A lazy sequence of task outcomes. Each call to [`PollSession::next`]
/// polls until the next task reaches a terminal state, so early results are
/// available before the batch finishes. Dropping the session stops polling.
pub struct PollSession {
    channel: Channel,
    options: PollerOptions,
    invalid: VecDeque<String>,
    queue: VecDeque<Tracked>,
    ticker: Option<Interval>,
    started: Instant,
    total: usize,
    completed: usize,
    last_percent: Option<u8>,
    deferred: Option<PollError>,
    failed: bool,
}

impl PollSession {
    fn new(
        channel: Channel,
        options: PollerOptions,
        handles: Vec<RemoteTaskHandle>,
        invalid: VecDeque<String>,
    ) -> Self {
        let total = handles.len();
        Self {
            channel,
            options,
            invalid,
            queue: handles
                .into_iter()
                .map(|handle| Tracked { handle, polls: 0 })
                .collect(),
            ticker: None,
            started: Instant::now(),
            total,
            completed: 0,
            last_percent: None,
            deferred: None,
            failed: false,
        }
    }

    /// Valid handles not yet in a terminal state.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn total(&self) -> usize {
        self.total
    }

    #[inline]
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Whether a fatal error ended the session.
    #[inline]
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Elapsed time and remaining-time estimate as of the last status query.
    pub fn progress(&self) -> ProgressEstimate {
        let current = if self.completed == 0 { self.last_percent } else { None };
        ProgressEstimate::compute(self.started.elapsed(), self.completed, self.total, current)
    }

    /// Poll until the next task finishes.
    ///
    /// Yields `Ok` for every terminal task, including ones that ended in the
    /// `Error` state. Invalid handles yield a non-fatal `Err` first. A fatal
    /// `Err` ends the sequence; `None` follows it.
    #[instrument(skip(self), fields(outstanding = self.queue.len()))]
    pub async fn next(&mut self) -> Option<Result<TaskOutcome, PollError>> {
        if let Some(raw) = self.invalid.pop_front() {
            return Some(Err(PollError::InvalidHandle(raw)));
        }
        if let Some(err) = self.deferred.take() {
            return Some(Err(self.fail(err)));
        }
        if self.failed {
            return None;
        }

        while !self.queue.is_empty() {
            self.tick().await;
            let mut tracked = self.queue.pop_front()?;
            tracked.polls += 1;

            let status = match self.channel.query(&tracked.handle).await {
                Ok(status) => status,
                Err(err) => return Some(Err(self.fail(err))),
            };

            if !status.is_terminal() {
                debug!(
                    handle = %tracked.handle,
                    state = %status.state,
                    progress = status.progress,
                    "Task still running"
                );
                self.last_percent = Some(status.progress);
                self.queue.push_back(tracked);
                self.report_progress();
                continue;
            }

            self.completed += 1;
            let cleaned_up = match self.cleanup(&tracked.handle).await {
                Ok(done) => done,
                Err(err) => {
                    // The outcome is still delivered; the failure ends the session next call.
                    self.deferred = Some(err);
                    false
                }
            };

            let outcome = TaskOutcome {
                elapsed: self.started.elapsed(),
                handle: tracked.handle,
                status,
                polls: tracked.polls,
                cleaned_up,
            };
            info!(
                handle = %outcome.handle,
                state = %outcome.status.state,
                polls = outcome.polls,
                "Task finished ({}/{})",
                self.completed,
                self.total
            );
            self.report_progress();
            return Some(Ok(outcome));
        }

        None
    }

    /// Drive the session to the end. Non-fatal errors are collected next to
    /// the outcomes; a fatal error stops collection and is returned last.
    pub async fn collect(mut self) -> (Vec<TaskOutcome>, Vec<PollError>) {
        let mut outcomes = Vec::new();
        let mut errors = Vec::new();
        while let Some(item) = self.next().await {
            match item {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => errors.push(err),
            }
        }
        (outcomes, errors)
    }

    async fn tick(&mut self) {
        let period = self.options.interval;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });
        ticker.tick().await;
    }

    async fn cleanup(&mut self, handle: &RemoteTaskHandle) -> Result<bool, PollError> {
        if !self.options.cleanup || !self.channel.supports_cleanup(handle).await? {
            return Ok(false);
        }
        self.channel.cleanup(handle).await?;
        debug!(%handle, "Cleaned up finished task");
        Ok(true)
    }

    fn fail(&mut self, err: PollError) -> PollError {
        warn!(error = %err, abandoned = self.queue.len(), "Polling aborted");
        self.failed = true;
        self.queue.clear();
        err
    }

    fn report_progress(&self) {
        let estimate = self.progress();
        match estimate.remaining {
            Some(remaining) => debug!(
                completed = estimate.completed,
                total = estimate.total,
                elapsed_ms = estimate.elapsed.as_millis() as u64,
                remaining_ms = remaining.as_millis() as u64,
                "Polling progress"
            ),
            None => debug!(
                completed = estimate.completed,
                total = estimate.total,
                elapsed_ms = estimate.elapsed.as_millis() as u64,
                "Polling progress"
            ),
        }
    }
}
