// crates/pool/src/runner.rs
//! Job runner - bookkeeping for jobs submitted to a worker pool

use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use vmsctl_common::{JobId, JobResult, JobState, PoolOptions, VmsResult, WorkItem};

use crate::pool::{Job, WorkerPool};

/// Tracks submitted jobs so callers can collect the finished ones without
/// keeping handles themselves.
///
/// All methods take `&mut self` or `&self` on a single owner; share a runner
/// across tasks only behind your own lock.
pub struct JobRunner {
    pool: WorkerPool,
    jobs: Vec<Job>,
    retrieved: HashSet<JobId>,
    poll_interval: Duration,
}

impl JobRunner {
    pub fn new(options: &PoolOptions) -> VmsResult<Self> {
        Ok(Self {
            pool: WorkerPool::with_options(options)?,
            jobs: Vec::new(),
            retrieved: HashSet::new(),
            poll_interval: options.poll_interval,
        })
    }

    /// Runner over a pool of `capacity` slots with the default poll interval.
    pub fn with_capacity(capacity: usize) -> VmsResult<Self> {
        Self::new(&PoolOptions::default().with_capacity(capacity))
    }

    #[inline]
    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    #[inline]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Submit a work item and start tracking it.
    pub fn add_job(&mut self, item: WorkItem) -> VmsResult<JobId> {
        let job = self.pool.submit(item)?;
        let id = job.id();
        self.jobs.push(job);
        Ok(id)
    }

    /// Collect every completed job among `ids` (all tracked jobs when `None`).
    ///
    /// Collected jobs stop being tracked, so each result is delivered once.
    /// Jobs still running are left as they are.
    pub async fn receive_jobs(&mut self, ids: Option<&[JobId]>) -> Vec<JobResult> {
        let (ready, pending): (Vec<Job>, Vec<Job>) = std::mem::take(&mut self.jobs)
            .into_iter()
            .partition(|job| selected(ids, job.id()) && job.is_complete());
        self.jobs = pending;

        let mut results = Vec::with_capacity(ready.len());
        for job in ready {
            self.retrieved.insert(job.id());
            results.push(job.end_invoke().await);
        }
        if !results.is_empty() {
            debug!("Received {} job(s), {} still tracked", results.len(), self.jobs.len());
        }
        results
    }

    /// Suspend until every job among `ids` (all tracked jobs when `None`) has
    /// completed, re-checking on the poll interval. Results stay tracked.
    #[instrument(skip(self, ids), fields(tracked = self.jobs.len()))]
    pub async fn wait(&self, ids: Option<&[JobId]>) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        loop {
            ticker.tick().await;
            if self.all_complete(ids) {
                return;
            }
        }
    }

    /// Like [`JobRunner::wait`] but gives up after `timeout`. Returns whether
    /// all jobs completed.
    pub async fn wait_timeout(&self, ids: Option<&[JobId]>, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.wait(ids)).await.is_ok()
    }

    /// Whether any job is still tracked (running or awaiting collection).
    #[inline]
    pub fn has_pending_jobs(&self) -> bool {
        !self.jobs.is_empty()
    }

    #[inline]
    pub fn tracked_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|job| job.state() == JobState::Running)
            .count()
    }

    pub fn completed_count(&self) -> usize {
        self.jobs.iter().filter(|job| job.is_complete()).count()
    }

    /// Lifecycle state of a job issued by this runner.
    pub fn state(&self, id: JobId) -> Option<JobState> {
        if let Some(job) = self.jobs.iter().find(|job| job.id() == id) {
            return Some(job.state());
        }
        self.retrieved.contains(&id).then_some(JobState::Retrieved)
    }

    /// Abort and forget all tracked jobs and shut the pool down. Results not
    /// yet received are lost. Returns how many were discarded.
    pub fn dispose(&mut self) -> usize {
        let discarded = self.jobs.len();
        for job in self.jobs.drain(..) {
            job.abort();
        }
        self.retrieved.clear();
        self.pool.shutdown();
        if discarded > 0 {
            warn!("Disposed job runner with {} unreceived job(s)", discarded);
        } else {
            info!("Disposed job runner");
        }
        discarded
    }

    fn all_complete(&self, ids: Option<&[JobId]>) -> bool {
        self.jobs
            .iter()
            .filter(|job| selected(ids, job.id()))
            .all(Job::is_complete)
    }
}

impl Drop for JobRunner {
    fn drop(&mut self) {
        for job in &self.jobs {
            job.abort();
        }
        self.pool.shutdown();
    }
}

fn selected(ids: Option<&[JobId]>, id: JobId) -> bool {
    ids.map_or(true, |ids| ids.contains(&id))
}
