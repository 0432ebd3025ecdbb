//! Progress tracking

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::info;

use vmsctl_common::ProgressEstimate;

/// Counts finished targets of a fan-out and derives an ETA from them.
pub struct ProgressTracker {
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    started: Mutex<Instant>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            started: Mutex::new(Instant::now()),
        }
    }

    /// Start a new run of `total` targets.
    pub fn reset(&self, total: usize) {
        self.total.store(total, Ordering::Release);
        self.completed.store(0, Ordering::Release);
        self.failed.store(0, Ordering::Release);
        *self.started.lock() = Instant::now();
    }

    pub fn record(&self, success: bool) {
        self.completed.fetch_add(1, Ordering::AcqRel);
        if !success {
            self.failed.fetch_add(1, Ordering::AcqRel);
        }
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Acquire)
    }

    /// Estimate based on finished targets only.
    pub fn estimate(&self) -> ProgressEstimate {
        ProgressEstimate::compute(self.started.lock().elapsed(), self.completed(), self.total(), None)
    }

    pub fn log_progress(&self) {
        let est = self.estimate();
        match est.remaining {
            Some(remaining) => info!(
                "Progress: {}/{} ({:.0}%), ~{}s remaining",
                est.completed,
                est.total,
                est.percent(),
                remaining.as_secs()
            ),
            None => info!("Progress: {}/{}", est.completed, est.total),
        }
    }

    pub fn print_summary(&self) {
        let total = self.total();
        let completed = self.completed();
        let failed = self.failed();

        info!("Fan-out Summary:");
        info!("  Total targets: {}", total);
        info!("  Completed: {}", completed);
        info!("  Failed: {}", failed);
        if total > 0 {
            info!(
                "  Success rate: {:.1}%",
                (completed.saturating_sub(failed) as f64 / total as f64) * 100.0
            );
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
