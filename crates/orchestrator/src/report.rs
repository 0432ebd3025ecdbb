//! Aggregate report - per-target results joined by entity id

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use vmsctl_common::{ErrorCategory, ErrorRecord, JobResult, TaskState};
use vmsctl_poller::TaskOutcome;

/// Pass/fail verdict for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    Passed,
    /// Produced output but also reported errors.
    PartiallyFailed,
    Failed,
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetStatus::Passed => "passed",
            TargetStatus::PartiallyFailed => "partial",
            TargetStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Everything collected for one entity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    pub key: String,
    pub status: TargetStatus,
    pub output: Vec<Value>,
    pub errors: Vec<ErrorRecord>,
    pub duration: Duration,
    /// Job ids or task handles that contributed, for troubleshooting.
    pub sources: Vec<String>,
}

impl TargetReport {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            status: TargetStatus::Passed,
            output: Vec::new(),
            errors: Vec::new(),
            duration: Duration::ZERO,
            sources: Vec::new(),
        }
    }

    fn refresh_status(&mut self) {
        self.status = match (self.errors.is_empty(), self.output.is_empty()) {
            (true, _) => TargetStatus::Passed,
            (false, false) => TargetStatus::PartiallyFailed,
            (false, true) => TargetStatus::Failed,
        };
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub partially_failed: usize,
    pub failed: usize,
}

impl ReportSummary {
    /// Share of targets that passed, in [0.0, 100.0].
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }
}

/// One report for a whole fan-out, keyed by entity id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub targets: BTreeMap<String, TargetReport>,
}

impl Default for AggregateReport {
    fn default() -> Self {
        Self::new()
    }
}

impl AggregateReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            targets: BTreeMap::new(),
        }
    }

    fn entry(&mut self, key: &str) -> &mut TargetReport {
        self.targets
            .entry(key.to_string())
            .or_insert_with(|| TargetReport::new(key))
    }

    /// Fold a local job result into its target's entry.
    pub fn record_job(&mut self, result: JobResult) {
        let duration = result.duration();
        let entry = self.entry(&result.key);
        entry.sources.push(result.job_id.to_string());
        entry.output.extend(result.output);
        entry.errors.extend(result.errors);
        entry.duration += duration;
        entry.refresh_status();
    }

    /// Fold a finished remote task into its target's entry. Tasks that ended
    /// in the `Error` state count as failures with the server's code and text.
    pub fn record_outcome(&mut self, key: &str, outcome: &TaskOutcome) {
        let entry = self.entry(key);
        entry.sources.push(outcome.handle.to_string());
        entry.duration += outcome.elapsed;

        if outcome.status.state == TaskState::Error {
            let text = outcome
                .status
                .error_text
                .clone()
                .unwrap_or_else(|| "remote task failed".to_string());
            let mut record = ErrorRecord::new(key, ErrorCategory::RemoteTask, text);
            record.code = outcome.status.error_code.clone();
            entry.errors.push(record);
        } else {
            entry.output.push(json!({
                "task": outcome.handle.to_string(),
                "state": outcome.status.state,
                "display_name": outcome.status.display_name,
                "payload": outcome.status.payload,
                "polls": outcome.polls,
                "cleaned_up": outcome.cleaned_up,
            }));
        }
        entry.refresh_status();
    }

    /// Attribute a failure that produced no job result (submission refused,
    /// polling aborted) to a target.
    pub fn record_error(&mut self, record: ErrorRecord) {
        let key = record.key.clone();
        let entry = self.entry(&key);
        entry.errors.push(record);
        entry.refresh_status();
    }

    pub fn get(&self, key: &str) -> Option<&TargetReport> {
        self.targets.get(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Targets that did not fully pass.
    pub fn failures(&self) -> impl Iterator<Item = &TargetReport> {
        self.targets
            .values()
            .filter(|t| t.status != TargetStatus::Passed)
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary {
            total: self.targets.len(),
            ..Default::default()
        };
        for target in self.targets.values() {
            match target.status {
                TargetStatus::Passed => summary.passed += 1,
                TargetStatus::PartiallyFailed => summary.partially_failed += 1,
                TargetStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub(crate) fn finish(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmsctl_common::{JobId, RemoteTaskHandle, TaskStatus};

    fn job(id: u64, key: &str, output: Vec<Value>, errors: Vec<ErrorRecord>) -> JobResult {
        let now = Utc::now();
        JobResult {
            job_id: JobId(id),
            key: key.to_string(),
            output,
            errors,
            started_at: Some(now),
            finished_at: now,
        }
    }

    fn outcome(handle: &str, status: TaskStatus) -> TaskOutcome {
        TaskOutcome {
            handle: handle.parse::<RemoteTaskHandle>().unwrap(),
            status,
            polls: 2,
            elapsed: Duration::from_millis(40),
            cleaned_up: false,
        }
    }

    #[test]
    fn statuses_follow_output_and_errors() {
        let mut report = AggregateReport::new();
        report.record_job(job(1, "ok", vec![json!(1)], vec![]));
        report.record_job(job(
            2,
            "partial",
            vec![json!(2)],
            vec![ErrorRecord::new("partial", ErrorCategory::Execution, "one camera missing")],
        ));
        report.record_job(job(
            3,
            "bad",
            vec![],
            vec![ErrorRecord::new("bad", ErrorCategory::Execution, "login failed")],
        ));

        assert_eq!(report.get("ok").unwrap().status, TargetStatus::Passed);
        assert_eq!(report.get("partial").unwrap().status, TargetStatus::PartiallyFailed);
        assert_eq!(report.get("bad").unwrap().status, TargetStatus::Failed);

        let summary = report.summary();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.partially_failed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(report.failures().count(), 2);
    }

    #[test]
    fn repeated_keys_merge() {
        let mut report = AggregateReport::new();
        report.record_job(job(1, "rec-1", vec![json!("a")], vec![]));
        report.record_job(job(2, "rec-1", vec![json!("b")], vec![]));
        let entry = report.get("rec-1").unwrap();
        assert_eq!(entry.output.len(), 2);
        assert_eq!(entry.sources, vec!["job-1".to_string(), "job-2".to_string()]);
        assert_eq!(report.len(), 1);
    }

    #[test]
    fn remote_error_state_is_a_failure() {
        let mut report = AggregateReport::new();
        report.record_outcome("hw-1", &outcome("Scan[1]", TaskStatus::success()));
        report.record_outcome("hw-2", &outcome("Scan[2]", TaskStatus::failed("E9", "driver missing")));

        assert_eq!(report.get("hw-1").unwrap().status, TargetStatus::Passed);
        assert_eq!(report.get("hw-1").unwrap().output[0]["task"], "Scan[1]");

        let failed = report.get("hw-2").unwrap();
        assert_eq!(failed.status, TargetStatus::Failed);
        assert_eq!(failed.errors[0].code.as_deref(), Some("E9"));
        assert_eq!(failed.errors[0].category, ErrorCategory::RemoteTask);
        assert_eq!(failed.sources, vec!["Scan[2]".to_string()]);
    }

    #[test]
    fn report_serializes() {
        let mut report = AggregateReport::new();
        report.record_error(ErrorRecord::new("rec-9", ErrorCategory::Submission, "refused"));
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["targets"]["rec-9"]["status"], "Failed");
    }

    #[test]
    fn success_rate() {
        let summary = ReportSummary {
            total: 4,
            passed: 3,
            partially_failed: 0,
            failed: 1,
        };
        assert!((summary.success_rate() - 75.0).abs() < f64::EPSILON);
        assert_eq!(ReportSummary::default().success_rate(), 0.0);
    }
}
