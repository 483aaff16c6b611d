//! Run statistics and the end-of-batch report.
//!
//! Workers record into shared atomic counters; the pool turns them into a
//! [`BatchReport`] once every dispatched task has been joined.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// What happened to one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    /// Features computed and written
    Written { path: PathBuf },
    /// The task failed; an artifact recording the error was written
    FailedWithArtifact { path: PathBuf, reason: String },
    /// No artifact could be written
    WriteFailed { path: PathBuf, reason: String },
    /// The task exceeded its time limit; an error artifact was written
    TimedOut { path: PathBuf },
    /// Never dispatched because the run was stopped
    Cancelled,
    /// The worker died before reporting; whether an artifact exists is unknown
    Aborted { reason: String },
}

impl TaskOutcome {
    /// Whether an artifact exists for the task.
    pub fn produced_artifact(&self) -> bool {
        matches!(
            self,
            TaskOutcome::Written { .. }
                | TaskOutcome::FailedWithArtifact { .. }
                | TaskOutcome::TimedOut { .. }
        )
    }
}

/// Counters shared by all workers of one run.
#[derive(Debug)]
pub struct RunStats {
    tasks_dispatched: AtomicU64,
    artifacts_written: AtomicU64,
    error_artifacts: AtomicU64,
    write_failures: AtomicU64,
    timeouts: AtomicU64,
    cancelled: AtomicU64,
    aborted: AtomicU64,
    lines_skipped: AtomicU64,
    scan_errors: AtomicU64,
    samples_skipped: AtomicU64,
    started_at: DateTime<Utc>,
}

impl RunStats {
    pub fn new() -> Self {
        Self {
            tasks_dispatched: AtomicU64::new(0),
            artifacts_written: AtomicU64::new(0),
            error_artifacts: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
            cancelled: AtomicU64::new(0),
            aborted: AtomicU64::new(0),
            lines_skipped: AtomicU64::new(0),
            scan_errors: AtomicU64::new(0),
            samples_skipped: AtomicU64::new(0),
            started_at: Utc::now(),
        }
    }

    pub fn record_dispatched(&self) {
        self.tasks_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the final outcome of a task.
    pub fn record_outcome(&self, outcome: &TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Written { .. } => &self.artifacts_written,
            TaskOutcome::FailedWithArtifact { .. } => &self.error_artifacts,
            TaskOutcome::WriteFailed { .. } => &self.write_failures,
            TaskOutcome::TimedOut { .. } => &self.timeouts,
            TaskOutcome::Cancelled => &self.cancelled,
            TaskOutcome::Aborted { .. } => &self.aborted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record lines dropped by the log reader.
    pub fn record_lines_skipped(&self, count: u64) {
        self.lines_skipped.fetch_add(count, Ordering::Relaxed);
    }

    /// Record scan failure markers seen by the log reader.
    pub fn record_scan_errors(&self, count: u64) {
        self.scan_errors.fetch_add(count, Ordering::Relaxed);
    }

    /// Record samples dropped while synchronizing.
    pub fn record_samples_skipped(&self, count: u64) {
        self.samples_skipped.fetch_add(count, Ordering::Relaxed);
    }

    /// Build the report for the run.
    pub fn report(
        &self,
        run_id: Uuid,
        tasks_planned: u64,
        failures: Vec<TaskFailure>,
    ) -> BatchReport {
        let finished_at = Utc::now();
        BatchReport {
            run_id,
            started_at: self.started_at,
            finished_at,
            duration_secs: (finished_at - self.started_at).num_milliseconds() as f64 / 1000.0,
            tasks_planned,
            tasks_dispatched: self.tasks_dispatched.load(Ordering::Relaxed),
            artifacts_written: self.artifacts_written.load(Ordering::Relaxed),
            error_artifacts: self.error_artifacts.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            lines_skipped: self.lines_skipped.load(Ordering::Relaxed),
            scan_errors: self.scan_errors.load(Ordering::Relaxed),
            samples_skipped: self.samples_skipped.load(Ordering::Relaxed),
            failures,
        }
    }
}

impl Default for RunStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe shared run statistics.
pub type SharedRunStats = Arc<RunStats>;

/// A task that ended without its regular artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task: String,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
}

/// Summary of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub tasks_planned: u64,
    pub tasks_dispatched: u64,
    pub artifacts_written: u64,
    pub error_artifacts: u64,
    pub write_failures: u64,
    pub timeouts: u64,
    pub cancelled: u64,
    pub aborted: u64,
    pub lines_skipped: u64,
    pub scan_errors: u64,
    pub samples_skipped: u64,
    pub failures: Vec<TaskFailure>,
}

impl BatchReport {
    /// Number of tasks that left an artifact behind.
    pub fn artifacts_produced(&self) -> u64 {
        self.artifacts_written + self.error_artifacts + self.timeouts
    }

    /// True when every planned task produced an artifact.
    pub fn is_success(&self) -> bool {
        self.write_failures == 0 && self.cancelled == 0 && self.aborted == 0
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        format!(
            "Run {}:\n\
             - Tasks planned: {}\n\
             - Tasks dispatched: {}\n\
             - Artifacts written: {}\n\
             - Error artifacts: {}\n\
             - Timed out: {}\n\
             - Write failures: {}\n\
             - Cancelled: {}\n\
             - Aborted: {}\n\
             - Lines skipped: {}\n\
             - Scan errors: {}\n\
             - Samples skipped by sync: {}\n\
             - Duration: {:.1} seconds",
            self.run_id,
            self.tasks_planned,
            self.tasks_dispatched,
            self.artifacts_written,
            self.error_artifacts,
            self.timeouts,
            self.write_failures,
            self.cancelled,
            self.aborted,
            self.lines_skipped,
            self.scan_errors,
            self.samples_skipped,
            self.duration_secs
        )
    }

    /// Save the report as JSON.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn written() -> TaskOutcome {
        TaskOutcome::Written {
            path: PathBuf::from("out/Sensor-01/wifi/ble_wifi_truong/chunk_len-10/Sensor-02.json"),
        }
    }

    #[test]
    fn test_outcome_counting() {
        let stats = RunStats::new();
        stats.record_dispatched();
        stats.record_dispatched();
        stats.record_dispatched();
        stats.record_outcome(&written());
        stats.record_outcome(&TaskOutcome::FailedWithArtifact {
            path: PathBuf::from("a.json"),
            reason: "No sync possible".into(),
        });
        stats.record_outcome(&TaskOutcome::TimedOut {
            path: PathBuf::from("b.json"),
        });
        stats.record_lines_skipped(4);
        stats.record_scan_errors(2);

        let report = stats.report(Uuid::new_v4(), 3, Vec::new());
        assert_eq!(report.tasks_dispatched, 3);
        assert_eq!(report.artifacts_written, 1);
        assert_eq!(report.error_artifacts, 1);
        assert_eq!(report.timeouts, 1);
        assert_eq!(report.artifacts_produced(), 3);
        assert_eq!(report.lines_skipped, 4);
        assert!(report.is_success());
    }

    #[test]
    fn test_write_failure_is_not_success() {
        let stats = RunStats::new();
        let failed = TaskOutcome::WriteFailed {
            path: PathBuf::from("/readonly/x.json"),
            reason: "permission denied".into(),
        };
        assert!(!failed.produced_artifact());
        stats.record_outcome(&failed);

        let failures = vec![TaskFailure {
            task: "wifi Sensor-01/Sensor-02".into(),
            outcome: failed,
        }];
        let report = stats.report(Uuid::new_v4(), 1, failures);
        assert!(!report.is_success());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failures"][0]["outcome"], "write_failed");
        assert_eq!(json["failures"][0]["task"], "wifi Sensor-01/Sensor-02");
    }

    #[test]
    fn test_cancelled_is_not_success() {
        let stats = RunStats::new();
        stats.record_outcome(&TaskOutcome::Cancelled);
        assert!(!stats.report(Uuid::new_v4(), 1, Vec::new()).is_success());
    }

    #[test]
    fn test_aborted_is_not_success() {
        let stats = RunStats::new();
        let aborted = TaskOutcome::Aborted {
            reason: "task panicked".into(),
        };
        assert!(!aborted.produced_artifact());
        stats.record_outcome(&aborted);

        let report = stats.report(Uuid::new_v4(), 1, Vec::new());
        assert_eq!(report.aborted, 1);
        assert!(!report.is_success());
        assert!(report.summary().contains("Aborted: 1"));
    }

    #[test]
    fn test_summary_and_save() {
        let stats = RunStats::new();
        stats.record_outcome(&written());
        let report = stats.report(Uuid::new_v4(), 1, Vec::new());

        let summary = report.summary();
        assert!(summary.contains("Artifacts written: 1"));
        assert!(summary.contains("Samples skipped by sync"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/run.json");
        report.save(&path).unwrap();
        let back: BatchReport =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.artifacts_written, 1);
    }
}
