//! Bounded worker pool running one task per sensor pair.
//!
//! At most `workers` computations run at a time. Each task computes on the
//! blocking thread pool and writes its own artifact, so a failing or slow
//! pair never holds up its siblings. A computation that exceeds the time
//! limit keeps its worker slot until it actually returns. The pool returns
//! only after every dispatched task has been joined.

use crate::config::Config;
use crate::core::artifact::{MetadataBuilder, SensorPairResult};
use crate::orchestrator::compute::compute;
use crate::orchestrator::plan::Task;
use crate::report::stats::{BatchReport, RunStats, SharedRunStats, TaskFailure, TaskOutcome};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};

/// Everything a worker needs, shared by all tasks of a run.
#[derive(Clone)]
struct WorkerContext {
    config: Arc<Config>,
    metadata: Arc<MetadataBuilder>,
    stats: SharedRunStats,
}

/// Runs planned tasks with bounded parallelism.
pub struct WorkerPool {
    context: WorkerContext,
    workers: usize,
    cancelled: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Create a pool sized from the configuration.
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_metadata(config, MetadataBuilder::new())
    }

    /// Create a pool with a prepared metadata builder.
    pub fn with_metadata(config: Arc<Config>, metadata: MetadataBuilder) -> Self {
        let workers = config.worker_count();
        Self {
            context: WorkerContext {
                config,
                metadata: Arc::new(metadata),
                stats: Arc::new(RunStats::new()),
            },
            workers,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Flag that stops dispatching when set. Running tasks still complete.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// Run all tasks and report on the batch.
    pub async fn run(&self, tasks: Vec<Task>) -> BatchReport {
        let planned = tasks.len() as u64;
        let semaphore = Arc::new(Semaphore::new(self.workers.max(1)));
        let mut join_set = JoinSet::new();
        let mut pending = PendingTasks::default();
        let mut failures = Vec::new();
        let stats = &self.context.stats;

        tracing::info!("Running {} tasks on {} workers", planned, self.workers);

        for task in tasks {
            let permit = if self.is_cancelled() {
                None
            } else {
                semaphore.clone().acquire_owned().await.ok()
            };
            // Cancellation may have arrived while waiting for a free worker.
            let Some(permit) = permit.filter(|_| !self.is_cancelled()) else {
                let outcome = TaskOutcome::Cancelled;
                stats.record_outcome(&outcome);
                failures.push(TaskFailure {
                    task: task.label(),
                    outcome,
                });
                continue;
            };

            stats.record_dispatched();
            let label = task.label();
            pending.insert(label.clone());
            let context = self.context.clone();
            join_set.spawn(async move {
                let outcome = execute(task, context.clone(), permit).await;
                context.stats.record_outcome(&outcome);
                (label, outcome)
            });
        }

        let mut done = 0u64;
        while let Some(joined) = join_set.join_next().await {
            done += 1;
            match joined {
                Ok((label, outcome)) => {
                    tracing::debug!("[{}/{}] {}: {:?}", done, planned, label, outcome);
                    pending.remove(&label);
                    if !matches!(outcome, TaskOutcome::Written { .. }) {
                        failures.push(TaskFailure {
                            task: label,
                            outcome,
                        });
                    }
                }
                Err(e) => tracing::error!("Worker task aborted: {}", e),
            }
        }
        failures.extend(pending.abandon(stats));

        if self.is_cancelled() {
            tracing::warn!("Run interrupted, undispatched tasks were cancelled");
        }

        let report = stats.report(self.context.metadata.run_id(), planned, failures);
        tracing::info!(
            "Finished: {} written, {} error artifacts, {} timed out, {} not written",
            report.artifacts_written,
            report.error_artifacts,
            report.timeouts,
            report.write_failures + report.cancelled + report.aborted
        );
        report
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Labels of dispatched tasks that have not reported an outcome yet.
#[derive(Debug, Default)]
struct PendingTasks(HashMap<String, usize>);

impl PendingTasks {
    fn insert(&mut self, label: String) {
        *self.0.entry(label).or_default() += 1;
    }

    fn remove(&mut self, label: &str) {
        if let Some(count) = self.0.get_mut(label) {
            *count -= 1;
            if *count == 0 {
                self.0.remove(label);
            }
        }
    }

    /// Record every task still pending as aborted.
    fn abandon(self, stats: &RunStats) -> Vec<TaskFailure> {
        let mut labels: Vec<(String, usize)> = self.0.into_iter().collect();
        labels.sort();

        let mut failures = Vec::new();
        for (label, count) in labels {
            for _ in 0..count {
                let outcome = TaskOutcome::Aborted {
                    reason: "Worker task aborted before reporting".to_string(),
                };
                stats.record_outcome(&outcome);
                failures.push(TaskFailure {
                    task: label.clone(),
                    outcome,
                });
            }
        }
        failures
    }
}

/// Why a blocking computation delivered no result.
#[derive(Debug)]
enum BlockingError {
    TimedOut(Duration),
    Failed(JoinError),
}

impl fmt::Display for BlockingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockingError::TimedOut(limit) => {
                write!(f, "Timed out after {}", describe_limit(*limit))
            }
            BlockingError::Failed(e) => write!(f, "Worker failed: {e}"),
        }
    }
}

/// `30s` for whole seconds, `250ms` otherwise.
fn describe_limit(limit: Duration) -> String {
    if limit.subsec_nanos() == 0 {
        format!("{}s", limit.as_secs())
    } else {
        format!("{}ms", limit.as_millis())
    }
}

/// Run `work` on the blocking pool while holding `permit`.
///
/// The permit travels with the work, so it is released when `work` returns,
/// even when the caller gave up waiting after `limit`.
async fn run_blocking<T, F>(
    permit: OwnedSemaphorePermit,
    limit: Option<Duration>,
    work: F,
) -> Result<(T, OwnedSemaphorePermit), BlockingError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || (work(), permit));
    let joined = match limit {
        Some(limit) => tokio::time::timeout(limit, handle)
            .await
            .map_err(|_| BlockingError::TimedOut(limit))?,
        None => handle.await,
    };
    joined.map_err(BlockingError::Failed)
}

/// Compute and persist one task, enforcing the configured time limit.
async fn execute(
    task: Task,
    context: WorkerContext,
    permit: OwnedSemaphorePermit,
) -> TaskOutcome {
    let task = Arc::new(task);
    let label = task.label();

    let computed = {
        let task = task.clone();
        let context = context.clone();
        run_blocking(permit, context.config.task_timeout, move || {
            compute(&task, &context.config, &context.metadata, &context.stats)
        })
        .await
    };

    let timed_out = matches!(computed, Err(BlockingError::TimedOut(_)));
    let writer = tokio::task::spawn_blocking(move || {
        let (artifact, permit) = match computed {
            Ok((artifact, permit)) => (artifact, Some(permit)),
            Err(e) => {
                match &e {
                    BlockingError::TimedOut(_) => tracing::warn!("{}: {}", task.label(), e),
                    BlockingError::Failed(_) => tracing::error!("{}: {}", task.label(), e),
                }
                (failure_artifact(&task, &context, e.to_string()), None)
            }
        };
        let outcome = persist(&task, &context.config, artifact, timed_out);
        drop(permit);
        outcome
    });

    writer.await.unwrap_or_else(|e| {
        tracing::error!("{}: writer failed: {}", label, e);
        TaskOutcome::Aborted {
            reason: format!("Writer failed: {e}"),
        }
    })
}

/// An artifact recording that the task produced no result of its own.
fn failure_artifact(task: &Task, context: &WorkerContext, reason: String) -> SensorPairResult {
    let mut metadata = context.metadata.start(
        task.modality.family(),
        &task.inputs(),
        task.metadata_parameters(&context.config),
    );
    metadata.finish();
    SensorPairResult::failed(metadata, reason)
}

/// Write the artifact (and its mirror) and classify the outcome.
fn persist(
    task: &Task,
    config: &Config,
    artifact: SensorPairResult,
    timed_out: bool,
) -> TaskOutcome {
    let path = task.output_path(config);
    if let Err(e) = artifact.write_to(&path) {
        tracing::error!("{}: {}", task.label(), e);
        return TaskOutcome::WriteFailed {
            path,
            reason: e.to_string(),
        };
    }

    if let Some(mirror) = task.mirror_path(config) {
        if let Err(e) = artifact.write_to(&mirror) {
            tracing::warn!("{}: mirror not written: {}", task.label(), e);
        }
    }

    if timed_out {
        TaskOutcome::TimedOut { path }
    } else if let Some(reason) = artifact.failure_reason() {
        TaskOutcome::FailedWithArtifact {
            path,
            reason: reason.to_string(),
        }
    } else {
        TaskOutcome::Written { path }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::modality::Modality;
    use crate::orchestrator::plan::{SensorLog, TaskKind};
    use std::fmt::Write as _;
    use std::fs;
    use std::path::Path;
    use std::sync::mpsc;

    fn scalar_task(root: &Path, a: &str, b: &str, second_content: &str) -> Task {
        let log = |sensor: &str, content: &str| {
            let path = root.join(sensor).join("sensors/tmpData");
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, content).unwrap();
            SensorLog {
                sensor: sensor.to_string(),
                path,
            }
        };
        Task {
            modality: Modality::Temp,
            kind: TaskKind::ScalarPair,
            first: log(a, "21.5 2017-08-16T12:15:00.200000\n"),
            second: Some(log(b, second_content)),
        }
    }

    fn config_for(root: &Path) -> Config {
        Config {
            input_root: root.to_path_buf(),
            output_root: root.join("results"),
            workers: 2,
            ..Config::default()
        }
    }

    fn pool_with(config: Config) -> WorkerPool {
        WorkerPool::with_metadata(
            Arc::new(config),
            MetadataBuilder::new().with_generator_version("git+test"),
        )
    }

    /// A temperature log with one sample every 100 ms.
    fn long_log(samples: usize) -> String {
        let start = chrono::NaiveDate::from_ymd_opt(2017, 8, 16)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let mut log = String::new();
        for k in 0..samples {
            let ts = start + chrono::Duration::milliseconds(100 * k as i64);
            writeln!(log, "21.5 {}", ts.format("%Y-%m-%dT%H:%M:%S%.6f")).unwrap();
        }
        log
    }

    #[tokio::test]
    async fn test_failing_pair_does_not_abort_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let good = scalar_task(
            dir.path(),
            "Sensor-01",
            "Sensor-02",
            "21.0 2017-08-16T12:15:00.250000\n",
        );
        let bad = scalar_task(
            dir.path(),
            "Sensor-03",
            "Sensor-04",
            "21.0 2017-08-20T12:15:00.250000\n",
        );

        let pool = pool_with(config_for(dir.path()));
        let report = pool.run(vec![good, bad]).await;

        assert_eq!(report.tasks_planned, 2);
        assert_eq!(report.tasks_dispatched, 2);
        assert_eq!(report.artifacts_written, 1);
        assert_eq!(report.error_artifacts, 1);
        assert!(report.is_success());
        assert_eq!(report.failures.len(), 1);

        let results = dir.path().join("results");
        assert!(results
            .join("Sensor-01/temp/temp_hum_press_shrestha/Sensor-02.json")
            .is_file());
        // Mirrored under the second sensor
        assert!(results
            .join("Sensor-02/temp/temp_hum_press_shrestha/Sensor-01.json")
            .is_file());
        assert!(results
            .join("Sensor-03/temp/temp_hum_press_shrestha/Sensor-04.json")
            .is_file());
    }

    #[tokio::test]
    async fn test_cancelled_run_dispatches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let task = scalar_task(
            dir.path(),
            "Sensor-01",
            "Sensor-02",
            "21.0 2017-08-16T12:15:00.250000\n",
        );

        let pool = pool_with(config_for(dir.path()));
        pool.cancel_flag().store(true, Ordering::SeqCst);
        let report = pool.run(vec![task]).await;

        assert_eq!(report.tasks_dispatched, 0);
        assert_eq!(report.cancelled, 1);
        assert!(!report.is_success());
        assert!(!dir.path().join("results").exists());
    }

    #[tokio::test]
    async fn test_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let report = pool_with(config_for(dir.path())).run(Vec::new()).await;
        assert_eq!(report.tasks_planned, 0);
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_timed_out_task_writes_error_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let log = long_log(20_000);
        let task = scalar_task(dir.path(), "Sensor-01", "Sensor-02", &log);
        // Both sides need the long log to keep the computation busy
        fs::write(&task.first.path, &log).unwrap();

        let config = Config {
            task_timeout: Some(Duration::from_millis(1)),
            ..config_for(dir.path())
        };
        let report = pool_with(config).run(vec![task]).await;

        assert_eq!(report.timeouts, 1);
        assert_eq!(report.artifacts_produced(), 1);
        assert!(report.is_success());
        assert!(matches!(
            report.failures[0].outcome,
            TaskOutcome::TimedOut { .. }
        ));

        let path = dir
            .path()
            .join("results/Sensor-01/temp/temp_hum_press_shrestha/Sensor-02.json");
        let artifact: SensorPairResult =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(artifact.failure_reason(), Some("Timed out after 1ms"));
        // Inputs are still hashed
        assert_eq!(artifact.metadata.source_files.len(), 2);
        for digest in artifact.metadata.source_files.values() {
            assert_eq!(digest.len(), 40);
            assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[tokio::test]
    async fn test_timed_out_work_keeps_its_slot() {
        let semaphore = Arc::new(Semaphore::new(1));
        let permit = semaphore.clone().acquire_owned().await.unwrap();
        let (release, wait) = mpsc::channel::<()>();

        let result = run_blocking(permit, Some(Duration::from_millis(10)), move || {
            wait.recv().ok()
        })
        .await;
        assert!(matches!(result, Err(BlockingError::TimedOut(_))));
        // Still held by the abandoned computation
        assert_eq!(semaphore.available_permits(), 0);

        release.send(()).unwrap();
        let freed = tokio::time::timeout(Duration::from_secs(5), semaphore.acquire()).await;
        assert!(freed.is_ok());
    }

    #[tokio::test]
    async fn test_finished_work_returns_its_permit() {
        let semaphore = Arc::new(Semaphore::new(1));
        let permit = semaphore.clone().acquire_owned().await.unwrap();

        let (value, permit) = run_blocking(permit, None, || 42).await.unwrap();
        assert_eq!(value, 42);
        assert_eq!(semaphore.available_permits(), 0);
        drop(permit);
        assert_eq!(semaphore.available_permits(), 1);
    }

    #[test]
    fn test_limit_description() {
        assert_eq!(describe_limit(Duration::from_secs(30)), "30s");
        assert_eq!(describe_limit(Duration::from_millis(250)), "250ms");
        assert_eq!(
            BlockingError::TimedOut(Duration::from_millis(1)).to_string(),
            "Timed out after 1ms"
        );
    }

    #[test]
    fn test_unreported_tasks_are_aborted() {
        let stats = RunStats::new();
        let mut pending = PendingTasks::default();
        pending.insert("temp Sensor-01/Sensor-02".to_string());
        pending.insert("temp Sensor-01/Sensor-03".to_string());
        pending.remove("temp Sensor-01/Sensor-02");

        let failures = pending.abandon(&stats);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].task, "temp Sensor-01/Sensor-03");
        assert!(matches!(failures[0].outcome, TaskOutcome::Aborted { .. }));

        let report = stats.report(uuid::Uuid::new_v4(), 2, failures);
        assert_eq!(report.aborted, 1);
        assert!(!report.is_success());
    }

    #[test]
    fn test_persist_reports_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the output directory should be
        fs::write(dir.path().join("results"), "").unwrap();

        let task = scalar_task(dir.path(), "Sensor-01", "Sensor-02", "");
        let context = WorkerContext {
            config: Arc::new(config_for(dir.path())),
            metadata: Arc::new(MetadataBuilder::new()),
            stats: Arc::new(RunStats::new()),
        };
        let artifact = failure_artifact(&task, &context, "Timed out after 1s".to_string());

        let outcome = persist(&task, &context.config, artifact, true);
        assert!(matches!(outcome, TaskOutcome::WriteFailed { .. }));
    }
}
