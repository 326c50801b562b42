//! Concurrent execution of a batch of tasks.

use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use super::monitor::{Monitor, StepStatus, Summary};
use super::task::{Task, TaskRecord};
use super::ExecOptions;
use crate::connection::Connector;
use crate::error::{Error, Result};
use crate::progress::ProgressReporter;

/// The tasks generated for one playbook step.
#[derive(Debug)]
pub struct Tasks {
    name: String,
    tasks: Vec<Task>,
}

/// Result of running a [`Tasks`] batch.
#[derive(Debug)]
pub struct TasksOutcome {
    /// Step type name
    pub name: String,
    pub summary: Summary,
    pub status: StepStatus,
    /// Records in completion order
    pub records: Vec<TaskRecord>,
    /// First hard error, if any task failed
    pub error: Option<Error>,
}

impl TasksOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl Tasks {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tasks: Vec::new(),
        }
    }

    pub fn add_task(&mut self, task: Task) {
        self.tasks.push(task);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run every task with at most `options.concurrency` in flight.
    ///
    /// Tasks are admitted in insertion order. Once any task has failed no
    /// further task is admitted unless `skip_error` is set; tasks already
    /// in flight run to completion. Results are reported to a single
    /// [`Monitor`] owned by this call.
    #[instrument(skip_all, fields(step = %self.name, tasks = self.tasks.len()))]
    pub async fn execute(
        self,
        options: &ExecOptions,
        connector: Arc<dyn Connector>,
        progress: &ProgressReporter,
    ) -> TasksOutcome {
        let concurrency = options.concurrency.max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel::<(TaskRecord, Result<()>)>();
        let mut workers = JoinSet::new();
        let mut monitor = Monitor::new();

        let mut bars = progress.step(&self.name, self.tasks.len(), options);
        for task in &self.tasks {
            monitor.expect(task.ptid());
            bars.add_unit(task.ptid(), task.subname());
        }

        let total = self.tasks.len();
        let mut admitted = 0;
        for task in self.tasks {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };

            // A freed permit means its worker already reported.
            while let Ok((record, result)) = rx.try_recv() {
                let ptid = record.ptid.clone();
                monitor.record(record, result);
                bars.task_finished(&ptid, &monitor.sum(&ptid));
            }
            if monitor.has_failure() && !options.skip_error {
                info!(
                    admitted,
                    remaining = total - admitted,
                    "Stopping admission after failure"
                );
                break;
            }

            admitted += 1;
            let tx = tx.clone();
            let connector = connector.clone();
            let timeout = options.command_timeout;
            workers.spawn(async move {
                let output = task.execute(connector.as_ref(), timeout).await;
                let _ = tx.send(output);
                drop(permit);
            });
        }
        drop(tx);

        while let Some((record, result)) = rx.recv().await {
            let ptid = record.ptid.clone();
            monitor.record(record, result);
            bars.task_finished(&ptid, &monitor.sum(&ptid));
        }
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "Task worker panicked");
                monitor.record_lost(Error::Internal(format!("task worker panicked: {}", err)));
            }
        }

        let summary = monitor.summary();
        let status = summary.status();
        bars.finish(status, monitor.units());
        debug!(%summary, %status, "Step finished");
        if status == StepStatus::Error {
            warn!(%summary, "Step had failures");
        }

        let (records, error) = monitor.finish();
        TasksOutcome {
            name: self.name,
            summary,
            status,
            records,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{
        CommandResult, Connection, ConnectionResult, ExecuteOptions, SshTarget, TransferOptions,
    };
    use crate::executor::context::Context;
    use crate::executor::step::Step;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Null;

    #[async_trait]
    impl Connection for Null {
        fn identifier(&self) -> &str {
            "null"
        }
        async fn execute(&self, _: &str, _: Option<ExecuteOptions>) -> ConnectionResult<CommandResult> {
            Ok(CommandResult::success(String::new(), String::new()))
        }
        async fn upload(&self, _: &Path, _: &Path, _: Option<TransferOptions>) -> ConnectionResult<()> {
            Ok(())
        }
        async fn upload_content(&self, _: &[u8], _: &Path, _: Option<TransferOptions>) -> ConnectionResult<()> {
            Ok(())
        }
        async fn download_content(&self, _: &Path) -> ConnectionResult<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn close(&self) -> ConnectionResult<()> {
            Ok(())
        }
    }

    struct NullConnector;

    #[async_trait]
    impl Connector for NullConnector {
        async fn connect(&self, _: Option<&SshTarget>) -> ConnectionResult<Arc<dyn Connection>> {
            Ok(Arc::new(Null))
        }
    }

    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
        started: AtomicUsize,
    }

    struct Work {
        gauge: Arc<Gauge>,
        fail: bool,
    }

    #[async_trait]
    impl Step for Work {
        fn name(&self) -> &str {
            "work"
        }

        async fn execute(&self, _ctx: &mut Context) -> Result<()> {
            self.gauge.started.fetch_add(1, Ordering::SeqCst);
            let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.gauge.current.fetch_sub(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::step_execution("work", "failed"))
            } else {
                Ok(())
            }
        }
    }

    fn batch(gauge: &Arc<Gauge>, count: usize, fail_at: Option<usize>) -> Tasks {
        let mut tasks = Tasks::new("TEST");
        for i in 0..count {
            let mut task = Task::new("Test", format!("unit {}", i), None);
            task.add_step(Work {
                gauge: gauge.clone(),
                fail: fail_at == Some(i),
            });
            tasks.add_task(task);
        }
        tasks
    }

    #[tokio::test]
    async fn test_concurrency_bound() {
        let gauge = Arc::new(Gauge::default());
        let options = ExecOptions::default().with_concurrency(3);
        let outcome = batch(&gauge, 12, None)
            .execute(&options, Arc::new(NullConnector), &ProgressReporter::hidden())
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.summary.success, 12);
        assert!(gauge.peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(outcome.records.len(), 12);
    }

    #[tokio::test]
    async fn test_failure_stops_admission_in_sequential_mode() {
        let gauge = Arc::new(Gauge::default());
        let options = ExecOptions::default().with_concurrency(1);
        let outcome = batch(&gauge, 5, Some(1))
            .execute(&options, Arc::new(NullConnector), &ProgressReporter::hidden())
            .await;

        assert_eq!(gauge.started.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.summary.success, 1);
        assert_eq!(outcome.summary.failed, 1);
        assert_eq!(outcome.status, StepStatus::Error);
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_skip_error_runs_everything() {
        let gauge = Arc::new(Gauge::default());
        let options = ExecOptions::default()
            .with_concurrency(1)
            .with_skip_error(true);
        let outcome = batch(&gauge, 5, Some(1))
            .execute(&options, Arc::new(NullConnector), &ProgressReporter::hidden())
            .await;

        assert_eq!(gauge.started.load(Ordering::SeqCst), 5);
        assert_eq!(outcome.summary.success, 4);
        assert_eq!(outcome.summary.failed, 1);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let outcome = Tasks::new("EMPTY")
            .execute(
                &ExecOptions::default(),
                Arc::new(NullConnector),
                &ProgressReporter::hidden(),
            )
            .await;
        assert!(outcome.is_success());
        assert_eq!(outcome.summary.total(), 0);
    }
}
