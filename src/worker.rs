//! Parallel execution of queued tasks.
//!
//! Up to `concurrency` tasks run at once on a [`JoinSet`] gated by a
//! [`Semaphore`]. Every task runs under `task_timeout`. Transient failures
//! and timeouts go back on the queue after a capped exponential delay, until
//! `max_attempts` is reached. A task waiting out its delay holds no permit.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use llm_index_core::{ErrorKind, IndexError, Result};

use crate::config::WorkerConfig;
use crate::orchestrator::{IndexOrchestrator, TaskOutcome};
use crate::queue::{LocalTaskQueue, QueuedTask};

/// Totals of one [`Worker::run_until_idle`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Tasks that completed, including sweeps.
    pub succeeded: usize,
    /// Failed deliveries that were put back on the queue.
    pub retried: usize,
    /// Tasks given up on.
    pub failed: usize,
    /// Tasks for missing collections or documents the owner may not view.
    pub skipped: usize,
    /// Documents whose chunks were written.
    pub documents_indexed: usize,
    /// Documents found gone and purged.
    pub documents_removed: usize,
    pub chunks_written: usize,
    /// Chunks stored with an empty vector after every model failed.
    pub chunks_without_vector: usize,
}

/// What a spawned job hands back to the loop.
enum Finished {
    Ran(QueuedTask, Result<TaskOutcome>),
    /// A failed task's delay is over; it may go back on the queue.
    RetryDue(QueuedTask),
}

pub struct Worker {
    orchestrator: Arc<IndexOrchestrator>,
    queue: Arc<LocalTaskQueue>,
    concurrency: usize,
    task_timeout: Duration,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl Worker {
    pub fn new(
        orchestrator: Arc<IndexOrchestrator>,
        queue: Arc<LocalTaskQueue>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            orchestrator,
            queue,
            concurrency: config.concurrency.max(1),
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            max_attempts: config.max_attempts.max(1),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Runs tasks until the queue is empty and nothing is in flight or
    /// waiting to be retried.
    pub async fn run_until_idle(&self) -> WorkerReport {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut running: JoinSet<Finished> = JoinSet::new();
        let mut report = WorkerReport::default();

        loop {
            if let Some(queued) = self.queue.try_pop() {
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };
                let orchestrator = self.orchestrator.clone();
                let timeout = self.task_timeout;
                running.spawn(async move {
                    let _permit = permit;
                    let result = run_one(&orchestrator, &queued, timeout).await;
                    Finished::Ran(queued, result)
                });
                continue;
            }

            match running.join_next().await {
                Some(Ok(Finished::Ran(queued, result))) => {
                    if let Some(retry) = self.record(&mut report, queued, result) {
                        let delay = retry_delay(self.retry_backoff, retry.attempt);
                        running.spawn(async move {
                            tokio::time::sleep(delay).await;
                            Finished::RetryDue(retry)
                        });
                    }
                }
                Some(Ok(Finished::RetryDue(queued))) => {
                    if !self.queue.requeue(queued) {
                        tracing::debug!("newer delivery already queued, dropping retry");
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "task panicked");
                    report.failed += 1;
                }
                None => break,
            }
        }

        tracing::info!(
            succeeded = report.succeeded,
            retried = report.retried,
            failed = report.failed,
            skipped = report.skipped,
            "queue drained"
        );
        report
    }

    /// Adds a result to the report. Returns the task when it should be retried.
    fn record(
        &self,
        report: &mut WorkerReport,
        queued: QueuedTask,
        result: Result<TaskOutcome>,
    ) -> Option<QueuedTask> {
        let task = &queued.task;
        match result {
            Ok(TaskOutcome::Indexed(r)) => {
                report.succeeded += 1;
                if r.removed {
                    report.documents_removed += 1;
                } else {
                    report.documents_indexed += 1;
                }
                report.chunks_written += r.chunks;
                report.chunks_without_vector += r.failed;
            }
            Ok(TaskOutcome::Swept { .. }) => report.succeeded += 1,
            Ok(TaskOutcome::Skipped) => report.skipped += 1,
            Err(e) => match e.kind() {
                ErrorKind::Transient if queued.attempt < self.max_attempts => {
                    tracing::warn!(
                        task = %task,
                        attempt = queued.attempt,
                        error = %e,
                        "task failed, retrying"
                    );
                    report.retried += 1;
                    return Some(queued);
                }
                ErrorKind::Transient | ErrorKind::Configuration => {
                    tracing::error!(
                        task = %task,
                        tenant = task.tenant(),
                        attempt = queued.attempt,
                        error = %e,
                        "task failed"
                    );
                    report.failed += 1;
                }
                ErrorKind::Access => {
                    tracing::info!(task = %task, error = %e, "task skipped");
                    report.skipped += 1;
                }
            },
        }
        None
    }
}

/// Delay before retrying a task whose `attempt` just failed: `base`
/// doubled per attempt, at most 32 times `base`.
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base * (1u32 << attempt.saturating_sub(1).min(5))
}

async fn run_one(
    orchestrator: &IndexOrchestrator,
    queued: &QueuedTask,
    timeout: Duration,
) -> Result<TaskOutcome> {
    tracing::debug!(
        task = %queued.task,
        id = %queued.id,
        attempt = queued.attempt,
        "running task"
    );
    tokio::time::timeout(timeout, orchestrator.run_task(&queued.task))
        .await
        .map_err(|_| IndexError::Timeout(format!("{} after {}s", queued.task, timeout.as_secs())))?
}
