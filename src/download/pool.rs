//! Fixed-size worker pool over a shared FIFO task queue.
//!
//! Workers pop tasks one at a time and hand them to a [`TaskExecutor`]. The
//! pool guarantees every task it was given comes back in exactly one terminal
//! state, whatever happens to the workers:
//!
//! - a panicking executor is caught; the task is requeued once, then failed
//! - on cancellation queued tasks fail as Cancelled, running ones get
//!   `drain_timeout` to wind down before their workers are aborted

use std::collections::{HashMap, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, warn};

use super::constants::DEFAULT_DRAIN_TIMEOUT;
use super::progress::ProgressSink;
use super::task::{DownloadTask, TaskId, TaskState};
use super::transfer::TaskExecutor;
use super::TaskError;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default number of workers.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Default number of times a task may go back to the queue after a crash.
pub const DEFAULT_REQUEUE_LIMIT: u32 = 1;

/// Error type for worker pool construction.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of concurrent workers (1-100).
    pub concurrency: usize,
    /// Requeues allowed per task after its worker panicked.
    pub requeue_limit: u32,
    /// How long a cancelled run waits for active transfers.
    pub drain_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            requeue_limit: DEFAULT_REQUEUE_LIMIT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// State shared by all workers of one run.
#[derive(Debug, Default)]
struct Shared {
    queue: Mutex<VecDeque<DownloadTask>>,
    /// Snapshot of each running task as it was popped, for abort bookkeeping.
    in_flight: Mutex<HashMap<TaskId, DownloadTask>>,
    finished: Mutex<Vec<DownloadTask>>,
}

impl Shared {
    fn pop(&self) -> Option<DownloadTask> {
        let task = lock(&self.queue).pop_front()?;
        lock(&self.in_flight).insert(task.id, task.clone());
        Some(task)
    }

    fn requeue(&self, task: DownloadTask) {
        lock(&self.in_flight).remove(&task.id);
        lock(&self.queue).push_back(task);
    }

    fn finish(&self, task: DownloadTask, progress: &dyn ProgressSink) {
        lock(&self.in_flight).remove(&task.id);
        progress.finish(task.id, task.state());
        lock(&self.finished).push(task);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs tasks concurrently with a fixed number of workers.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    config: PoolConfig,
}

impl WorkerPool {
    /// Creates a pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(PoolError::InvalidConcurrency {
                value: config.concurrency,
            });
        }
        Ok(Self { config })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.config.concurrency
    }

    /// Runs every task to a terminal state and returns them ordered by id.
    ///
    /// Each finished task is reported to `progress`. Individual task failures
    /// never end the run early.
    #[instrument(skip_all, fields(tasks = tasks.len(), concurrency = self.config.concurrency))]
    pub async fn run(
        &self,
        tasks: Vec<DownloadTask>,
        executor: Arc<dyn TaskExecutor>,
        progress: Arc<dyn ProgressSink>,
        cancel: CancellationToken,
    ) -> Vec<DownloadTask> {
        let worker_count = self.config.concurrency.min(tasks.len());
        let shared = Arc::new(Shared {
            queue: Mutex::new(tasks.into()),
            ..Shared::default()
        });

        let mut workers = JoinSet::new();
        for worker_id in 0..worker_count {
            let worker = Worker {
                shared: Arc::clone(&shared),
                executor: Arc::clone(&executor),
                progress: Arc::clone(&progress),
                cancel: cancel.clone(),
                requeue_limit: self.config.requeue_limit,
            };
            workers.spawn(
                worker
                    .run()
                    .instrument(info_span!("worker", id = worker_id)),
            );
        }
        debug!(workers = worker_count, "workers started");

        let cancelled = tokio::select! {
            () = join_all(&mut workers) => false,
            () = cancel.cancelled() => true,
        };

        if cancelled {
            info!(
                drain_timeout_ms = self.config.drain_timeout.as_millis(),
                "cancellation requested, waiting for active transfers"
            );
            if tokio::time::timeout(self.config.drain_timeout, join_all(&mut workers))
                .await
                .is_err()
            {
                warn!("active transfers did not stop in time, aborting them");
                workers.abort_all();
                join_all(&mut workers).await;
            }
        }

        // Whatever is still queued or was cut off mid-transfer ends as cancelled.
        let leftovers: Vec<DownloadTask> = {
            let mut queue = lock(&shared.queue);
            let mut in_flight = lock(&shared.in_flight);
            queue.drain(..).chain(in_flight.drain().map(|(_, task)| task)).collect()
        };
        for mut task in leftovers {
            task.transition(TaskState::Failed(TaskError::Cancelled));
            shared.finish(task, progress.as_ref());
        }

        let mut finished = std::mem::take(&mut *lock(&shared.finished));
        finished.sort_by_key(|task| task.id);
        debug!(finished = finished.len(), "pool drained");
        finished
    }
}

async fn join_all(workers: &mut JoinSet<()>) {
    while let Some(joined) = workers.join_next().await {
        if let Err(e) = joined {
            if e.is_cancelled() {
                debug!("worker aborted");
            } else {
                warn!(error = %e, "worker task failed");
            }
        }
    }
}

struct Worker {
    shared: Arc<Shared>,
    executor: Arc<dyn TaskExecutor>,
    progress: Arc<dyn ProgressSink>,
    cancel: CancellationToken,
    requeue_limit: u32,
}

impl Worker {
    async fn run(self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let Some(mut task) = self.shared.pop() else {
                break;
            };
            debug!(task = %task.id, url = %task.url, "picked up task");

            let outcome = AssertUnwindSafe(self.executor.execute(&mut task, &self.cancel))
                .catch_unwind()
                .await;

            match outcome {
                Ok(state) if state.is_terminal() => {}
                Ok(state) => {
                    warn!(task = %task.id, ?state, "executor returned a non-terminal state");
                    task.transition(TaskState::Failed(TaskError::Transient));
                }
                Err(panic) => {
                    warn!(
                        task = %task.id,
                        requeues = task.requeues(),
                        panic = panic_message(panic.as_ref()),
                        "transfer panicked"
                    );
                    if !task.state().is_terminal() && !task.state().is_running() {
                        task.transition(TaskState::Active);
                    }
                    if task.requeue(self.requeue_limit) {
                        self.shared.requeue(task);
                        continue;
                    }
                    task.transition(TaskState::Failed(TaskError::Transient));
                }
            }

            self.shared.finish(task, self.progress.as_ref());
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
