//! Run-wide progress accounting.
//!
//! Transfers report through the [`ProgressSink`] trait; [`ProgressAggregator`]
//! is the implementation the manager wires in. Counters are atomics so
//! [`ProgressAggregator::snapshot`] never waits on a writer.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use dashmap::DashMap;
use serde::Serialize;
use tracing::debug;

use super::task::{TaskId, TaskState};

/// Receiver of progress events emitted by transfers.
pub trait ProgressSink: Send + Sync {
    /// Adds `bytes_delta` newly written bytes for `task_id`.
    fn record(&self, task_id: TaskId, bytes_delta: u64);

    /// Registers how many bytes `task_id` is expected to transfer in this run.
    ///
    /// Only the first registration per task counts.
    fn expect(&self, task_id: TaskId, bytes: u64);

    /// Reports that `bytes` already on disk for `task_id` were discarded and
    /// will be fetched again, growing its expected total.
    ///
    /// Ignored until the task has registered an expectation.
    fn rewind(&self, task_id: TaskId, bytes: u64);

    /// Reports that `task_id` entered `state`. Only the first terminal state
    /// per task updates the counters.
    fn finish(&self, task_id: TaskId, state: TaskState);
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    /// Tasks in the run.
    pub total_tasks: usize,
    /// Tasks that finished with all bytes on disk.
    pub completed: usize,
    /// Tasks that ended in a failure.
    pub failed: usize,
    /// Tasks that needed no transfer.
    pub skipped: usize,
    /// Bytes received over the network so far.
    pub bytes_done: u64,
    /// Bytes the running and finished transfers were expected to receive.
    pub bytes_total: u64,
}

impl ProgressSnapshot {
    /// Tasks in a terminal state.
    #[must_use]
    pub fn finished(&self) -> usize {
        self.completed + self.failed + self.skipped
    }

    /// Overall percentage in `0.0..=100.0`.
    ///
    /// Byte-weighted while sizes are known, task-count based otherwise.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> f64 {
        if self.total_tasks == 0 || self.finished() >= self.total_tasks {
            return 100.0;
        }
        let ratio = if self.bytes_total > 0 {
            self.bytes_done as f64 / self.bytes_total as f64
        } else {
            self.finished() as f64 / self.total_tasks as f64
        };
        (ratio * 100.0).clamp(0.0, 100.0)
    }
}

#[derive(Debug, Default)]
struct TaskProgress {
    expected_registered: bool,
    finished: bool,
}

/// Thread-safe accumulator of progress events.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    total_tasks: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
    bytes_done: AtomicU64,
    bytes_total: AtomicU64,
    tasks: DashMap<TaskId, TaskProgress>,
}

impl ProgressAggregator {
    /// Creates an empty aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `count` tasks to the run total.
    pub fn add_tasks(&self, count: usize) {
        self.total_tasks.fetch_add(count, Ordering::SeqCst);
    }

    /// Clears all counters and per-task guards before a new run.
    pub fn reset(&self) {
        self.tasks.clear();
        for counter in [&self.total_tasks, &self.completed, &self.failed, &self.skipped] {
            counter.store(0, Ordering::SeqCst);
        }
        self.bytes_done.store(0, Ordering::SeqCst);
        self.bytes_total.store(0, Ordering::SeqCst);
    }

    /// Reads the current counters.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total_tasks: self.total_tasks.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            bytes_done: self.bytes_done.load(Ordering::SeqCst),
            bytes_total: self.bytes_total.load(Ordering::SeqCst),
        }
    }
}

impl ProgressSink for ProgressAggregator {
    fn record(&self, _task_id: TaskId, bytes_delta: u64) {
        self.bytes_done.fetch_add(bytes_delta, Ordering::SeqCst);
    }

    fn expect(&self, task_id: TaskId, bytes: u64) {
        let mut entry = self.tasks.entry(task_id).or_default();
        if entry.expected_registered {
            return;
        }
        entry.expected_registered = true;
        self.bytes_total.fetch_add(bytes, Ordering::SeqCst);
    }

    fn rewind(&self, task_id: TaskId, bytes: u64) {
        let registered = self
            .tasks
            .get(&task_id)
            .is_some_and(|entry| entry.expected_registered);
        if registered && bytes > 0 {
            self.bytes_total.fetch_add(bytes, Ordering::SeqCst);
        }
    }

    fn finish(&self, task_id: TaskId, state: TaskState) {
        let counter = match state {
            TaskState::Completed => &self.completed,
            TaskState::Failed(_) => &self.failed,
            TaskState::Skipped => &self.skipped,
            TaskState::Pending | TaskState::Active | TaskState::Resuming => return,
        };

        let mut entry = self.tasks.entry(task_id).or_default();
        if entry.finished {
            debug!(task = %task_id, ?state, "ignoring duplicate completion report");
            return;
        }
        entry.finished = true;
        counter.fetch_add(1, Ordering::SeqCst);
    }
}
