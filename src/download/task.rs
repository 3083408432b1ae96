//! Download task model and its state machine.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

use super::{FailureType, TaskError};

/// Identifier of a task within one run (its position in dispatch order).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a [`DownloadTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// A worker is transferring from byte zero.
    Active,
    /// A worker is continuing from an existing partial file.
    Resuming,
    /// All bytes are on disk.
    Completed,
    /// Terminal failure.
    Failed(TaskError),
    /// The destination was already complete; nothing was transferred.
    Skipped,
}

impl TaskState {
    /// Returns true for Completed, Failed and Skipped.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Skipped)
    }

    pub(crate) fn is_running(self) -> bool {
        matches!(self, Self::Active | Self::Resuming)
    }
}

/// One URL-to-file download unit.
#[derive(Debug, Clone)]
pub struct DownloadTask {
    /// Run-local identifier.
    pub id: TaskId,
    /// Source URL.
    pub url: String,
    /// Destination file.
    pub destination: PathBuf,
    /// Size advertised by the server, when a probe returned one.
    pub expected_size: Option<u64>,
    /// Bytes of the destination confirmed on disk.
    pub bytes_transferred: u64,
    state: TaskState,
    requeues: u32,
}

impl DownloadTask {
    /// Creates a pending task.
    #[must_use]
    pub fn new(id: TaskId, url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            id,
            url: url.into(),
            destination: destination.into(),
            expected_size: None,
            bytes_transferred: 0,
            state: TaskState::Pending,
            requeues: 0,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// How many times the task went back to the queue after a worker crash.
    #[must_use]
    pub fn requeues(&self) -> u32 {
        self.requeues
    }

    /// Moves the task to `next` if the transition is legal.
    ///
    /// Legal moves: Pending to running or terminal, Active and Resuming to each
    /// other or to a terminal state. Terminal states never change. Returns
    /// whether the transition happened.
    pub fn transition(&mut self, next: TaskState) -> bool {
        let allowed = match self.state {
            TaskState::Pending => next != TaskState::Pending,
            TaskState::Active | TaskState::Resuming => next != TaskState::Pending,
            TaskState::Completed | TaskState::Failed(_) | TaskState::Skipped => false,
        };
        if allowed {
            self.state = next;
        } else {
            warn!(
                task = %self.id,
                from = ?self.state,
                to = ?next,
                "ignoring illegal task state transition"
            );
        }
        allowed
    }

    /// Sends a running task back to Pending for another worker.
    ///
    /// Only allowed while the task is running and fewer than `limit`
    /// requeues have happened.
    pub fn requeue(&mut self, limit: u32) -> bool {
        if !self.state.is_running() || self.requeues >= limit {
            return false;
        }
        self.requeues += 1;
        self.state = TaskState::Pending;
        true
    }
}

/// Ephemeral record of one HTTP exchange, used for logging only.
#[derive(Debug, Clone, Copy)]
pub struct TransferAttempt {
    /// 1-indexed attempt number.
    pub attempt: u32,
    /// Start offset of the `Range` request, if any.
    pub range_start: Option<u64>,
    /// Classification of the failure, when the attempt failed.
    pub failure: Option<FailureType>,
}

impl TransferAttempt {
    pub(crate) fn new(attempt: u32, range_start: u64) -> Self {
        Self {
            attempt,
            range_start: (range_start > 0).then_some(range_start),
            failure: None,
        }
    }
}
