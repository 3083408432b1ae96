//! Resumable, concurrent downloads through an authenticated session.
//!
//! The pieces, from the bottom up:
//!
//! - [`DownloadTask`] is one URL-to-file unit and its state machine
//! - [`TransferExecutor`] moves a task to a terminal state: probe, range
//!   request, stream to disk, retry with backoff, re-authenticate once
//! - [`WorkerPool`] runs executors concurrently over a shared queue
//! - [`ProgressAggregator`] folds byte counts into a run-wide snapshot
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use archive_downloader::auth::{AuthenticatedSession, Credentials, SessionConfig};
//! use archive_downloader::download::{
//!     DownloadTask, PoolConfig, ProgressAggregator, RetryPolicy, TaskId, TransferExecutor,
//!     WorkerPool,
//! };
//! use tokio_util::sync::CancellationToken;
//! use url::Url;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = Credentials::new("alice", "secret");
//! let config = SessionConfig::new(Url::parse("https://archive.example/login")?);
//! let session = Arc::new(AuthenticatedSession::establish(&credentials, config).await?);
//!
//! let progress = Arc::new(ProgressAggregator::new());
//! let executor = Arc::new(TransferExecutor::new(
//!     session,
//!     RetryPolicy::default(),
//!     progress.clone(),
//! ));
//! let task = DownloadTask::new(TaskId(0), "https://archive.example/a.h5", "./a.h5");
//!
//! let pool = WorkerPool::new(PoolConfig::default())?;
//! let finished = pool
//!     .run(vec![task], executor, progress, CancellationToken::new())
//!     .await;
//! println!("{:?}", finished[0].state());
//! # Ok(())
//! # }
//! ```

pub(crate) mod constants;
mod error;
mod filename;
mod pool;
mod progress;
mod retry;
mod task;
mod transfer;

pub use error::{DownloadError, TaskError};
pub use filename::destination_for;
pub use pool::{DEFAULT_CONCURRENCY, DEFAULT_REQUEUE_LIMIT, PoolConfig, PoolError, WorkerPool};
pub use progress::{ProgressAggregator, ProgressSink, ProgressSnapshot};
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, Sleeper, TokioSleeper,
    classify_error, parse_retry_after,
};
pub use task::{DownloadTask, TaskId, TaskState, TransferAttempt};
pub use transfer::{TaskExecutor, TransferExecutor};

// Note: we do NOT define module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
