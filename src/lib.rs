//! Archive Downloader Library
//!
//! Resilient bulk downloads from an authenticated data archive: one login
//! session shared across a pool of resumable, retrying transfers, with a
//! run-wide progress feed.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`auth`] - Session establishment across the login redirect chain
//! - [`download`] - Per-task transfers, worker pool and progress accounting
//! - [`manager`] - Orchestration from URL list to run report
//! - [`source`] - URL list parsing

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod auth;
pub mod download;
pub mod manager;
pub mod source;
mod user_agent;

// Re-export commonly used types
pub use auth::{AuthError, AuthenticatedSession, Credentials, SessionConfig};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadError, DownloadTask, PoolConfig,
    ProgressAggregator, ProgressSnapshot, RetryPolicy, TaskError, TaskId, TaskState,
    TransferExecutor, WorkerPool,
};
pub use manager::{DownloadManager, DownloadReport, ManagerConfig, ManagerError};
pub use source::{SourceError, parse_url_list, read_url_list};
