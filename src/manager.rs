//! Top-level orchestration: URLs and credentials in, report out.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::auth::{AuthError, AuthenticatedSession, Credentials, SessionConfig};
use crate::download::{
    DownloadTask, PoolConfig, PoolError, ProgressAggregator, ProgressSink, RetryPolicy, Sleeper,
    TaskError, TaskId, TaskState, TokioSleeper, TransferExecutor, WorkerPool, destination_for,
};

/// Setup failures that stop a run before any transfer starts.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The archive session could not be established.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),

    /// The save directory could not be created.
    #[error("cannot prepare save directory {path}: {source}")]
    Io {
        /// The directory path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] PoolError),
}

/// Everything a run needs besides credentials and URLs.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Directory receiving the downloaded files.
    pub save_dir: PathBuf,
    /// Session and HTTP client settings.
    pub session: SessionConfig,
    /// Worker pool settings.
    pub pool: PoolConfig,
    /// Per-task retry behavior.
    pub retry: RetryPolicy,
    /// Send a HEAD request per task to learn its size up front.
    pub probe_size: bool,
}

impl ManagerConfig {
    /// Config with defaults for everything but the two required inputs.
    #[must_use]
    pub fn new(save_dir: impl Into<PathBuf>, login_url: Url) -> Self {
        Self {
            save_dir: save_dir.into(),
            session: SessionConfig::new(login_url),
            pool: PoolConfig::default(),
            retry: RetryPolicy::default(),
            probe_size: true,
        }
    }
}

/// Outcome of a run.
///
/// Task ids index [`sources`](Self::sources). Every task appears in exactly
/// one of `completed`, `failed` or `skipped`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownloadReport {
    /// Tasks whose bytes were all fetched in this run.
    pub completed: Vec<TaskId>,
    /// Tasks that ended in a failure, with its kind.
    pub failed: Vec<(TaskId, TaskError)>,
    /// Tasks that needed no transfer.
    pub skipped: Vec<TaskId>,
    /// Source URL of every task, indexed by task id.
    pub sources: Vec<String>,
    /// Bytes received over the network during the run.
    pub bytes_transferred: u64,
    /// The run was cancelled before it finished.
    pub interrupted: bool,
}

impl DownloadReport {
    /// True when nothing failed and the run was not interrupted.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }

    /// Source URL of `id`.
    #[must_use]
    pub fn source(&self, id: TaskId) -> Option<&str> {
        self.sources.get(id.0).map(String::as_str)
    }

    /// Number of tasks in the run.
    #[must_use]
    pub fn total(&self) -> usize {
        self.sources.len()
    }
}

/// Downloads a URL list into a directory through one authenticated session.
///
/// # Example
///
/// ```no_run
/// use archive_downloader::{Credentials, DownloadManager, ManagerConfig};
/// use tokio_util::sync::CancellationToken;
/// use url::Url;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ManagerConfig::new("./granules", Url::parse("https://archive.example/login")?);
/// let manager = DownloadManager::new(config)?;
/// let urls = vec!["https://archive.example/data/a.h5".to_string()];
/// let report = manager
///     .run(&Credentials::new("alice", "secret"), urls, CancellationToken::new())
///     .await?;
/// println!("completed {} of {}", report.completed.len(), report.total());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct DownloadManager {
    config: ManagerConfig,
    pool: WorkerPool,
    progress: Arc<ProgressAggregator>,
    sleeper: Arc<dyn Sleeper>,
}

impl DownloadManager {
    /// Validates `config` and creates a manager.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::InvalidConfig`] for an out-of-range concurrency.
    pub fn new(config: ManagerConfig) -> Result<Self, ManagerError> {
        let pool = WorkerPool::new(config.pool.clone())?;
        debug!(
            concurrency = pool.concurrency(),
            max_attempts = config.retry.max_attempts(),
            save_dir = %config.save_dir.display(),
            "creating download manager"
        );
        Ok(Self {
            config,
            pool,
            progress: Arc::new(ProgressAggregator::new()),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Replaces the sleeper used for retry backoff.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Progress of the current (or last) run, for polling observers.
    ///
    /// Counters are cleared when the next run starts.
    #[must_use]
    pub fn progress(&self) -> Arc<ProgressAggregator> {
        Arc::clone(&self.progress)
    }

    /// Downloads every URL and reports how each task ended.
    ///
    /// Per-task failures are part of the report, never an error. Cancelling
    /// `cancel` stops the run early; the report then has `interrupted` set.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Io`] when the save directory cannot be created
    /// and [`ManagerError::Auth`] when the session cannot be established.
    #[instrument(skip_all, fields(save_dir = %self.config.save_dir.display()))]
    pub async fn run(
        &self,
        credentials: &Credentials,
        urls: impl IntoIterator<Item = String>,
        cancel: CancellationToken,
    ) -> Result<DownloadReport, ManagerError> {
        let save_dir = &self.config.save_dir;
        tokio::fs::create_dir_all(save_dir)
            .await
            .map_err(|source| ManagerError::Io {
                path: save_dir.clone(),
                source,
            })?;

        let plan = TaskPlan::build(urls, save_dir);
        self.progress.reset();
        self.progress.add_tasks(plan.sources.len());
        for task in &plan.settled {
            self.progress.finish(task.id, task.state());
        }
        info!(
            tasks = plan.sources.len(),
            runnable = plan.runnable.len(),
            "starting run"
        );

        let mut finished = plan.settled;
        if !plan.runnable.is_empty() {
            let session = Arc::new(
                AuthenticatedSession::establish(credentials, self.config.session.clone()).await?,
            );
            let executor = TransferExecutor::new(
                session,
                self.config.retry.clone(),
                self.progress.clone(),
            )
            .with_sleeper(Arc::clone(&self.sleeper))
            .with_size_probe(self.config.probe_size);

            finished.extend(
                self.pool
                    .run(
                        plan.runnable,
                        Arc::new(executor),
                        self.progress.clone(),
                        cancel.clone(),
                    )
                    .await,
            );
        }
        finished.sort_by_key(|task| task.id);

        let mut report = DownloadReport {
            sources: plan.sources,
            bytes_transferred: self.progress.snapshot().bytes_done,
            interrupted: cancel.is_cancelled(),
            ..DownloadReport::default()
        };
        for task in finished {
            match task.state() {
                TaskState::Completed => report.completed.push(task.id),
                TaskState::Skipped => report.skipped.push(task.id),
                TaskState::Failed(kind) => report.failed.push((task.id, kind)),
                state @ (TaskState::Pending | TaskState::Active | TaskState::Resuming) => {
                    warn!(task = %task.id, ?state, "task finished without a terminal state");
                    report.failed.push((task.id, TaskError::Transient));
                }
            }
        }

        info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            skipped = report.skipped.len(),
            bytes = report.bytes_transferred,
            interrupted = report.interrupted,
            "run complete"
        );
        Ok(report)
    }
}

/// Tasks derived from a URL list.
struct TaskPlan {
    /// Tasks the pool has to run.
    runnable: Vec<DownloadTask>,
    /// Tasks already terminal before any request (bad URL, destination clash).
    settled: Vec<DownloadTask>,
    /// URL of every task, indexed by id.
    sources: Vec<String>,
}

impl TaskPlan {
    fn build(urls: impl IntoIterator<Item = String>, save_dir: &std::path::Path) -> Self {
        let mut plan = Self {
            runnable: Vec::new(),
            settled: Vec::new(),
            sources: Vec::new(),
        };
        let mut seen = HashSet::new();
        let mut claimed: HashMap<PathBuf, TaskId> = HashMap::new();

        for url in urls {
            if !seen.insert(url.clone()) {
                debug!(url = %url, "dropping duplicate URL");
                continue;
            }
            let id = TaskId(plan.sources.len());
            plan.sources.push(url.clone());

            match destination_for(&url, save_dir) {
                Ok(destination) => {
                    if let Some(owner) = claimed.get(&destination) {
                        warn!(
                            task = %id,
                            url = %url,
                            owner = %owner,
                            path = %destination.display(),
                            "destination already claimed by another URL, skipping"
                        );
                        let mut task = DownloadTask::new(id, url, destination);
                        task.transition(TaskState::Skipped);
                        plan.settled.push(task);
                    } else {
                        claimed.insert(destination.clone(), id);
                        plan.runnable.push(DownloadTask::new(id, url, destination));
                    }
                }
                Err(error) => {
                    warn!(task = %id, error = %error, "unusable URL");
                    let mut task = DownloadTask::new(id, url, PathBuf::new());
                    task.transition(TaskState::Failed(TaskError::NotFound));
                    plan.settled.push(task);
                }
            }
        }
        plan
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::Path;

    use super::*;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_plan_assigns_ids_in_order() {
        let plan = TaskPlan::build(
            urls(&["https://a.example/x/1.h5", "https://a.example/x/2.h5"]),
            Path::new("/save"),
        );
        assert_eq!(plan.runnable.len(), 2);
        assert_eq!(plan.runnable[0].id, TaskId(0));
        assert_eq!(plan.runnable[1].destination, Path::new("/save/2.h5"));
        assert_eq!(plan.sources.len(), 2);
    }

    #[test]
    fn test_plan_drops_duplicate_urls() {
        let plan = TaskPlan::build(
            urls(&["https://a.example/1.h5", "https://a.example/1.h5"]),
            Path::new("/save"),
        );
        assert_eq!(plan.runnable.len(), 1);
        assert_eq!(plan.sources, vec!["https://a.example/1.h5"]);
    }

    #[test]
    fn test_plan_skips_destination_clash() {
        let plan = TaskPlan::build(
            urls(&["https://a.example/v1/g.h5", "https://a.example/v2/g.h5"]),
            Path::new("/save"),
        );
        assert_eq!(plan.runnable.len(), 1);
        assert_eq!(plan.settled.len(), 1);
        assert_eq!(plan.settled[0].id, TaskId(1));
        assert_eq!(plan.settled[0].state(), TaskState::Skipped);
    }

    #[test]
    fn test_plan_fails_unusable_urls() {
        let plan = TaskPlan::build(urls(&["not a url", "https://a.example/"]), Path::new("/s"));
        assert!(plan.runnable.is_empty());
        assert_eq!(plan.settled.len(), 2);
        assert!(
            plan.settled
                .iter()
                .all(|t| t.state() == TaskState::Failed(TaskError::NotFound))
        );
    }

    #[test]
    fn test_manager_rejects_invalid_concurrency() {
        let mut config = ManagerConfig::new("/tmp/x", Url::parse("https://a.example/login").unwrap());
        config.pool.concurrency = 0;
        assert!(matches!(
            DownloadManager::new(config),
            Err(ManagerError::InvalidConfig(PoolError::InvalidConcurrency { value: 0 }))
        ));
    }

    #[test]
    fn test_report_success_and_lookup() {
        let mut report = DownloadReport {
            completed: vec![TaskId(0)],
            sources: urls(&["https://a.example/0.h5"]),
            ..DownloadReport::default()
        };
        assert!(report.is_success());
        assert_eq!(report.source(TaskId(0)), Some("https://a.example/0.h5"));
        assert_eq!(report.source(TaskId(1)), None);

        report.interrupted = true;
        assert!(!report.is_success());
    }

    #[test]
    fn test_report_serializes_failures_with_kind() {
        let report = DownloadReport {
            failed: vec![(TaskId(2), TaskError::NotFound)],
            ..DownloadReport::default()
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failed"], serde_json::json!([[2, "not_found"]]));
    }
}
