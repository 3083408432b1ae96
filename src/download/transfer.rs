//! Resumable, retried transfer of one task.
//!
//! [`TransferExecutor::execute`] drives a [`DownloadTask`] to a terminal
//! state. Each attempt re-reads the destination length, asks for the missing
//! range, and streams the body straight into the file. Failures are
//! classified with [`classify_error`]:
//!
//! - transient trouble backs off (or honors `Retry-After`) and resumes
//! - a rejected session triggers one re-authentication that does not count
//!   as an attempt
//! - everything else ends the task

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Response;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RETRY_AFTER};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::constants::{MAX_FREE_RESTARTS, PROGRESS_EVENT_BYTES};
use super::progress::ProgressSink;
use super::retry::{
    FailureType, RetryDecision, RetryPolicy, Sleeper, TokioSleeper, classify_error,
    parse_retry_after,
};
use super::task::{DownloadTask, TaskState, TransferAttempt};
use super::{DownloadError, TaskError};
use crate::auth::AuthenticatedSession;

/// Something that can drive a task to a terminal state.
///
/// [`WorkerPool`](super::WorkerPool) runs tasks through this trait.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// Runs `task` until it is Completed, Skipped or Failed and returns that state.
    async fn execute(&self, task: &mut DownloadTask, cancel: &CancellationToken) -> TaskState;
}

/// Result of one HTTP exchange that did not error.
enum AttemptOutcome {
    /// The task reached a terminal state.
    Done(TaskState),
    /// The local partial file was discarded; start over from byte zero.
    Restart,
}

/// Downloads tasks through an [`AuthenticatedSession`].
pub struct TransferExecutor {
    session: Arc<AuthenticatedSession>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    progress: Arc<dyn ProgressSink>,
    probe_size: bool,
}

impl std::fmt::Debug for TransferExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferExecutor")
            .field("policy", &self.policy)
            .field("sleeper", &self.sleeper)
            .field("probe_size", &self.probe_size)
            .finish_non_exhaustive()
    }
}

impl TransferExecutor {
    /// Creates an executor that sleeps on the Tokio timer and probes sizes.
    #[must_use]
    pub fn new(
        session: Arc<AuthenticatedSession>,
        policy: RetryPolicy,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            session,
            policy,
            sleeper: Arc::new(TokioSleeper),
            progress,
            probe_size: true,
        }
    }

    /// Replaces the backoff sleeper.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Enables or disables the HEAD request that learns the expected size.
    #[must_use]
    pub fn with_size_probe(mut self, enabled: bool) -> Self {
        self.probe_size = enabled;
        self
    }

    async fn run(
        &self,
        task: &mut DownloadTask,
        cancel: &CancellationToken,
    ) -> Result<TaskState, TaskError> {
        if cancel.is_cancelled() {
            return Err(TaskError::Cancelled);
        }

        if task.expected_size.is_none() && self.probe_size {
            task.expected_size = tokio::select! {
                () = cancel.cancelled() => return Err(TaskError::Cancelled),
                size = self.session.probe_length(&task.url) => size,
            };
        }

        let on_disk = disk_len(&task.destination).await.map_err(storage)?;
        if let Some(expected) = task.expected_size {
            match on_disk {
                Some(len) if len == expected => {
                    task.bytes_transferred = len;
                    debug!(bytes = len, "destination already complete");
                    return Ok(TaskState::Skipped);
                }
                Some(len) if len > expected => {
                    warn!(
                        path = %task.destination.display(),
                        on_disk = len,
                        expected,
                        "partial file larger than advertised size, starting over"
                    );
                    truncate(&task.destination).await.map_err(storage)?;
                    self.progress.expect(task.id, expected);
                }
                _ => self
                    .progress
                    .expect(task.id, expected.saturating_sub(on_disk.unwrap_or(0))),
            }
        }

        let mut attempt = 0u32;
        let mut restarts = 0u32;
        let mut reauthenticated = false;
        let mut transferred = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Err(TaskError::Cancelled);
            }
            attempt += 1;

            let offset = disk_len(&task.destination)
                .await
                .map_err(storage)?
                .unwrap_or(0);
            task.bytes_transferred = offset;
            task.transition(if offset > 0 {
                TaskState::Resuming
            } else {
                TaskState::Active
            });

            let generation = self.session.generation();
            let mut record = TransferAttempt::new(attempt, offset);

            let error = match self.attempt(task, offset, cancel, &mut transferred).await {
                Ok(AttemptOutcome::Done(state)) => return Ok(state),
                Ok(AttemptOutcome::Restart) if restarts < MAX_FREE_RESTARTS => {
                    // The local file was discarded; start over right away.
                    restarts += 1;
                    attempt -= 1;
                    debug!(attempt = record.attempt, restarts, "restarting from zero");
                    continue;
                }
                Ok(AttemptOutcome::Restart) => {
                    record.failure = Some(FailureType::Transient);
                    None
                }
                Err(error) => {
                    record.failure = Some(classify_error(&error));
                    Some(error)
                }
            };
            debug!(
                attempt = record.attempt,
                range_start = ?record.range_start,
                failure = ?record.failure,
                error = error.as_ref().map(tracing::field::display),
                "transfer attempt failed"
            );

            let failure = record.failure.unwrap_or(FailureType::Transient);
            let retry_after = error.as_ref().and_then(retry_after_delay);

            match (failure, error) {
                (_, Some(DownloadError::Cancelled { .. })) => return Err(TaskError::Cancelled),
                (_, Some(DownloadError::Io { .. })) => return Err(TaskError::Storage),
                (_, Some(DownloadError::Integrity { .. })) => return Err(TaskError::SizeMismatch),
                (_, Some(DownloadError::InvalidUrl { .. })) => return Err(TaskError::NotFound),
                (FailureType::NeedsAuth, _) => {
                    if reauthenticated {
                        return Err(TaskError::Auth);
                    }
                    reauthenticated = true;
                    if let Err(auth_error) = self.session.reauthenticate(generation).await {
                        warn!(error = %auth_error, "could not refresh session");
                        return Err(TaskError::Auth);
                    }
                    // Auth retries do not consume transient attempts.
                    attempt -= 1;
                }
                (FailureType::Permanent, Some(DownloadError::HttpStatus { .. })) => {
                    return Err(TaskError::NotFound);
                }
                (FailureType::Permanent, _) => return Err(TaskError::Transient),
                (FailureType::Transient | FailureType::RateLimited, _) => {
                    match self.policy.should_retry(failure, attempt) {
                        RetryDecision::Retry {
                            delay: backoff,
                            attempt: next_attempt,
                        } => {
                            let delay = retry_after.unwrap_or(backoff);
                            info!(
                                attempt = next_attempt,
                                max_attempts = self.policy.max_attempts(),
                                delay_ms = delay.as_millis(),
                                using_retry_after = retry_after.is_some(),
                                "retrying download"
                            );
                            tokio::select! {
                                () = cancel.cancelled() => return Err(TaskError::Cancelled),
                                () = self.sleeper.sleep(delay) => {}
                            }
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            debug!(%reason, "not retrying download");
                            return Err(TaskError::Transient);
                        }
                    }
                }
            }
        }
    }

    /// One request plus streaming of its body.
    async fn attempt(
        &self,
        task: &mut DownloadTask,
        offset: u64,
        cancel: &CancellationToken,
        transferred: &mut u64,
    ) -> Result<AttemptOutcome, DownloadError> {
        let response = tokio::select! {
            () = cancel.cancelled() => return Err(DownloadError::cancelled(&task.url)),
            response = self.session.send_get(&task.url, offset) => response?,
        };

        let status = response.status().as_u16();
        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|value| value.to_str().ok())
            .and_then(ContentRange::parse);

        match status {
            200 => {
                if offset > 0 {
                    debug!(offset, "server ignored range request, restarting from zero");
                    self.progress.rewind(task.id, offset);
                }
                if task.expected_size.is_none() {
                    task.expected_size = header_u64(&response, CONTENT_LENGTH);
                    if let Some(expected) = task.expected_size {
                        self.progress.expect(task.id, expected);
                    }
                }
                let file = File::create(&task.destination)
                    .await
                    .map_err(|e| DownloadError::io(&task.destination, e))?;
                self.stream_body(task, file, 0, response, cancel, transferred)
                    .await
            }
            206 => {
                let Some(range) = content_range.filter(|range| range.start == Some(offset)) else {
                    warn!(
                        offset,
                        content_range = ?content_range,
                        "partial response does not continue the local file, starting over"
                    );
                    truncate(&task.destination)
                        .await
                        .map_err(|e| DownloadError::io(&task.destination, e))?;
                    self.progress.rewind(task.id, offset);
                    return Ok(AttemptOutcome::Restart);
                };
                if task.expected_size.is_none()
                    && let Some(total) = range.total
                {
                    task.expected_size = Some(total);
                    self.progress.expect(task.id, total.saturating_sub(offset));
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&task.destination)
                    .await
                    .map_err(|e| DownloadError::io(&task.destination, e))?;
                self.stream_body(task, file, offset, response, cancel, transferred)
                    .await
            }
            416 if offset > 0 => {
                let total = content_range.and_then(|range| range.total);
                if total == Some(offset)
                    && task.expected_size.is_none_or(|expected| expected == offset)
                {
                    task.expected_size = Some(offset);
                    debug!(bytes = offset, "range not satisfiable, local file is whole");
                    let state = if *transferred == 0 {
                        TaskState::Skipped
                    } else {
                        TaskState::Completed
                    };
                    return Ok(AttemptOutcome::Done(state));
                }
                warn!(
                    offset,
                    remote_total = ?total,
                    "range not satisfiable, discarding stale partial file"
                );
                truncate(&task.destination)
                    .await
                    .map_err(|e| DownloadError::io(&task.destination, e))?;
                self.progress.rewind(task.id, offset);
                Ok(AttemptOutcome::Restart)
            }
            _ => {
                let retry_after = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .map(ToString::to_string);
                Err(DownloadError::http_status_with_retry_after(
                    &task.url,
                    status,
                    retry_after,
                ))
            }
        }
    }

    /// Streams `response` into `file`, which already holds `offset` bytes.
    async fn stream_body(
        &self,
        task: &mut DownloadTask,
        file: File,
        offset: u64,
        response: Response,
        cancel: &CancellationToken,
        transferred: &mut u64,
    ) -> Result<AttemptOutcome, DownloadError> {
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();
        let mut written = offset;
        let mut unreported = 0u64;

        let streamed = loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => break Err(DownloadError::cancelled(&task.url)),
                next = stream.next() => next,
            };
            let chunk = match next {
                None => break Ok(()),
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => break Err(DownloadError::network(&task.url, e)),
            };

            let len = chunk.len() as u64;
            if let Some(expected) = task.expected_size
                && written + len > expected
            {
                break Err(DownloadError::integrity(
                    &task.destination,
                    expected,
                    written + len,
                ));
            }
            if let Err(e) = writer.write_all(&chunk).await {
                break Err(DownloadError::io(&task.destination, e));
            }

            written += len;
            *transferred += len;
            task.bytes_transferred = written;
            unreported += len;
            if unreported >= PROGRESS_EVENT_BYTES {
                self.progress.record(task.id, unreported);
                unreported = 0;
            }
        };

        // Whatever happened, what reached the writer must reach the file.
        let flushed = writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(&task.destination, e));
        if unreported > 0 {
            self.progress.record(task.id, unreported);
        }
        streamed?;
        flushed?;

        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| DownloadError::io(&task.destination, e))?;

        if let Some(expected) = task.expected_size
            && written != expected
        {
            return Err(DownloadError::integrity(&task.destination, expected, written));
        }

        info!(
            path = %task.destination.display(),
            bytes = written,
            resumed = offset > 0,
            "download complete"
        );
        Ok(AttemptOutcome::Done(TaskState::Completed))
    }
}

#[async_trait]
impl TaskExecutor for TransferExecutor {
    #[instrument(skip_all, fields(task = %task.id, url = %task.url))]
    async fn execute(&self, task: &mut DownloadTask, cancel: &CancellationToken) -> TaskState {
        let state = match self.run(task, cancel).await {
            Ok(state) => state,
            Err(kind) => TaskState::Failed(kind),
        };
        task.transition(state);

        if let TaskState::Failed(kind) = task.state() {
            warn!(
                path = %task.destination.display(),
                bytes_on_disk = task.bytes_transferred,
                error = %kind,
                "download failed"
            );
        }
        task.state()
    }
}

/// Parsed `Content-Range` header (`bytes a-b/T` or `bytes */T`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentRange {
    start: Option<u64>,
    total: Option<u64>,
}

impl ContentRange {
    fn parse(value: &str) -> Option<Self> {
        let spec = value.trim().strip_prefix("bytes")?.trim_start();
        let (range, total) = spec.split_once('/')?;
        let total = match total.trim() {
            "*" => None,
            digits => Some(digits.parse().ok()?),
        };
        let start = match range.trim() {
            "*" => None,
            bounds => Some(bounds.split_once('-')?.0.trim().parse().ok()?),
        };
        Some(Self { start, total })
    }
}

fn header_u64(response: &Response, name: reqwest::header::HeaderName) -> Option<u64> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
}

fn retry_after_delay(error: &DownloadError) -> Option<std::time::Duration> {
    match error {
        DownloadError::HttpStatus {
            status: 429 | 503,
            retry_after: Some(value),
            ..
        } => parse_retry_after(value),
        _ => None,
    }
}

/// Length of the file at `path`, `None` if it does not exist.
async fn disk_len(path: &Path) -> std::io::Result<Option<u64>> {
    match tokio::fs::metadata(path).await {
        Ok(metadata) => Ok(Some(metadata.len())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

async fn truncate(path: &Path) -> std::io::Result<()> {
    match OpenOptions::new().write(true).open(path).await {
        Ok(file) => file.set_len(0).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn storage(error: std::io::Error) -> TaskError {
    warn!(error = %error, "local storage error");
    TaskError::Storage
}
