//! Error types for the download module.
//!
//! [`DownloadError`] describes why a single HTTP exchange failed and carries
//! the context (url, path) needed for useful log lines. [`TaskError`] is the
//! coarse, per-task failure kind that ends up in the run report.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Errors that can occur during one download attempt.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, reset mid-body, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present.
        retry_after: Option<String>,
    },

    /// File system error during download (open, write, flush, truncate).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or has no usable filename.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Downloaded file size does not match expected server content length.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Download path that failed verification.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// The redirect chain did not settle within the hop limit.
    #[error("too many redirects ({hops}) downloading {url}")]
    TooManyRedirects {
        /// The URL whose redirect chain was abandoned.
        url: String,
        /// Number of hops followed before giving up.
        hops: usize,
    },

    /// The run was cancelled while this attempt was in progress.
    #[error("download of {url} cancelled")]
    Cancelled {
        /// The URL whose transfer was interrupted.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error, promoting timeouts.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            return Self::timeout(url);
        }
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a redirect-loop error.
    pub fn too_many_redirects(url: impl Into<String>, hops: usize) -> Self {
        Self::TooManyRedirects {
            url: url.into(),
            hops,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }
}

/// Terminal failure kind of a download task.
///
/// Unlike [`DownloadError`] this carries no context; it is what the final
/// report and the process exit code are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskError {
    /// Retries for network/server trouble were exhausted.
    #[error("transient failure (retries exhausted)")]
    Transient,
    /// The archive kept rejecting the session after one re-authentication.
    #[error("authentication failed")]
    Auth,
    /// The resource does not exist or the request is permanently invalid.
    #[error("not found")]
    NotFound,
    /// The bytes on disk disagree with the advertised size.
    #[error("size mismatch")]
    SizeMismatch,
    /// The run was cancelled before this task finished.
    #[error("cancelled")]
    Cancelled,
    /// The destination could not be written.
    #[error("local storage error")]
    Storage,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_timeout_display() {
        let error = DownloadError::timeout("https://example.com/file.h5");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://example.com/file.h5"));
    }

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://example.com/file.h5", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(
            msg.contains("https://example.com/file.h5"),
            "Expected URL in: {msg}"
        );
    }

    #[test]
    fn test_download_error_io_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let error = DownloadError::io(PathBuf::from("/tmp/test.h5"), io_error);
        let msg = error.to_string();
        assert!(msg.contains("/tmp/test.h5"), "Expected path in: {msg}");
    }

    #[test]
    fn test_download_error_integrity_display() {
        let error = DownloadError::integrity("/tmp/a.bin", 100, 40);
        let msg = error.to_string();
        assert!(msg.contains("expected 100"), "got: {msg}");
        assert!(msg.contains("got 40"), "got: {msg}");
    }

    #[test]
    fn test_download_error_too_many_redirects_display() {
        let error = DownloadError::too_many_redirects("https://example.com/loop", 10);
        let msg = error.to_string();
        assert!(msg.contains("too many redirects (10)"), "got: {msg}");
    }

    #[test]
    fn test_task_error_serializes_snake_case() {
        let json = serde_json::to_string(&TaskError::SizeMismatch).unwrap();
        assert_eq!(json, "\"size_mismatch\"");
        let json = serde_json::to_string(&TaskError::NotFound).unwrap();
        assert_eq!(json, "\"not_found\"");
    }
}
