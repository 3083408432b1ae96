//! URL list input.
//!
//! One URL per line. Blank lines and `#` comments are ignored, and for
//! CSV exports only the first comma-separated column is used.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument};

/// Errors reading a URL list.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The list file could not be read.
    #[error("cannot read URL list {path}: {source}")]
    Io {
        /// Path of the list file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Extracts URLs from list text, preserving order.
#[must_use]
pub fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches('\u{feff}');
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let first = line.split(',').next().unwrap_or(line);
            let url = first.trim().trim_matches('"').trim();
            (!url.is_empty()).then(|| url.to_string())
        })
        .collect()
}

/// Reads and parses a URL list file.
///
/// # Errors
///
/// Returns [`SourceError::Io`] when the file cannot be read or is not UTF-8.
#[instrument(fields(path = %path.display()))]
pub async fn read_url_list(path: &Path) -> Result<Vec<String>, SourceError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    let urls = parse_url_list(&content);
    debug!(urls = urls.len(), "read URL list");
    Ok(urls)
}
