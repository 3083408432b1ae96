//! Exit code logic for the downloader process.
//!
//! Single responsibility: map a run report to the process exit outcome.

use archive_downloader::DownloadReport;

use crate::ProcessExit;

/// Determines the process exit outcome from a finished run.
///
/// Setup errors never reach here; they map to [`ProcessExit::Failure`] in `main`.
pub(crate) fn determine_exit_outcome(report: &DownloadReport) -> ProcessExit {
    if report.is_success() {
        ProcessExit::Success
    } else {
        ProcessExit::Partial
    }
}
