//! Final report rendering.

use anyhow::Result;
use archive_downloader::DownloadReport;

/// Human-readable summary: one line per failure, then the totals.
pub(crate) fn summary_lines(report: &DownloadReport) -> Vec<String> {
    let mut lines: Vec<String> = report
        .failed
        .iter()
        .map(|(id, kind)| {
            format!(
                "failed: {} ({kind})",
                report.source(*id).unwrap_or("<unknown>")
            )
        })
        .collect();

    let mut totals = format!(
        "{} completed, {} skipped, {} failed of {} files ({} bytes transferred)",
        report.completed.len(),
        report.skipped.len(),
        report.failed.len(),
        report.total(),
        report.bytes_transferred
    );
    if report.interrupted {
        totals.push_str(", interrupted");
    }
    lines.push(totals);
    lines
}

pub(crate) fn print_report(report: &DownloadReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        for line in summary_lines(report) {
            println!("{line}");
        }
    }
    Ok(())
}
