//! Progress UI (bar) for download runs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use archive_downloader::{ProgressAggregator, ProgressSnapshot};
use indicatif::{ProgressBar, ProgressStyle};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Spawns the progress UI when requested.
/// Returns (handle, stop) so the caller can signal stop and await the handle.
/// When `use_bar` is false, returns (None, stop) with stop already true.
pub(crate) fn spawn_progress_ui(
    use_bar: bool,
    progress: Arc<ProgressAggregator>,
) -> (Option<tokio::task::JoinHandle<()>>, Arc<AtomicBool>) {
    if !use_bar {
        return (None, Arc::new(AtomicBool::new(true)));
    }
    let stop = Arc::new(AtomicBool::new(false));
    let handle = spawn_bar_inner(progress, Arc::clone(&stop));
    (Some(handle), stop)
}

fn spawn_bar_inner(
    progress: Arc<ProgressAggregator>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        while !stop.load(Ordering::SeqCst) {
            let snapshot = progress.snapshot();
            bar.set_length(snapshot.bytes_total.max(snapshot.bytes_done));
            bar.set_position(snapshot.bytes_done);
            bar.set_message(progress_message(&snapshot));
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        bar.finish_and_clear();
    })
}

fn progress_message(snapshot: &ProgressSnapshot) -> String {
    let mut message = format!("[{}/{}] files", snapshot.finished(), snapshot.total_tasks);
    if snapshot.failed > 0 {
        message.push_str(&format!(", {} failed", snapshot.failed));
    }
    message
}
