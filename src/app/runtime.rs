//! One CLI run: wire arguments into a manager, drive it, report.

use std::io::IsTerminal;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use archive_downloader::{
    Credentials, DownloadManager, ManagerConfig, RetryPolicy, read_url_list,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ProcessExit;
use crate::app::exit_handler::determine_exit_outcome;
use crate::app::output::print_report;
use crate::app::progress_manager::spawn_progress_ui;
use crate::app::terminal::{is_dumb_terminal, should_use_progress_bar};
use crate::cli::Args;

pub(crate) fn manager_config(args: &Args) -> ManagerConfig {
    let mut config = ManagerConfig::new(args.save_dir.clone(), args.login_url.clone());
    if let Some(auth_url) = &args.auth_url {
        config.session = config.session.with_auth_url(auth_url.clone());
    }
    config.session.read_timeout = Duration::from_secs(args.read_timeout);
    config.session.use_env_proxy = !args.no_proxy;
    config.pool.concurrency = usize::from(args.concurrency);
    config.retry = RetryPolicy::with_max_attempts(u32::from(args.max_retries));
    config
}

/// Cancels `cancel` on the first Ctrl-C.
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after in-flight writes");
            cancel.cancel();
        }
    });
}

pub(crate) async fn run_downloader(args: Args) -> Result<ProcessExit> {
    debug!(?args, "CLI arguments parsed");

    let urls = read_url_list(&args.txt_dir).await?;
    if urls.is_empty() {
        info!(path = %args.txt_dir.display(), "no URLs found in list");
        return Ok(ProcessExit::Success);
    }

    let manager = DownloadManager::new(manager_config(&args))?;
    let json = args.json;
    let use_bar = should_use_progress_bar(
        std::io::stderr().is_terminal(),
        args.quiet,
        is_dumb_terminal(),
    );
    let credentials = Credentials::new(args.username, args.password);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let (handle, stop) = spawn_progress_ui(use_bar, manager.progress());
    let result = manager.run(&credentials, urls, cancel).await;
    stop.store(true, Ordering::SeqCst);
    if let Some(handle) = handle {
        let _ = handle.await;
    }

    let report = result.context("download run could not start")?;
    print_report(&report, json)?;
    Ok(determine_exit_outcome(&report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_manager_config_from_args() {
        let args = Args::try_parse_from([
            "archive-downloader",
            "--save-dir",
            "out",
            "--username",
            "u",
            "--password",
            "p",
            "--txt-dir",
            "urls.txt",
            "--auth-url",
            "https://sso.example/",
            "-c",
            "8",
            "-r",
            "2",
            "--read-timeout",
            "30",
            "--no-proxy",
        ])
        .unwrap();

        let config = manager_config(&args);
        assert_eq!(config.save_dir, std::path::PathBuf::from("out"));
        assert_eq!(config.pool.concurrency, 8);
        assert_eq!(config.retry.max_attempts(), 2);
        assert_eq!(config.session.read_timeout, Duration::from_secs(30));
        assert!(!config.session.use_env_proxy);
        assert_eq!(
            config.session.auth_url.as_ref().and_then(|u| u.host_str()),
            Some("sso.example")
        );
    }
}
