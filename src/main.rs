//! CLI entry point for the archive downloader.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

mod app;
mod cli;

use app::runtime::run_downloader;
use app::terminal::{default_level, init_tracing, is_dumb_terminal, no_color_env_requested};
use cli::Args;

/// How the process ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessExit {
    /// Every task completed or was skipped.
    Success,
    /// The run finished, but some task failed or the run was interrupted.
    Partial,
    /// The run could not start (bad input, login failure, unusable save dir).
    Failure,
}

impl ProcessExit {
    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Partial => 1,
            Self::Failure => 2,
        }
    }
}

impl From<ProcessExit> for ExitCode {
    fn from(exit: ProcessExit) -> Self {
        ExitCode::from(exit.code())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let level = default_level(args.quiet, args.verbose);
    let no_color = no_color_env_requested() || is_dumb_terminal();
    if let Err(error) = init_tracing(level, no_color, args.log_file.as_deref()) {
        eprintln!("error: cannot open log file: {error}");
        return ProcessExit::Failure.into();
    }

    info!("archive downloader starting");
    match run_downloader(args).await {
        Ok(exit) => exit.into(),
        Err(error) => {
            error!(error = %format!("{error:#}"), "run failed");
            ProcessExit::Failure.into()
        }
    }
}
