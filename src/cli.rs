//! CLI argument definitions using clap derive macros.

use std::fmt;
use std::path::PathBuf;

use archive_downloader::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};
use clap::Parser;
use url::Url;

/// Login endpoint used when `--login-url` is not given.
pub const DEFAULT_LOGIN_URL: &str = "https://urs.earthdata.nasa.gov/profile";

/// Bulk-download a list of files from an authenticated data archive.
///
/// Downloads resume where they stopped, transient failures are retried with
/// backoff, and files already on disk are skipped.
#[derive(Parser)]
#[command(name = "archive-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Directory to save downloaded files into (created if missing)
    #[arg(long)]
    pub save_dir: PathBuf,

    /// Archive account username
    #[arg(long)]
    pub username: String,

    /// Archive account password
    #[arg(long)]
    pub password: String,

    /// Text file with one URL per line (first CSV column)
    #[arg(long, visible_alias = "url-list")]
    pub txt_dir: PathBuf,

    /// Endpoint whose redirect chain logs the session in
    #[arg(long, default_value = DEFAULT_LOGIN_URL)]
    pub login_url: Url,

    /// Host that receives credentials, if different from the login URL's host
    #[arg(long)]
    pub auth_url: Option<Url>,

    /// Maximum concurrent downloads (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Maximum attempts per file for transient failures (0-10, 0 acts as 1)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Seconds without data before a transfer is considered stalled (1-3600)
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout: u64,

    /// Ignore HTTP(S)_PROXY environment variables
    #[arg(long)]
    pub no_proxy: bool,

    /// Also append log output to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Print the final report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

// Custom Debug impl that redacts the password.
impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("save_dir", &self.save_dir)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("txt_dir", &self.txt_dir)
            .field("login_url", &self.login_url.as_str())
            .field("auth_url", &self.auth_url.as_ref().map(Url::as_str))
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("read_timeout", &self.read_timeout)
            .field("no_proxy", &self.no_proxy)
            .field("log_file", &self.log_file)
            .field("json", &self.json)
            .field("verbose", &self.verbose)
            .field("quiet", &self.quiet)
            .finish()
    }
}
