//! Shared fixtures for integration tests: a mock archive and test configs.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use archive_downloader::download::Sleeper;
use archive_downloader::{DownloadManager, ManagerConfig, RetryPolicy};
use async_trait::async_trait;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const USERNAME: &str = "alice";
pub const PASSWORD: &str = "s3cret";

/// Retry sleeper that returns immediately.
#[derive(Debug, Default)]
pub struct NoSleep;

#[async_trait]
impl Sleeper for NoSleep {
    async fn sleep(&self, _duration: Duration) {}
}

/// Login endpoint that counts how often it is hit.
pub struct CountingLogin(pub Arc<AtomicUsize>);

impl Respond for CountingLogin {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.0.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200)
    }
}

/// Starts a mock archive whose `/login` accepts any credentials.
pub async fn start_archive() -> (MockServer, Arc<AtomicUsize>) {
    let server = MockServer::start().await;
    let logins = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(CountingLogin(Arc::clone(&logins)))
        .mount(&server)
        .await;
    (server, logins)
}

/// Deterministic config: no proxy, no size probe, zero jitter.
pub fn config_for(server: &MockServer, save_dir: &Path, concurrency: usize) -> ManagerConfig {
    let login_url = Url::parse(&format!("{}/login", server.uri())).unwrap();
    let mut config = ManagerConfig::new(save_dir, login_url);
    config.session.use_env_proxy = false;
    config.pool.concurrency = concurrency;
    config.pool.drain_timeout = Duration::from_secs(2);
    config.retry = RetryPolicy::with_max_attempts(3).with_max_jitter(Duration::ZERO);
    config.probe_size = false;
    config
}

pub fn manager(config: ManagerConfig) -> DownloadManager {
    DownloadManager::new(config)
        .unwrap()
        .with_sleeper(Arc::new(NoSleep))
}

/// Mounts `GET <file_path>` returning `body` in full.
pub async fn mount_file(server: &MockServer, file_path: &str, body: &[u8]) {
    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
        .mount(server)
        .await;
}

pub fn url(server: &MockServer, file_path: &str) -> String {
    format!("{}{file_path}", server.uri())
}

/// Deterministic file content of `len` bytes.
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}
