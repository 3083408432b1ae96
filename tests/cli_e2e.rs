//! End-to-end CLI tests for the archive-downloader binary.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PASSWORD: &str = "hunter2-secret";

fn base_command(save_dir: &Path, list: &Path) -> Command {
    let mut cmd = Command::cargo_bin("archive-downloader").unwrap();
    cmd.env_remove("RUST_LOG")
        .arg("--save-dir")
        .arg(save_dir)
        .args(["--username", "alice", "--password", PASSWORD])
        .arg("--txt-dir")
        .arg(list)
        .arg("--no-proxy");
    cmd
}

/// Runs a blocking command without stalling the runtime serving the mock.
async fn run_blocking(mut cmd: Command) -> assert_cmd::assert::Assert {
    tokio::task::spawn_blocking(move || cmd.assert())
        .await
        .unwrap()
}

async fn start_archive() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/a.h5"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"granule-a".to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data/missing.h5"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    server
}

#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("archive-downloader").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("authenticated data archive"))
        .stdout(predicate::str::contains("--txt-dir"));
}

#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("archive-downloader").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("archive-downloader"));
}

#[test]
fn test_binary_missing_required_args_returns_error() {
    let mut cmd = Command::cargo_bin("archive-downloader").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_binary_missing_url_list_exits_with_setup_failure() {
    let dir = TempDir::new().unwrap();
    base_command(&dir.path().join("out"), &dir.path().join("absent.txt"))
        .assert()
        .code(2)
        .stderr(predicate::str::contains("absent.txt"));
}

#[test]
fn test_binary_empty_url_list_succeeds() {
    let dir = TempDir::new().unwrap();
    let list = dir.path().join("urls.txt");
    std::fs::write(&list, "# nothing yet\n\n").unwrap();
    base_command(&dir.path().join("out"), &list)
        .assert()
        .success();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_downloads_and_prints_json_report() {
    let server = start_archive().await;
    let dir = TempDir::new().unwrap();
    let list = dir.path().join("urls.txt");
    std::fs::write(&list, format!("{}/data/a.h5\n", server.uri())).unwrap();
    let save_dir = dir.path().join("out");

    let mut cmd = base_command(&save_dir, &list);
    cmd.arg("--login-url")
        .arg(format!("{}/login", server.uri()))
        .arg("--json");
    let assert = run_blocking(cmd).await.success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let report: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(report["completed"], serde_json::json!([0]));
    assert_eq!(report["bytes_transferred"], 9);
    assert_eq!(std::fs::read(save_dir.join("a.h5")).unwrap(), b"granule-a");
}

#[tokio::test(flavor = "multi_thread")]
async fn test_binary_failed_task_exits_one_and_never_logs_password() {
    let server = start_archive().await;
    let dir = TempDir::new().unwrap();
    let list = dir.path().join("urls.txt");
    std::fs::write(
        &list,
        format!("{0}/data/a.h5\n{0}/data/missing.h5\n", server.uri()),
    )
    .unwrap();
    let log_file = dir.path().join("download.log");

    let mut cmd = base_command(&dir.path().join("out"), &list);
    cmd.arg("--login-url")
        .arg(format!("{}/login", server.uri()))
        .arg("--log-file")
        .arg(&log_file)
        .arg("-vv");
    let assert = run_blocking(cmd)
        .await
        .code(1)
        .stdout(predicate::str::contains("missing.h5 (not found)"))
        .stdout(predicate::str::contains("1 completed"));

    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    assert!(!stderr.contains(PASSWORD));
    let log = std::fs::read_to_string(&log_file).unwrap();
    assert!(log.contains("run complete"));
    assert!(!log.contains(PASSWORD));
}
