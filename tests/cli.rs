//! Integration tests for the sandpool CLI.
//!
//! These tests run the actual executable and check output, exit codes and
//! file system effects. The `exec` tests point the HTTP backend at a mock
//! provisioning service.

use assert_cmd::assert::{Assert, OutputAssertExt};
use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;
use std::fs;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

/// Creates a Command for the sandpool binary.
#[allow(deprecated)]
fn sandpool() -> Command {
    Command::cargo_bin("sandpool").expect("failed to find sandpool binary")
}

/// Creates a Command for sandpool running in a specific directory.
fn sandpool_in(dir: &TempDir) -> Command {
    let mut cmd = sandpool();
    cmd.current_dir(dir.path());
    cmd
}

/// Writes a config selecting the HTTP backend at `base_url`.
fn write_http_config(dir: &TempDir, base_url: &str) {
    fs::write(
        dir.path().join("sandpool.toml"),
        format!(
            "[provisioner]\nbackend = \"http\"\n\n[provisioner.http]\nbase_url = \"{base_url}\"\n\n[reconnect]\nbackoff_ms = 10\n"
        ),
    )
    .unwrap();
}

/// Runs the binary off the async runtime so the mock server keeps serving.
async fn run_blocking(mut cmd: Command) -> Assert {
    tokio::task::spawn_blocking(move || cmd.output())
        .await
        .unwrap()
        .unwrap()
        .assert()
}

// -----------------------------------------------------------------------------
// Help and version tests
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    sandpool()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sandpool"))
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("templates"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("exec"));
}

#[test]
fn test_version_shows_version() {
    sandpool()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sandpool"));
}

#[test]
fn test_run_help_shows_options() {
    sandpool()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--template"))
        .stdout(predicate::str::contains("--stats-interval"))
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn test_exec_requires_command() {
    sandpool()
        .arg("exec")
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn test_unknown_command_fails() {
    sandpool().arg("bogus").assert().failure();
}

// -----------------------------------------------------------------------------
// Init tests
// -----------------------------------------------------------------------------

#[test]
fn test_init_creates_config() {
    let dir = TempDir::new().unwrap();

    sandpool_in(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created"));

    let content = fs::read_to_string(dir.path().join("sandpool.toml")).unwrap();
    assert!(content.contains("[pool]"));
    assert!(content.contains("[reconnect]"));
}

#[test]
fn test_init_skips_existing_config() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("sandpool.toml"), "# mine\n").unwrap();

    sandpool_in(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));

    let content = fs::read_to_string(dir.path().join("sandpool.toml")).unwrap();
    assert_eq!(content, "# mine\n");
}

#[test]
fn test_init_force_overwrites_broken_config() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("sandpool.toml"), "[pool\n").unwrap();

    sandpool_in(&dir)
        .args(["init", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("overwritten"));

    let content = fs::read_to_string(dir.path().join("sandpool.toml")).unwrap();
    assert!(content.contains("[pool]"));
}

#[test]
fn test_init_honours_config_path() {
    let dir = TempDir::new().unwrap();

    sandpool_in(&dir)
        .args(["--config", "conf/pool.toml", "init"])
        .assert()
        .success();

    assert!(dir.path().join("conf/pool.toml").exists());
}

// -----------------------------------------------------------------------------
// Templates tests
// -----------------------------------------------------------------------------

#[test]
fn test_templates_lists_builtins() {
    let dir = TempDir::new().unwrap();

    sandpool_in(&dir)
        .arg("templates")
        .assert()
        .success()
        .stdout(predicate::str::contains("nextjs-developer"))
        .stdout(predicate::str::contains("streamlit-developer"))
        .stdout(predicate::str::contains("code-interpreter-v1"));
}

#[test]
fn test_templates_includes_configured_templates() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("sandpool.toml"),
        "[[templates]]\nid = \"rust-developer\"\nruntime = \"plain\"\nimage = \"rust:1-slim\"\n",
    )
    .unwrap();

    sandpool_in(&dir)
        .arg("templates")
        .assert()
        .success()
        .stdout(predicate::str::contains("rust-developer"))
        .stdout(predicate::str::contains("rust:1-slim"));
}

#[test]
fn test_invalid_config_is_reported() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("sandpool.toml"), "[pool]\nwarmup_batch = 0\n").unwrap();

    sandpool_in(&dir)
        .arg("templates")
        .assert()
        .failure()
        .stderr(predicate::str::contains("warmup_batch"));
}

// -----------------------------------------------------------------------------
// Exec tests
// -----------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn test_exec_runs_command_and_kills_sandbox() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sandboxes"))
        .and(body_partial_json(json!({ "templateID": "vue-developer" })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sandboxID": "sbx-1" })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sandboxes/sbx-1/commands"))
        .and(body_partial_json(json!({ "cmd": "echo hello" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "exitCode": 0,
            "stdout": "hello\n",
            "stderr": ""
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/sandboxes/sbx-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    write_http_config(&dir, &server.uri());

    let mut cmd = sandpool_in(&dir);
    cmd.args(["exec", "-t", "vue-developer", "echo", "hello"]);
    run_blocking(cmd)
        .await
        .success()
        .stdout("hello\n")
        .stderr(predicate::str::contains("sbx-1 (new)"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exec_reconnects_and_keeps_sandbox() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sandboxes/sbx-7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "sandboxID": "sbx-7" })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sandboxes/sbx-7/commands"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "exitCode": 3,
            "stdout": "",
            "stderr": "boom\n"
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sandboxes"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "sandboxID": "other" })))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    write_http_config(&dir, &server.uri());

    let mut cmd = sandpool_in(&dir);
    cmd.args(["exec", "--sandbox", "sbx-7", "--keep", "false"]);
    run_blocking(cmd)
        .await
        .failure()
        .stderr(predicate::str::contains("boom"))
        .stderr(predicate::str::contains("sbx-7 (reused)"))
        .stderr(predicate::str::contains("exited with status 3"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_exec_reports_unreachable_backend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sandboxes"))
        .respond_with(ResponseTemplate::new(503).set_body_string("no capacity"))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    write_http_config(&dir, &server.uri());

    let mut cmd = sandpool_in(&dir);
    cmd.args(["exec", "true"]);
    run_blocking(cmd)
        .await
        .failure()
        .stderr(predicate::str::contains("Failed to get a sandbox"));
}
