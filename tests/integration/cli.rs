use crate::common::{RangeResponder, TestEnv, payload};
use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn updatekit(env: &TestEnv) -> Command {
    let mut cmd = Command::cargo_bin("updatekit").unwrap();
    cmd.env("UPDATEKIT_DATA_DIR", env.data_dir())
        .env("UPDATEKIT_NO_PROGRESS", "1")
        .env("NO_COLOR", "1")
        .env_remove("UPDATEKIT_MANIFEST_URL")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_config_show_prints_defaults() -> Result<()> {
    let env = TestEnv::new()?;
    updatekit(&env)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("auto_check_enabled = true"))
        .stdout(predicate::str::contains("check_interval_hours = 24"));
    Ok(())
}

#[test]
fn test_config_set_persists() -> Result<()> {
    let env = TestEnv::new()?;
    updatekit(&env)
        .args(["config", "set", "check_interval_hours", "12"])
        .assert()
        .success();
    updatekit(&env)
        .args(["config", "set", "background_check", "off"])
        .assert()
        .success();

    env.run(&["config"])?
        .assert_success()
        .assert_stdout_contains("check_interval_hours = 12")
        .assert_stdout_contains("background_check = false");

    let record: serde_json::Value =
        serde_json::from_slice(&std::fs::read(env.data_dir().join("config.json"))?)?;
    assert_eq!(record["check_interval_hours"], 12);
    Ok(())
}

#[test]
fn test_config_set_rejects_bad_input() -> Result<()> {
    let env = TestEnv::new()?;
    updatekit(&env)
        .args(["config", "set", "check_interval_hours", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid value '0'"));
    updatekit(&env)
        .args(["config", "set", "colour", "blue"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown config key 'colour'"));
    Ok(())
}

#[test]
fn test_status_on_empty_data_dir() -> Result<()> {
    let env = TestEnv::new()?;
    env.run(&["status"])?
        .assert_success()
        .assert_stdout_contains("never")
        .assert_stdout_contains("(not configured)");
    Ok(())
}

#[test]
fn test_pending_without_record() -> Result<()> {
    let env = TestEnv::new()?;
    env.run(&["pending"])?.assert_success().assert_stdout_contains("No pending update");
    Ok(())
}

#[test]
fn test_pending_flags_conflict() -> Result<()> {
    let env = TestEnv::new()?;
    env.run(&["pending", "--install", "--discard"])?.assert_failure();
    Ok(())
}

#[test]
fn test_check_requires_manifest_url() -> Result<()> {
    let env = TestEnv::new()?;
    env.run(&["check"])?
        .assert_failure()
        .assert_stderr_contains("UPDATEKIT_MANIFEST_URL");
    Ok(())
}

#[tokio::test]
async fn test_check_against_manifest() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/version.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "latest_version": "1.2.0",
            "url": "https://example.com/hello-1.2.0"
        })))
        .mount(&server)
        .await;
    let manifest = format!("{}/version.json", server.uri());
    let env = TestEnv::new()?;

    let first = env.run_with_manifest(&["--current-version", "1.1.1", "check"], Some(&manifest))?;
    first.assert_success().assert_stdout_contains("Update found: 1.2.0");

    let second = env.run_with_manifest(&["--current-version", "1.1.1", "check"], Some(&manifest))?;
    second
        .assert_success()
        .assert_stdout_contains("Skipped - too soon since last check");

    let current = env.run_with_manifest(&["--current-version", "1.2.0", "check", "--force"], Some(&manifest))?;
    current.assert_success().assert_stdout_contains("Already up to date");
    Ok(())
}

#[tokio::test]
async fn test_failed_check_exits_nonzero() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    let env = TestEnv::new()?;

    env.run_with_manifest(&["check", "--force"], Some(&format!("{}/version.json", server.uri())))?
        .assert_failure()
        .assert_stderr_contains("Version check failed: Error:");
    Ok(())
}

#[tokio::test]
async fn test_download_command_writes_file() -> Result<()> {
    let body = payload(120_000);
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hello-1.2.0"))
        .respond_with(RangeResponder { body: body.clone() })
        .mount(&server)
        .await;
    let env = TestEnv::new()?;

    let output = env.run(&[
        "--app-name",
        "Hello",
        "download",
        &format!("{}/hello-1.2.0", server.uri()),
        "1.2.0",
    ])?;
    output.assert_success().assert_stdout_contains("Downloaded 1.2.0");

    let file = env.data_dir().join(format!("hello_new{}", std::env::consts::EXE_SUFFIX));
    assert!(std::fs::read(file)? == body);
    Ok(())
}
