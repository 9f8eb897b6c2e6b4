//! Integration tests for the ledger, dependency and configuration commands.
//!
//! These run the prship binary inside a temporary directory holding a
//! `sprint-status.yaml` ledger. None of them reach the repository host.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const LEDGER: &str = "\
# generated by sprint planning
development_status:
  epic-7: in-progress
  7-1-login-form: in-review
  7-2-session-refresh: backlog  # depends-on: 7-1
  7-3-remember-me: backlog  # depends-on: 7-1, 7-4
  7-4-audit-log: in-progress
";

const CYCLIC_LEDGER: &str = "\
development_status:
  a: done
  b: backlog  # depends-on: a, c
  c: backlog  # depends-on: b
";

/// Get a Command instance for the prship binary
fn prship_cmd() -> Command {
    let mut cmd = Command::cargo_bin("prship").expect("Failed to find prship binary");
    cmd.env_remove("RUST_LOG")
        .env_remove("GITHUB_TOKEN");
    cmd
}

fn workspace_with(ledger: &str) -> TempDir {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    fs::write(temp_dir.path().join("sprint-status.yaml"), ledger).expect("Failed to write ledger");
    temp_dir
}

#[test]
fn test_status_show_lists_entries() {
    let temp_dir = workspace_with(LEDGER);

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["status", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("7-1-login-form: in-review"))
        .stdout(predicate::str::contains("7-2-session-refresh: not-started"));
}

#[test]
fn test_status_show_resolves_short_key() {
    let temp_dir = workspace_with(LEDGER);

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["status", "show", "7-4"])
        .assert()
        .success()
        .stdout("7-4-audit-log: in-progress\n");
}

#[test]
fn test_status_show_unknown_key_fails() {
    let temp_dir = workspace_with(LEDGER);

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["status", "show", "9-9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_status_set_rewrites_only_the_status_token() {
    let temp_dir = workspace_with(LEDGER);

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["status", "set", "7-1", "done"])
        .assert()
        .success()
        .stdout(predicate::str::contains("7-1-login-form: in-review -> done"));

    let content = fs::read_to_string(temp_dir.path().join("sprint-status.yaml")).unwrap();
    assert_eq!(content, LEDGER.replace("7-1-login-form: in-review", "7-1-login-form: done"));
}

#[test]
fn test_status_set_refuses_regression() {
    let temp_dir = workspace_with(LEDGER);

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["status", "set", "7-1-login-form", "in-progress"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("refusing"));

    let content = fs::read_to_string(temp_dir.path().join("sprint-status.yaml")).unwrap();
    assert_eq!(content, LEDGER);
}

#[test]
fn test_status_set_rejects_unknown_status() {
    let temp_dir = workspace_with(LEDGER);

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["status", "set", "7-1", "shipped"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown status 'shipped'"));
}

#[test]
fn test_resolve_reports_ready_and_blocked() {
    let temp_dir = workspace_with(LEDGER);

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["resolve", "7-1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ready: 7-2-session-refresh"))
        .stdout(predicate::str::contains("blocked: 7-3-remember-me (waiting on 7-4)"));
}

#[test]
fn test_resolve_json_output() {
    let temp_dir = workspace_with(LEDGER);

    let output = prship_cmd()
        .current_dir(temp_dir.path())
        .args(["--json", "resolve", "7-1"])
        .output()
        .expect("Failed to run prship");
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["ready_keys"], serde_json::json!(["7-2-session-refresh"]));
    assert_eq!(value["blocked"][0]["key"], "7-3-remember-me");
}

#[test]
fn test_resolve_reports_cycle() {
    let temp_dir = workspace_with(CYCLIC_LEDGER);

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["resolve", "a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cycle: "))
        .stdout(predicate::str::contains("blocked: b (waiting on c)"));
}

#[test]
fn test_resolve_honors_ledger_flag() {
    let temp_dir = workspace_with("");
    fs::write(temp_dir.path().join("other.yaml"), CYCLIC_LEDGER).unwrap();

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["--ledger", "other.yaml", "resolve", "a"])
        .assert()
        .success()
        .stdout(predicate::str::contains("blocked: b"));
}

#[test]
fn test_config_init_writes_defaults_once() {
    let temp_dir = TempDir::new().unwrap();

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("prship.toml"));

    let content = fs::read_to_string(temp_dir.path().join("prship.toml")).unwrap();
    assert!(content.contains("poll_interval_secs = 30"));
    assert!(content.contains("retention_days = 30"));

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_config_show_applies_environment_overrides() {
    let temp_dir = TempDir::new().unwrap();

    prship_cmd()
        .current_dir(temp_dir.path())
        .env("PRSHIP__VERIFICATION__MAX_RETRIES", "5")
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max_retries = 5"));
}

#[test]
fn test_failures_list_empty() {
    let temp_dir = TempDir::new().unwrap();

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["failures", "list"])
        .assert()
        .success()
        .stdout("no failure records\n");
}

#[test]
fn test_deliver_requires_repository() {
    let temp_dir = workspace_with(LEDGER);

    prship_cmd()
        .current_dir(temp_dir.path())
        .args(["deliver", "--branch", "feature/7-1", "--key", "7-1", "--title", "Login form"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("github.owner and github.repo must be set"));
}

#[test]
fn test_help_lists_commands() {
    prship_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deliver"))
        .stdout(predicate::str::contains("resolve"))
        .stdout(predicate::str::contains("failures"));
}
