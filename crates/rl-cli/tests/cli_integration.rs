//! CLI integration tests
//!
//! Tests the roamlink CLI using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;

fn roamlink() -> Command {
    let mut cmd = Command::cargo_bin("roamlink")
        .expect("Failed to locate roamlink binary - ensure it's built before running tests");
    cmd.env_remove("ROAMLINK_CONFIG")
        .env_remove("ROAMLINK_IDENTITY_FILE")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_cli_help() {
    roamlink()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("roamlink"))
        .stdout(predicate::str::contains("Roaming UDP remote sessions"));
}

#[test]
fn test_cli_version() {
    roamlink()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("roamlink"));
}

#[test]
fn test_cli_connect_help() {
    roamlink()
        .args(["connect", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--identity-file"))
        .stdout(predicate::str::contains("--agent-version"));
}

#[test]
fn test_cli_resolve_help() {
    roamlink()
        .args(["resolve", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--json"));
}

#[test]
fn test_cli_connect_missing_authority() {
    roamlink().arg("connect").assert().failure();
}

#[test]
fn test_cli_unknown_command() {
    roamlink()
        .arg("nonexistent-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_cli_config_path_honors_flag() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    roamlink()
        .args(["config", "path", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_cli_config_init_then_show() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    roamlink()
        .args(["config", "init", "--config"])
        .arg(&path)
        .assert()
        .success();
    assert!(path.exists());

    roamlink()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("[handshake]"))
        .stdout(predicate::str::contains("mosh-server"));
}

#[test]
fn test_cli_config_show_from_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("env.toml");
    std::fs::write(&path, "[transport]\nmtu = 1400\n").unwrap();

    roamlink()
        .args(["config", "show"])
        .env("ROAMLINK_CONFIG", &path)
        .assert()
        .success()
        .stdout(predicate::str::contains("mtu = 1400"));
}

#[test]
fn test_cli_config_show_rejects_invalid_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "[ssh\nuser = ").unwrap();

    roamlink()
        .args(["config", "show", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}

#[test]
fn test_cli_resolve_invalid_authority() {
    let dir = tempfile::tempdir().unwrap();
    roamlink()
        .args(["resolve", "ssh-udp+", "--config"])
        .arg(dir.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid authority"));
}
