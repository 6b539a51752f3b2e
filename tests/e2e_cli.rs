//! CLI end-to-end tests
//!
//! Tests for the metahub command-line interface.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the metahub binary
#[allow(deprecated)]
fn metahub_cmd() -> Command {
    let mut cmd = Command::cargo_bin("metahub").unwrap();
    for var in [
        "DSN",
        "DB_MAX_IDLE_CONNS",
        "DB_MAX_OPEN_CONNS",
        "DB_AUTO_MIGRATE",
        "DB_PREPARED_STMT",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_cli_no_args_shows_help() {
    metahub_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_lists_commands() {
    metahub_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("serve"))
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_cli_version_command() {
    metahub_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with(format!(
            "metahub {}-",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_cli_version_flag_includes_commit() {
    metahub_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with(format!(
            "metahub {}-",
            env!("CARGO_PKG_VERSION")
        )));
}

#[test]
fn test_cli_validate_valid_config() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metahub.json");
    fs::write(
        &path,
        r#"{
            "server": {"host": "127.0.0.1", "port": 8080},
            "providers": [
                {"name": "alpha", "url": "http://alpha.test/{key}", "weight": 5}
            ]
        }"#,
    )
    .unwrap();

    metahub_cmd()
        .args(["validate", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("Providers: 1"));
}

#[test]
fn test_cli_validate_reports_warnings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metahub.json");
    fs::write(&path, r#"{"providers": []}"#).unwrap();

    metahub_cmd()
        .arg("--config")
        .arg(&path)
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("no providers enabled"));
}

#[test]
fn test_cli_validate_rejects_bad_json() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("metahub.json");
    fs::write(&path, "{ not json").unwrap();

    metahub_cmd()
        .args(["validate", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("config parse error"));
}

#[test]
fn test_cli_migrate_creates_store() {
    let dir = tempdir().unwrap();
    let db = dir.path().join("metahub.db");

    metahub_cmd()
        .args(["migrate", "--dsn", db.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Store schema is current"));
    assert!(db.exists());

    // Running it again is a no-op.
    metahub_cmd()
        .args(["migrate", "--dsn", db.to_str().unwrap()])
        .assert()
        .success();
}
