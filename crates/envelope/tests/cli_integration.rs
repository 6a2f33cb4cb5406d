//! CLI integration tests for the envelope command-line interface.
//!
//! These run without a backend: they cover argument parsing, config
//! discovery and error reporting.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command for the envelope binary, isolated from the user's config and data.
fn envelope(workdir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("envelope").unwrap();
    cmd.current_dir(workdir.path())
        .env("ENVELOPE_CONFIG_DIR", workdir.path().join("config"))
        .env("XDG_DATA_HOME", workdir.path().join("data"))
        .env_remove("ENVELOPE_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn write_config(workdir: &TempDir, contents: &str) {
    let dir = workdir.path().join("config");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("config.toml"), contents).unwrap();
}

#[test]
fn test_help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    envelope(&dir)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("auth"))
        .stdout(predicate::str::contains("get"))
        .stdout(predicate::str::contains("send"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_config_which_reports_missing_files() {
    let dir = TempDir::new().unwrap();
    envelope(&dir)
        .args(["config", "which"])
        .assert()
        .success()
        .stdout(predicate::str::contains("envelope.toml"))
        .stdout(predicate::str::contains("not found"));
}

#[test]
fn test_config_show_masks_api_key() {
    let dir = TempDir::new().unwrap();
    write_config(
        &dir,
        r#"
[backend]
url = "https://budget.example.co"
api_key = "anon-key-1234567890"
"#,
    );

    envelope(&dir)
        .args(["--json", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://budget.example.co"))
        .stdout(predicate::str::contains("anon...7890"))
        .stdout(predicate::str::contains("anon-key-1234567890").not());
}

#[test]
fn test_invalid_config_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "[retry]\nmax_attempts = 0\n");

    envelope(&dir)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("retry.max_attempts"));
}

#[test]
fn test_get_without_backend_fails() {
    let dir = TempDir::new().unwrap();
    envelope(&dir)
        .args(["get", "rest/v1/envelopes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("[backend]"));
}

#[test]
fn test_get_rejects_malformed_query() {
    let dir = TempDir::new().unwrap();
    envelope(&dir)
        .args(["get", "rest/v1/envelopes", "--query", "oops"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expected key=value"));
}

#[test]
fn test_send_rejects_unknown_method() {
    let dir = TempDir::new().unwrap();
    envelope(&dir)
        .args(["send", "TRACE", "rest/v1/transactions", "--group", "transaction_written"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported method"));
}

#[test]
fn test_auth_status_without_session() {
    let dir = TempDir::new().unwrap();
    write_config(&dir, "[backend]\nurl = \"https://budget.example.co\"\n");

    envelope(&dir)
        .args(["--json", "auth", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"unauthenticated\""));
}
