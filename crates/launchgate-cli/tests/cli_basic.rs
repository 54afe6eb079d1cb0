//! Basic CLI E2E tests.
//!
//! Tests invoke CLI commands via cargo run against the development data
//! directory and verify outputs.

use std::process::Command;

/// Run a CLI command and return output.
fn run_cli(args: &[&str]) -> (String, String, i32) {
    let output = Command::new("cargo")
        .args(["run", "-q", "-p", "launchgate-cli", "--"])
        .args(args)
        .env("LAUNCHGATE_ENV", "dev")
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

#[test]
fn test_help_lists_commands() {
    let (stdout, _, code) = run_cli(&["--help"]);
    assert_eq!(code, 0);
    for command in ["run", "store", "config", "device-id"] {
        assert!(stdout.contains(command), "missing {command} in help");
    }
}

#[test]
fn test_config_list_json() {
    let (stdout, _, code) = run_cli(&["config", "list"]);
    assert_eq!(code, 0, "Config list failed");
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(parsed["timing"]["deadline"].is_number());
    assert!(parsed["permission"]["cooldown_days"].is_number());
}

#[test]
fn test_config_get_unknown_key_fails() {
    let (_, stderr, code) = run_cli(&["config", "get", "timing.nope"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("unknown key"));
}

#[test]
fn test_store_rejects_unknown_key() {
    let (_, stderr, code) = run_cli(&["store", "get", "not_a_key"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("error:"));
}

#[test]
fn test_run_rejects_non_object_attribution() {
    let (_, stderr, code) = run_cli(&["run", "--memory", "--attribution", "[1, 2]"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("--attribution must be a JSON object"));
}

#[test]
fn test_run_grant_conflicts_with_skip() {
    let (_, _, code) = run_cli(&["run", "--memory", "--grant", "--skip"]);
    assert_ne!(code, 0);
}
