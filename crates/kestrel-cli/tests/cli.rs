//! End-to-end tests of the `kestrel` binary.

#![cfg_attr(
    test,
    allow(
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::missing_panics_doc,
        clippy::tests_outside_test_module,
        reason = "Test allows"
    )
)]

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A command with its config directory sandboxed into a temp home.
fn kestrel(home: &TempDir) -> Command {
    let mut command = Command::cargo_bin("kestrel").expect("binary builds");
    command.env("HOME", home.path());
    command
}

#[test]
fn test_help_lists_subcommands() {
    Command::cargo_bin("kestrel")
        .expect("binary builds")
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("run")
                .and(predicate::str::contains("tools"))
                .and(predicate::str::contains("demo")),
        );
}

#[test]
fn test_demo_plan_completes() {
    let home = TempDir::new().unwrap();
    kestrel(&home)
        .arg("demo")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Plan complete")
                .and(predicate::str::contains("format_report")),
        );
}

#[test]
fn test_verbose_demo_prints_metrics() {
    let home = TempDir::new().unwrap();
    kestrel(&home)
        .arg("demo")
        .arg("--verbose")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Tool metrics:")
                .and(predicate::str::contains("get_weather"))
                .and(predicate::str::contains("healthy")),
        );
}

#[test]
fn test_tools_lists_manifest_entries() {
    let home = TempDir::new().unwrap();
    let manifest = home.path().join("tools.json");
    fs::write(
        &manifest,
        r#"{"tools": [
            {"name": "line_count", "description": "Counts lines",
             "call_template": {"kind": "cli", "program": "wc", "args": ["-l", "${path}"]}},
            {"name": "fetch_page",
             "call_template": {"kind": "http", "url": "https://example.com", "method": "GET"}}
        ]}"#,
    )
    .unwrap();

    kestrel(&home)
        .arg("tools")
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(
            predicate::str::contains("line_count")
                .and(predicate::str::contains("cli"))
                .and(predicate::str::contains("fetch_page"))
                .and(predicate::str::contains("http")),
        );
}

#[test]
fn test_run_executes_a_cli_plan() {
    let home = TempDir::new().unwrap();
    let manifest = home.path().join("tools.json");
    fs::write(
        &manifest,
        r#"{"tools": [{
            "name": "greet",
            "call_template": {"kind": "cli", "program": "echo", "args": ["Hello ${name}"]},
            "input_schema": {
                "properties": {"name": {"type": "string"}},
                "required": ["name"]
            }
        }]}"#,
    )
    .unwrap();

    let plan = home.path().join("plan.json");
    fs::write(
        &plan,
        r#"{"goal": "Say hello",
            "steps": [{"id": 1, "tool_name": "greet", "arguments": {"name": "World"}}]}"#,
    )
    .unwrap();

    kestrel(&home)
        .arg("run")
        .arg(&plan)
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .success()
        .stdout(predicate::str::contains("Plan complete").and(predicate::str::contains("greet")));
}

#[test]
fn test_run_fails_on_missing_plan_file() {
    let home = TempDir::new().unwrap();
    kestrel(&home)
        .arg("run")
        .arg("no-such-plan.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot read plan file"));
}

#[test]
fn test_run_reports_failure_with_nonzero_exit() {
    let home = TempDir::new().unwrap();
    let manifest = home.path().join("tools.json");
    fs::write(
        &manifest,
        r#"{"tools": [{
            "name": "always_fails",
            "call_template": {"kind": "cli", "program": "sh", "args": ["-c", "exit 7"]}
        }]}"#,
    )
    .unwrap();

    let plan = home.path().join("plan.json");
    fs::write(
        &plan,
        r#"{"steps": [{"id": 1, "tool_name": "always_fails"}]}"#,
    )
    .unwrap();

    kestrel(&home)
        .arg("run")
        .arg(&plan)
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .failure()
        .stdout(predicate::str::contains("Plan aborted"));
}

#[test]
fn test_config_writes_default_file_on_first_use() {
    let home = TempDir::new().unwrap();
    kestrel(&home)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("Max concurrent steps: 4"));
    assert!(home.path().join(".kestrel").join("config.toml").exists());
}
