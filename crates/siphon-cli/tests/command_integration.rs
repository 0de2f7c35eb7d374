//! End-to-end command tests against a temporary project directory.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const EVENTS: &str = r#"{"type":"OrderPlaced","stream":"orders-1","position":1,"data":{"total":12}}
{"type":"OrderPlaced","stream":"orders-2","position":1,"data":{"total":3}}
{"type":"Heartbeat","stream":"orders-1","position":2}
{"type":"OrderShipped","stream":"orders-1","position":3,"data":{"carrier":"ups"}}
"#;

const PROJECT: &str = r#"
[connector]
connector_id = "orders-to-search"

[target]
index_name = "orders"

[filter]
exclude_types = ["Heartbeat"]

[pipeline]
concurrency_limit = 2

[retry]
jitter = false
"#;

fn siphon(project: &Path) -> Command {
    let mut cmd = Command::cargo_bin("siphon").unwrap();
    cmd.env_remove("RUST_LOG")
        .env("XDG_CONFIG_HOME", project.join(".xdg"))
        .arg("--no-color");
    cmd
}

fn project() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("siphon.toml"), PROJECT).unwrap();
    fs::write(temp.path().join("events.jsonl"), EVENTS).unwrap();
    temp
}

fn operations(project: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(project.join("operations.jsonl"))
        .unwrap_or_default()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

#[test]
fn run_relays_events_and_records_checkpoints() {
    let temp = project();

    siphon(temp.path())
        .args(["run", "--no-user-config", "--project"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("3 produced"));

    let ops = operations(temp.path());
    assert_eq!(ops.len(), 3);
    assert!(ops.iter().all(|op| op["destination"] == "orders"));
    let shipped = ops
        .iter()
        .find(|op| op["document"]["messageType"] == "OrderShipped")
        .unwrap();
    assert_eq!(shipped["document"]["message"]["carrier"], "ups");
    assert_eq!(shipped["document"]["streamPosition"], 3);

    siphon(temp.path())
        .args(["checkpoints", "list", "--project"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("orders-1"))
        .stdout(predicate::str::contains("orders-2"))
        .stdout(predicate::str::contains("$subscription-orders-to-search"))
        .stdout(predicate::str::contains("(3 checkpoints)"));
}

#[test]
fn rerun_resumes_from_checkpoints() {
    let temp = project();
    for _ in 0..2 {
        siphon(temp.path())
            .args(["run", "--no-user-config", "--project"])
            .arg(temp.path())
            .assert()
            .success();
    }
    assert_eq!(operations(temp.path()).len(), 3);
}

#[test]
fn rewinding_a_checkpoint_replays_later_events() {
    let temp = project();
    siphon(temp.path())
        .args(["run", "--no-user-config", "--project"])
        .arg(temp.path())
        .assert()
        .success();

    siphon(temp.path())
        .args(["checkpoints", "set", "orders-1", "1", "--project"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("set to 1"))
        .stdout(predicate::str::contains("watermark reset"));

    siphon(temp.path())
        .args(["run", "--no-user-config", "--project"])
        .arg(temp.path())
        .assert()
        .success();

    // Heartbeat (2) is skipped again, OrderShipped (3) is produced a second time.
    assert_eq!(operations(temp.path()).len(), 4);
}

#[test]
fn rerun_starts_from_the_watermark() {
    let temp = project();
    siphon(temp.path())
        .args(["run", "--no-user-config", "--project"])
        .arg(temp.path())
        .assert()
        .success();

    // Only the last line is read again, and it is a redelivery.
    siphon(temp.path())
        .args(["run", "--no-user-config", "--project"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Relayed 1 event(s), 0 produced"));
}

#[test]
fn checkpoints_list_on_fresh_project() {
    let temp = project();
    siphon(temp.path())
        .args(["checkpoints", "list", "--project"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("No checkpoints"));
}

#[test]
fn malformed_source_fails_the_run() {
    let temp = project();
    fs::write(temp.path().join("events.jsonl"), "not json\n").unwrap();

    siphon(temp.path())
        .args(["run", "--no-user-config", "--project"])
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 1"));
}

#[test]
fn environment_overrides_project_config() {
    let temp = project();
    siphon(temp.path())
        .env("SIPHON_PIPELINE__CONCURRENCY_LIMIT", "7")
        .args(["config", "show", "--format", "json", "--project"])
        .arg(temp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("\"concurrency_limit\": 7"))
        .stdout(predicate::str::contains("orders-to-search"));
}

#[test]
fn config_validate_rejects_bad_values() {
    let temp = project();
    fs::write(
        temp.path().join("siphon.local.toml"),
        "[pipeline]\nconcurrency_limit = 0\n",
    )
    .unwrap();

    siphon(temp.path())
        .args(["config", "validate", "--project"])
        .arg(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("concurrency_limit"));
}
