//! Shared E2E test helpers for `tagbot` binary tests.

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value as JsonValue;
use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for CLI tests.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Build a Command for the `tagbot` binary, run from a fresh project dir.
///
/// `TAGBOT_*` and `RUST_LOG` are cleared so the host environment cannot
/// leak into the config. Returns (command, guard); keep the guard alive
/// for the test's duration.
pub fn tagbot_cmd() -> (assert_cmd::Command, tempfile::TempDir) {
    let tmp = tempfile::tempdir().expect("create temp project dir");
    let mut cmd: assert_cmd::Command = cargo_bin_cmd!("tagbot");
    cmd.timeout(TIMEOUT);
    for var in ["TAGBOT_ENERGY", "TAGBOT_ENERGY_STEP", "TAGBOT_MAX_DEPTH", "RUST_LOG"] {
        cmd.env_remove(var);
    }
    cmd.args(["-C", tmp.path().to_str().expect("valid utf8")]);
    (cmd, tmp)
}

/// Writes `state` as `bots.json` under `dir` and returns its path.
pub fn write_state(dir: &tempfile::TempDir, state: &JsonValue) -> PathBuf {
    let path = dir.path().join("bots.json");
    std::fs::write(&path, state.to_string()).expect("write state file");
    path
}

/// Parses the JSON document printed on stdout.
pub fn stdout_json(output: &std::process::Output) -> JsonValue {
    serde_json::from_slice(&output.stdout).expect("stdout is JSON")
}

/// `type` of every printed event.
pub fn event_types(doc: &JsonValue) -> Vec<String> {
    doc["events"]
        .as_array()
        .expect("events array")
        .iter()
        .map(|event| event["type"].as_str().expect("event type").to_string())
        .collect()
}
