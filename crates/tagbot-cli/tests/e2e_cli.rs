//! E2E tests for the `tagbot` binary.
//!
//! Each test writes a bot snapshot into a temp project dir, runs a
//! subcommand, and inspects the JSON printed on stdout.

mod common;

use common::{event_types, stdout_json, tagbot_cmd, write_state};
use predicates::str::contains;
use serde_json::json;

fn counter_state() -> serde_json::Value {
    json!({
        "a": {"id": "a", "tags": {"#click": "@this.tags.count = (this.tags.count or 0) + 1; return this.tags.count"}},
        "b": {"id": "b", "tags": {"#click": "@return 'b'"}},
        "gone": null
    })
}

// ─── shout ─────────────────────────────────────────────────────────

#[test]
fn shout_prints_events_and_results() {
    let (mut cmd, dir) = tagbot_cmd();
    let state = write_state(&dir, &counter_state());

    let output = cmd
        .args(["shout", "--state"])
        .arg(&state)
        .arg("click")
        .output()
        .expect("run tagbot");

    assert!(output.status.success(), "{output:?}");
    let doc = stdout_json(&output);
    assert_eq!(doc["results"], json!([1, "b"]));
    assert_eq!(event_types(&doc), vec!["update_bot"]);
    assert_eq!(doc["events"][0]["bot_id"], json!("a"));
    assert_eq!(doc["listeners"], json!(["a", "b"]));
}

#[test]
fn shout_passes_argument_and_targets() {
    let (mut cmd, dir) = tagbot_cmd();
    let state = write_state(
        &dir,
        &json!({
            "a": {"id": "a", "tags": {"#add": "@return this.id .. (that.n + 1)"}},
            "b": {"id": "b", "tags": {"#add": "@return this.id .. (that.n + 1)"}},
            "c": {"id": "c", "tags": {"#add": "@return this.id .. (that.n + 1)"}}
        }),
    );

    let output = cmd
        .args(["shout", "--state"])
        .arg(&state)
        .args(["add", "--arg", r#"{"n": 1}"#, "--bot", "c", "--bot", "a", "--no-sort"])
        .output()
        .expect("run tagbot");

    assert!(output.status.success(), "{output:?}");
    assert_eq!(stdout_json(&output)["results"], json!(["c2", "a2"]));
}

#[test]
fn shout_drops_rejected_actions() {
    let (mut cmd, dir) = tagbot_cmd();
    let state = write_state(
        &dir,
        &json!({
            "a": {"id": "a", "tags": {"#go": "@local t = toast('hidden'); reject(t); toast('shown')"}}
        }),
    );

    let output = cmd
        .args(["shout", "--state"])
        .arg(&state)
        .arg("go")
        .output()
        .expect("run tagbot");

    assert!(output.status.success(), "{output:?}");
    let doc = stdout_json(&output);
    assert_eq!(event_types(&doc), vec!["toast"]);
    assert_eq!(doc["events"][0]["message"], json!("shown"));
}

#[test]
fn shout_apply_writes_updated_state() {
    let (mut cmd, dir) = tagbot_cmd();
    let state = write_state(&dir, &counter_state());
    let out = dir.path().join("after.json");

    cmd.args(["shout", "--state"])
        .arg(&state)
        .arg("click")
        .arg("--apply")
        .arg(&out)
        .assert()
        .success();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&out).expect("read applied state"))
            .expect("applied state is JSON");
    assert_eq!(written["a"]["tags"]["count"], json!(1));
    assert_eq!(written["gone"], json!(null));
}

#[test]
fn get_user_sees_the_user_flag() {
    let (mut cmd, dir) = tagbot_cmd();
    let state = write_state(
        &dir,
        &json!({
            "me": {"id": "me", "tags": {"name": "ada"}},
            "a": {"id": "a", "tags": {"#hi": "@local u = getUser(); return u and u.tags.name"}}
        }),
    );

    let output = cmd
        .args(["shout", "--state"])
        .arg(&state)
        .args(["hi", "--user", "me"])
        .output()
        .expect("run tagbot");

    assert!(output.status.success(), "{output:?}");
    assert_eq!(stdout_json(&output)["results"], json!(["ada"]));
}

// ─── destroy ───────────────────────────────────────────────────────

#[test]
fn destroy_prints_cascade() {
    let (mut cmd, dir) = tagbot_cmd();
    let state = write_state(
        &dir,
        &json!({
            "root": {"id": "root", "tags": {}},
            "kid": {"id": "kid", "tags": {"creator": "root"}},
            "other": {"id": "other", "tags": {}}
        }),
    );

    let output = cmd
        .args(["destroy", "--state"])
        .arg(&state)
        .arg("root")
        .output()
        .expect("run tagbot");

    assert!(output.status.success(), "{output:?}");
    let doc = stdout_json(&output);
    assert_eq!(event_types(&doc), vec!["remove_bot", "remove_bot"]);
    assert_eq!(doc["events"][0]["bot_id"], json!("root"));
    assert_eq!(doc["events"][1]["bot_id"], json!("kid"));
}

#[test]
fn destroy_of_unknown_bot_is_empty() {
    let (mut cmd, dir) = tagbot_cmd();
    let state = write_state(&dir, &counter_state());

    let output = cmd
        .args(["destroy", "--state"])
        .arg(&state)
        .arg("nobody")
        .output()
        .expect("run tagbot");

    assert!(output.status.success(), "{output:?}");
    assert_eq!(stdout_json(&output)["events"], json!([]));
}

// ─── Config ────────────────────────────────────────────────────────

#[test]
fn project_config_sets_energy_budget() {
    let (mut cmd, dir) = tagbot_cmd();
    std::fs::write(dir.path().join("tagbot.toml"), "[energy]\nbudget = 500\n")
        .expect("write config");
    let state = write_state(
        &dir,
        &json!({"a": {"id": "a", "tags": {"#spin": "@while true do end"}}}),
    );

    cmd.args(["shout", "--state"])
        .arg(&state)
        .arg("spin")
        .assert()
        .failure()
        .stderr(contains("energy"));
}

#[test]
fn energy_flag_overrides_config() {
    let (mut cmd, dir) = tagbot_cmd();
    let state = write_state(
        &dir,
        &json!({"a": {"id": "a", "tags": {"#spin": "@while true do end"}}}),
    );

    cmd.args(["--energy", "200", "shout", "--state"])
        .arg(&state)
        .arg("spin")
        .assert()
        .failure()
        .stderr(contains("energy"));
}

// ─── Errors ────────────────────────────────────────────────────────

#[test]
fn missing_state_file_fails() {
    let (mut cmd, dir) = tagbot_cmd();
    cmd.args(["shout", "--state"])
        .arg(dir.path().join("missing.json"))
        .arg("click")
        .assert()
        .failure()
        .stderr(contains("cannot read state file"));
}

#[test]
fn invalid_argument_json_fails() {
    let (mut cmd, dir) = tagbot_cmd();
    let state = write_state(&dir, &counter_state());
    cmd.args(["shout", "--state"])
        .arg(&state)
        .args(["click", "--arg", "{not json"])
        .assert()
        .failure()
        .stderr(contains("--arg is not valid JSON"));
}

#[test]
fn script_error_names_the_bot() {
    let (mut cmd, dir) = tagbot_cmd();
    let state = write_state(
        &dir,
        &json!({"broken": {"id": "broken", "tags": {"#go": "@error('kaput')"}}}),
    );
    cmd.args(["shout", "--state"])
        .arg(&state)
        .arg("go")
        .assert()
        .failure()
        .stderr(contains("broken"))
        .stderr(contains("kaput"));
}

#[test]
fn version_flag() {
    let (mut cmd, _dir) = tagbot_cmd();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}
