use std::path::{Path, PathBuf};
use std::process::Command;

use mcuload_contracts::{
    MCULOAD_ESTIMATE_REPORT_SCHEMA_VERSION, MCULOAD_LOAD_REPORT_SCHEMA_VERSION,
    MCULOAD_RESOLVE_REPORT_SCHEMA_VERSION,
};
use serde_json::Value;

const SCENARIO: &str = r#"{
  "schema_version": "mcuload.manifest@0.1.0",
  "entry_point": "App.C::.cctor()",
  "classes": [
    {
      "symbol": "App.C",
      "dynamic_size": 10,
      "static_size": 4,
      "static_ctor": "App.C::.cctor()",
      "members": [{"kind": "field", "symbol": "App.C::F", "initial_value": {"i32": 7}}]
    }
  ],
  "methods": [{"symbol": "App.C::.cctor()", "flags": ["static", "void"]}]
}"#;

fn run_mcuload(args: &[&str]) -> std::process::Output {
    let exe = env!("CARGO_BIN_EXE_mcuload");
    Command::new(exe)
        .args(args)
        .env_remove("MCULOAD_MEMORY_BUDGET")
        .env_remove("MCULOAD_DEVICE_CMD")
        .env_remove("RUST_LOG")
        .output()
        .expect("run mcuload")
}

fn parse_json_stdout(out: &std::process::Output) -> Value {
    serde_json::from_slice(&out.stdout).unwrap_or_else(|err| {
        panic!(
            "parse stdout JSON: {err}\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        )
    })
}

fn write_manifest(dir: &Path, json: &str) -> PathBuf {
    let path = dir.join("manifest.json");
    std::fs::write(&path, json).expect("write manifest");
    path
}

#[test]
fn estimate_reports_tokens_bytes_and_fingerprint() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = write_manifest(dir.path(), SCENARIO);

    let out = run_mcuload(&["estimate", "--manifest", manifest.to_str().unwrap()]);
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v = parse_json_stdout(&out);
    assert_eq!(v["schema_version"], MCULOAD_ESTIMATE_REPORT_SCHEMA_VERSION);
    assert_eq!(v["ok"], true);
    assert_eq!(v["classes"], 1);
    assert_eq!(v["methods"], 1);
    assert_eq!(v["method_ceiling"], 16383);
    assert_eq!(v["tokens"]["type"], 1);
    assert_eq!(v["tokens"]["method"], 1);
    assert_eq!(v["tokens"]["field"], 1);
    assert_eq!(v["estimated_bytes"], 44);
    assert_eq!(v["entry_point"]["symbol"], "App.C::.cctor()");
    assert_eq!(v["entry_point"]["declared"], true);

    let fp = v["fingerprint"].as_str().expect("fingerprint");
    assert!(fp.starts_with("sha256:"), "{fp}");
    assert_eq!(fp.len(), "sha256:".len() + 64);

    // Same input, same fingerprint.
    let again = parse_json_stdout(&run_mcuload(&[
        "estimate",
        "--manifest",
        manifest.to_str().unwrap(),
    ]));
    assert_eq!(again["fingerprint"], v["fingerprint"]);
}

#[test]
fn resolve_token_lists_every_space_and_fails_on_miss() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = write_manifest(dir.path(), SCENARIO);
    let manifest = manifest.to_str().unwrap();

    let out = run_mcuload(&["resolve-token", "--manifest", manifest, "--token", "1"]);
    assert_eq!(out.status.code(), Some(0));
    let v = parse_json_stdout(&out);
    assert_eq!(v["schema_version"], MCULOAD_RESOLVE_REPORT_SCHEMA_VERSION);
    let matches = v["matches"].as_array().expect("matches[]");
    let got: Vec<(&str, &str)> = matches
        .iter()
        .map(|m| {
            (
                m["space"].as_str().expect("space"),
                m["symbol"].as_str().expect("symbol"),
            )
        })
        .collect();
    assert_eq!(
        got,
        vec![
            ("type", "App.C"),
            ("method", "App.C::.cctor()"),
            ("field", "App.C::F")
        ]
    );

    let out = run_mcuload(&[
        "resolve-token",
        "--manifest",
        manifest,
        "--token",
        "1",
        "--space",
        "field",
    ]);
    assert_eq!(out.status.code(), Some(0));
    let v = parse_json_stdout(&out);
    assert_eq!(v["space"], "field");
    assert_eq!(v["matches"].as_array().expect("matches[]").len(), 1);

    let out = run_mcuload(&["resolve-token", "--manifest", manifest, "--token", "9"]);
    assert_eq!(out.status.code(), Some(1));
    let v = parse_json_stdout(&out);
    assert_eq!(v["ok"], false);
    assert!(v["matches"].as_array().expect("matches[]").is_empty());
}

#[test]
fn load_and_run_against_in_process_device() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = write_manifest(dir.path(), SCENARIO);

    let out = run_mcuload(&["load", "--manifest", manifest.to_str().unwrap(), "--run"]);
    assert_eq!(
        out.status.code(),
        Some(0),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v = parse_json_stdout(&out);
    assert_eq!(v["schema_version"], MCULOAD_LOAD_REPORT_SCHEMA_VERSION);
    assert_eq!(v["ok"], true);
    assert_eq!(v["device"], "in-process-sim");
    assert_eq!(v["state"], "ready");
    assert_eq!(v["handle"]["entry_point"], "App.C::.cctor()");
    assert_eq!(v["handle"]["token"], 1);
    assert_eq!(v["handle"]["device_handle"], 1);
    assert_eq!(v["completion_value"], 0);
    assert!(v.get("error").is_none());
}

#[test]
fn device_rejection_is_reported_with_the_symbol() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = write_manifest(dir.path(), SCENARIO);

    let out = run_mcuload(&[
        "load",
        "--manifest",
        manifest.to_str().unwrap(),
        "--sim-capacity",
        "30",
    ]);
    assert_eq!(out.status.code(), Some(1));
    let v = parse_json_stdout(&out);
    assert_eq!(v["ok"], false);
    assert_eq!(v["state"], "device-cleared");
    assert_eq!(v["error"]["kind"], "protocol");
    let msg = v["error"]["message"].as_str().expect("message");
    assert!(msg.contains("out of memory"), "{msg}");
    assert!(msg.contains("App.C"), "{msg}");
}

#[test]
fn budget_abort_stops_before_the_device_is_touched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = write_manifest(dir.path(), SCENARIO);
    let manifest = manifest.to_str().unwrap();

    let out = run_mcuload(&[
        "load",
        "--manifest",
        manifest,
        "--memory-budget",
        "40",
        "--over-budget",
        "abort",
    ]);
    assert_eq!(out.status.code(), Some(1));
    let v = parse_json_stdout(&out);
    assert_eq!(v["error"]["kind"], "capacity");
    assert_eq!(v["state"], "idle");
    assert_eq!(v["over_budget"], true);

    // The default policy only warns.
    let out = run_mcuload(&["load", "--manifest", manifest, "--memory-budget", "40"]);
    assert_eq!(out.status.code(), Some(0));
    let v = parse_json_stdout(&out);
    assert_eq!(v["over_budget"], true);
    assert_eq!(v["state"], "ready");
}

#[test]
fn budget_can_come_from_the_environment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = write_manifest(dir.path(), SCENARIO);

    let out = Command::new(env!("CARGO_BIN_EXE_mcuload"))
        .args([
            "load",
            "--manifest",
            manifest.to_str().unwrap(),
            "--over-budget",
            "abort",
        ])
        .env("MCULOAD_MEMORY_BUDGET", "43")
        .env_remove("MCULOAD_DEVICE_CMD")
        .output()
        .expect("run mcuload");
    assert_eq!(out.status.code(), Some(1));
    let v = parse_json_stdout(&out);
    assert_eq!(v["memory_budget"], 43);
    assert_eq!(v["error"]["kind"], "capacity");
}

#[test]
fn bad_manifests_and_device_commands_exit_2() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = write_manifest(
        dir.path(),
        r#"{"schema_version": "mcuload.manifest@9.9.9"}"#,
    );
    let out = run_mcuload(&["estimate", "--manifest", manifest.to_str().unwrap()]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("schema_version"));

    let manifest = write_manifest(dir.path(), SCENARIO);
    let missing = dir.path().join("no-such-device");
    let out = run_mcuload(&[
        "load",
        "--manifest",
        manifest.to_str().unwrap(),
        "--device-cmd",
        missing.to_str().unwrap(),
    ]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("spawn device command"));
}

#[test]
fn device_process_that_dies_still_yields_a_load_report() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = write_manifest(dir.path(), SCENARIO);

    let out = run_mcuload(&[
        "load",
        "--manifest",
        manifest.to_str().unwrap(),
        "--device-cmd",
        "false",
    ]);
    assert_eq!(
        out.status.code(),
        Some(1),
        "stderr:\n{}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v = parse_json_stdout(&out);
    assert_eq!(v["ok"], false);
    assert_eq!(v["device"], "false");
    assert_eq!(v["state"], "idle");
    assert_eq!(v["error"]["kind"], "protocol");
}
