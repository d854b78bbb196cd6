//! Integration tests for `cjr config`.

mod common;

use common::TestEnv;
use predicates::prelude::*;

#[test]
fn test_config_get_default() {
    let env = TestEnv::new();
    env.cjr()
        .args(["config", "get", "file-access"])
        .assert()
        .success()
        .stdout("bind\n");
}

#[test]
fn test_config_set_then_get() {
    let env = TestEnv::new();
    env.cjr()
        .args(["config", "set", "job-default-run-mode", "async"])
        .assert()
        .success();
    env.cjr()
        .args(["config", "get", "job-default-run-mode"])
        .assert()
        .success()
        .stdout("async\n");

    let stored = std::fs::read_to_string(env.config_path().join("settings.kdl")).unwrap();
    assert!(stored.contains("job-default-run-mode"));
    assert!(stored.contains("interactive"));
}

#[test]
fn test_config_set_rejects_bad_value() {
    let env = TestEnv::new();
    env.cjr()
        .args(["config", "set", "selinux", "maybe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("selinux"));
}

#[test]
fn test_config_get_unknown_key_lists_keys() {
    let env = TestEnv::new();
    env.cjr()
        .args(["config", "get", "colour"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("known settings"))
        .stderr(predicate::str::contains("stacks-dir"));
}

#[test]
fn test_config_ls_json() {
    let env = TestEnv::new();
    let output = env.cjr().args(["--json", "config", "ls"]).output().unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let settings = parsed["settings"].as_array().unwrap();
    let interactive = settings.iter().find(|e| e["key"] == "interactive").unwrap();
    assert_eq!(interactive["value"], "false");
    assert!(settings.iter().any(|e| e["key"] == "container-default-shell" && e["value"] == "bash"));
}

#[test]
fn test_config_ls_marks_defaults() {
    let env = TestEnv::new();
    env.cjr()
        .args(["config", "ls"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(default)"))
        .stdout(predicate::str::is_match(r"(?m)^interactive\s+false$").unwrap());
}

#[test]
fn test_config_jupyter_command_is_checked() {
    let env = TestEnv::new();
    env.cjr()
        .args(["config", "get", "jupyter-command"])
        .assert()
        .success()
        .stdout("jupyter lab\n");
    env.cjr()
        .args(["config", "set", "jupyter-command", "jupyter console"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("jupyter-command"));
}
