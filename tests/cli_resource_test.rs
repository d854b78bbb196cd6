//! Integration tests for `cjr resource` and resource selection by `cjr rjob`.

mod common;

use common::TestEnv;
use predicates::prelude::*;

fn add_gpu(env: &TestEnv) {
    env.cjr()
        .args([
            "resource",
            "add",
            "gpu",
            "--address",
            "10.0.0.5",
            "--username",
            "ops",
            "--storage-dir",
            "/scratch",
        ])
        .assert()
        .success();
}

#[test]
fn test_resource_add_and_list() {
    let env = TestEnv::new();
    add_gpu(&env);
    env.cjr()
        .args(["resource", "ls"])
        .assert()
        .success()
        .stdout(predicate::str::contains("gpu: ops@10.0.0.5 storage=/scratch"));

    let output = env.cjr().args(["--json", "resource", "ls"]).output().unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let first = &parsed["resources"][0];
    assert_eq!(first["name"], "gpu");
    assert_eq!(first["storage-dir"], "/scratch");
    assert_eq!(first["enabled"], true);
}

#[test]
fn test_resource_add_twice_warns() {
    let env = TestEnv::new();
    add_gpu(&env);
    env.cjr()
        .args([
            "resource",
            "add",
            "gpu",
            "--address",
            "10.0.0.6",
            "--username",
            "ops",
            "--storage-dir",
            "/scratch",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("cjr: warning: Replacing resource 'gpu'."));
}

#[test]
fn test_resource_set_and_remove() {
    let env = TestEnv::new();
    add_gpu(&env);
    env.cjr()
        .args(["resource", "set", "gpu", "enabled", "false"])
        .assert()
        .success();
    env.cjr()
        .args(["resource", "ls"])
        .assert()
        .success()
        .stdout(predicate::str::contains("(disabled)"));

    env.cjr().args(["resource", "rm", "gpu"]).assert().success();
    env.cjr()
        .args(["resource", "ls"])
        .assert()
        .success()
        .stdout("No resources.\n");
    env.cjr()
        .args(["resource", "rm", "gpu"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No resource named 'gpu'."));
}

#[test]
fn test_rjob_without_resources_fails() {
    let env = TestEnv::new();
    env.cjr()
        .args(["rjob", "ls"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No remote resource is configured"));
}

#[test]
fn test_rjob_disabled_resource_fails() {
    let env = TestEnv::new();
    add_gpu(&env);
    env.cjr()
        .args(["resource", "set", "gpu", "enabled", "false"])
        .assert()
        .success();
    env.cjr()
        .args(["rjob", "state", "--resource", "gpu", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Resource 'gpu' is disabled."));
}

#[test]
fn test_rjob_unknown_resource_fails() {
    let env = TestEnv::new();
    add_gpu(&env);
    env.cjr()
        .args(["rjob", "ls", "--resource", "cpu"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No resource named 'cpu'."));
}
