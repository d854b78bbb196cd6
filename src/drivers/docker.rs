//! Docker CLI runtime.

use serde_json::Value;

use super::cli::{ContainerCli, Runtime};
use crate::ValidatedOutput;
use crate::shell::{Flag, parse_line_json};

/// `docker`: list commands emit one JSON object per line.
#[derive(Debug, Clone, Copy)]
pub struct Docker;

pub type DockerDriver = ContainerCli<Docker>;

impl Runtime for Docker {
    const COMMAND: &'static str = "docker";
    const MOUNT_CONSISTENCY: bool = true;

    fn json_format() -> Flag {
        Flag::value("format", "{{json .}}")
    }

    fn parse_list(raw: &str) -> ValidatedOutput<Vec<Value>> {
        parse_line_json(raw)
    }

    /// Docker's reference filter is already an exact match.
    fn image_listed(_image: &str, entries: &[Value]) -> bool {
        !entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::{
        BuildDriver, BuildMode, BuildOptions, DriverOptions, ExecMode, ExecSpec, JobHooks, JobSpec,
        JobState, RunDriver, build_and_load,
    };
    use crate::errors;
    use crate::shell::ProcessOutput;
    use crate::stack::{StackConfiguration, StackType};
    use crate::test_utils::{ScriptedExecutor, scripted_shell};
    use std::cell::RefCell;
    use std::fs;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn driver(exec: &Arc<ScriptedExecutor>) -> DockerDriver {
        DockerDriver::new(
            scripted_shell(exec),
            DriverOptions {
                image_tag: "cjr".into(),
                selinux: false,
            },
        )
    }

    fn dockerfile_stack() -> (TempDir, String) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("fedora");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("Dockerfile"), "FROM fedora").unwrap();
        let path = dir.to_string_lossy().into_owned();
        (tmp, path)
    }

    #[test]
    fn test_build_is_idempotent_once_image_exists() {
        let exec = ScriptedExecutor::new();
        exec.on_sequence(
            "docker images",
            vec![
                ProcessOutput::success(""),
                ProcessOutput::success("{\"Repository\":\"fedora\",\"Tag\":\"cjr\"}\n"),
            ],
        );
        let (_tmp, stack) = dockerfile_stack();
        let d = driver(&exec);
        let opts = BuildOptions::default();

        let first = build_and_load(&d, &opts, &stack, &[]);
        assert!(first.success, "{:?}", first.error);
        assert_eq!(first.value.stack_type(), StackType::Dockerfile);
        let second = build_and_load(&d, &opts, &stack, &[]);
        assert!(second.success);

        assert_eq!(exec.calls_matching("docker build").len(), 1);
        let build = &exec.calls_matching("docker build")[0];
        assert!(build.contains("-t='fedora:cjr'"));
        assert!(build.contains(&format!("--label='stack-path={}'", stack)));
        assert!(build.contains("--label='builder=cjr'"));
        assert!(build.ends_with(" '.'"));
    }

    #[test]
    fn test_no_cache_always_rebuilds() {
        let exec = ScriptedExecutor::new();
        exec.on("docker images", "{\"Repository\":\"fedora\"}\n");
        let (_tmp, stack) = dockerfile_stack();
        let d = driver(&exec);
        let opts = BuildOptions {
            mode: BuildMode::NoCache,
            pull: true,
        };
        assert!(build_and_load(&d, &opts, &stack, &[]).success);
        let build = &exec.calls_matching("docker build")[0];
        assert!(build.contains("--no-cache"));
        assert!(build.contains("--pull"));
    }

    #[test]
    fn test_build_failure_reports_failed_to_build() {
        let exec = ScriptedExecutor::new();
        exec.fail("docker build", "");
        let (_tmp, stack) = dockerfile_stack();
        let out = build_and_load(&driver(&exec), &BuildOptions::default(), &stack, &[]);
        assert!(!out.success);
        assert!(out.error.contains(&errors::failed_to_build(&stack)));
    }

    #[test]
    fn test_validate_rejects_bad_name_and_empty_stack() {
        let tmp = TempDir::new().unwrap();
        let bad = tmp.path().join("bad name");
        fs::create_dir_all(&bad).unwrap();
        let exec = ScriptedExecutor::new();
        let d = driver(&exec);
        let bad_path = bad.to_string_lossy().into_owned();
        let rejected = d.validate(&bad_path, &[]);
        assert_eq!(rejected.error, vec![errors::invalid_stack_name(&bad_path)]);
        assert_eq!(rejected.value.stack_path(), bad_path);

        let empty = tmp.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        let empty_path = empty.to_string_lossy().into_owned();
        assert_eq!(
            d.validate(&empty_path, &[]).error,
            vec![errors::missing_dockerfile_or_image(&empty_path)]
        );
    }

    #[test]
    fn test_validate_pulls_missing_remote_image() {
        let exec = ScriptedExecutor::new();
        exec.fail("docker pull", "not found");
        let out = driver(&exec).validate("nosuch/image:1", &[]);
        assert!(!out.success);
        assert_eq!(out.error, vec![errors::missing_stack_dir("nosuch/image:1")]);
        assert_eq!(out.value.stack_type(), StackType::RemoteImage);
        assert_eq!(exec.calls_matching("docker pull"), vec!["docker pull 'nosuch/image:1'"]);
    }

    #[test]
    fn test_archive_load_retags_image() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("saved");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("image.tar.gz"), "").unwrap();
        let exec = ScriptedExecutor::new();
        exec.on("docker load", "Loaded image: upstream/thing:1.0\n");
        let out = build_and_load(&driver(&exec), &BuildOptions::default(), dir.to_str().unwrap(), &[]);
        assert!(out.success, "{:?}", out.error);
        assert_eq!(
            exec.calls_matching("docker tag"),
            vec!["docker tag 'upstream/thing:1.0' 'saved:cjr'"]
        );
    }

    #[test]
    fn test_archive_without_name_fails() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("saved");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("image.tar"), "").unwrap();
        let exec = ScriptedExecutor::new();
        exec.on("docker load", "nothing useful");
        let out = build_and_load(&driver(&exec), &BuildOptions::default(), dir.to_str().unwrap(), &[]);
        assert_eq!(out.error, vec![errors::failed_to_extract_image_name("image.tar")]);
    }

    #[test]
    fn test_remove_image_warns_when_missing() {
        let exec = ScriptedExecutor::new();
        let cfg = StackConfiguration::new("/s/fedora", StackType::Dockerfile, "cjr");
        let out = driver(&exec).remove_image(&cfg);
        assert!(out.success);
        assert_eq!(out.warning, vec![errors::no_such_image("fedora:cjr")]);
        assert!(exec.calls_matching("docker rmi").is_empty());
    }

    #[test]
    fn test_remove_all_images_uses_labels() {
        let exec = ScriptedExecutor::new();
        exec.on("docker images", "aaa\nbbb\naaa\n");
        let out = driver(&exec).remove_all_images("/s/fedora");
        assert!(out.success);
        assert_eq!(
            exec.calls()[0],
            "docker images -q --filter='label=stack-path=/s/fedora' --filter='label=builder=cjr'"
        );
        assert_eq!(exec.calls_matching("docker rmi"), vec!["docker rmi 'aaa' 'bbb'"]);
    }

    #[test]
    fn test_job_start_runs_hooks_in_order() {
        let exec = ScriptedExecutor::new();
        exec.on("docker create", "c0ffee\n");
        let d = driver(&exec);
        let cfg = StackConfiguration::new("/s/fedora", StackType::Dockerfile, "cjr");
        let seen = RefCell::new(Vec::new());
        let hooks = JobHooks {
            post_create: Some(Box::new(|id: &str| {
                seen.borrow_mut().push(format!("created {}", id));
                crate::ValidatedOutput::ok(())
            })),
            post_exec: Some(Box::new(|result: &crate::ValidatedOutput<String>| {
                seen.borrow_mut().push(format!("started {}", result.value));
            })),
        };
        let mut spec = JobSpec::new("make test");
        spec.synchronous = false;
        let out = d.job_start(&cfg, &spec, hooks);

        assert!(out.success);
        assert_eq!(out.value, "c0ffee");
        assert_eq!(*seen.borrow(), vec!["created c0ffee", "started c0ffee"]);
        let create = &exec.calls_matching("docker create")[0];
        assert!(create.contains("--label='runner=cjr'"));
        assert_eq!(exec.calls_matching("docker start"), vec!["docker start 'c0ffee'"]);
    }

    #[test]
    fn test_job_start_sync_attaches() {
        let exec = ScriptedExecutor::new();
        exec.on("docker create", "abc");
        let cfg = StackConfiguration::new("/s/fedora", StackType::Dockerfile, "cjr");
        let out = driver(&exec).job_start(&cfg, &JobSpec::new("ls"), JobHooks::default());
        assert!(out.success);
        assert_eq!(
            exec.calls_matching("docker start"),
            vec!["docker start --attach --interactive 'abc'"]
        );
    }

    #[test]
    fn test_job_start_empty_create_id() {
        let exec = ScriptedExecutor::new();
        let cfg = StackConfiguration::new("/s/fedora", StackType::Dockerfile, "cjr");
        let out = driver(&exec).job_start(&cfg, &JobSpec::new("ls"), JobHooks::default());
        assert_eq!(out.error, vec![errors::empty_create_id()]);
        assert!(exec.calls_matching("docker start").is_empty());
    }

    #[test]
    fn test_job_info_joins_ps_and_inspect() {
        let exec = ScriptedExecutor::new();
        exec.on(
            "docker ps",
            "{\"ID\":\"abc\",\"Names\":\"n1\",\"Command\":\"\\\"sleep 1\\\"\",\"Status\":\"Exited (0) 1 minute ago\"}\n",
        );
        exec.on(
            "docker inspect",
            "{\"ID\":\"abc\",\"PortBindings\":{\"80/tcp\":[{\"HostPort\":\"8080\"}]},\"Labels\":{\"stack-path\":\"/s/fedora\",\"runner\":\"cjr\"}}\n",
        );
        let out = driver(&exec).job_info(&["/s/fedora".to_string()], &[JobState::Exited]);
        assert!(out.success, "{:?}", out.error);
        assert_eq!(out.value.len(), 1);
        let job = &out.value[0];
        assert_eq!(job.status, JobState::Exited);
        assert_eq!(job.command, "sleep 1");
        assert_eq!(job.stack, "/s/fedora");
        assert_eq!(job.host_port_bindings, vec![8080]);
        assert_eq!(
            exec.calls_matching("docker ps")[0],
            "docker ps -a --no-trunc --filter='label=runner=cjr' --filter='label=stack-path=/s/fedora' --filter='status=exited' --format='{{json .}}'"
        );
    }

    #[test]
    fn test_job_info_cross_product_of_filters() {
        let exec = ScriptedExecutor::new();
        let stacks = vec!["/s/a".to_string(), "/s/b".to_string()];
        let out = driver(&exec).job_info(&stacks, &[JobState::Running, JobState::Created]);
        assert!(out.success);
        assert_eq!(exec.calls_matching("docker ps").len(), 4);
        assert!(exec.calls_matching("docker inspect").is_empty());
    }

    #[test]
    fn test_stop_and_delete_skip_empty_lists() {
        let exec = ScriptedExecutor::new();
        let d = driver(&exec);
        assert!(d.job_stop(&[]).success);
        assert!(d.job_delete(&[]).success);
        assert!(exec.calls().is_empty());

        assert!(d.job_delete(&["a".to_string(), "b".to_string()]).success);
        assert_eq!(exec.calls(), vec!["docker stop 'a' 'b'", "docker rm 'a' 'b'"]);
    }

    #[test]
    fn test_job_log_tail_only_for_numbers() {
        let exec = ScriptedExecutor::new();
        let d = driver(&exec);
        d.job_log("abc", Some("20"));
        d.job_log("abc", Some("all"));
        assert_eq!(exec.calls(), vec!["docker logs --tail='20' 'abc'", "docker logs 'abc'"]);
    }

    #[test]
    fn test_job_exec_modes() {
        let exec = ScriptedExecutor::new();
        exec.on("docker exec", "{\"ok\":true}");
        let d = driver(&exec);
        let cmd = vec!["cat".to_string(), "out.json".to_string()];
        let json = d.job_exec("abc", &cmd, &ExecSpec::default(), ExecMode::Json);
        assert_eq!(json.value, serde_json::json!({"ok": true}));
        let text = d.job_exec("abc", &cmd, &ExecSpec::default(), ExecMode::Output);
        assert_eq!(text.value, serde_json::json!("{\"ok\":true}"));
        assert_eq!(exec.calls()[0], "docker exec 'abc' 'cat' 'out.json'");
    }

    #[test]
    fn test_volume_create_requires_name() {
        let exec = ScriptedExecutor::new();
        let d = driver(&exec);
        let out = d.volume_create(&[("runner".into(), "cjr".into())]);
        assert_eq!(out.error, vec![errors::failed_create_volume()]);

        exec.on("docker volume create", "vol123\n");
        let out = d.volume_create(&[]);
        assert!(out.success);
        assert_eq!(out.value, "vol123");
    }
}
