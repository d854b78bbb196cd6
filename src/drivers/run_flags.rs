//! Rendering a stack configuration and job spec into `create` flags.

use crate::ValidatedOutput;
use crate::errors;
use crate::shell::{Flag, Flags, ShellArg, bash_escape};
use crate::stack::{Mount, StackConfiguration};

use super::{ExecSpec, JobSpec};

/// Shell used to interpret job commands when the stack has no entrypoint.
pub const COMMAND_SHELL: &str = "sh";

/// Runtime capabilities that change how flags are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Route every bind mount through `--volume ...:z`.
    pub selinux: bool,
    /// Emit `consistency=` on bind mounts.
    pub mount_consistency: bool,
}

fn valid_container_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphanumeric())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Check the combined run request before anything is created.
pub fn validate_job(configuration: &StackConfiguration, spec: &JobSpec) -> ValidatedOutput<()> {
    let mut problems = Vec::new();

    for mount in configuration.mounts() {
        if !mount.container_path().starts_with('/') {
            problems.push(format!(
                "mount destination '{}' is not an absolute path",
                mount.container_path()
            ));
        }
        match mount {
            Mount::Bind { host_path, .. } if host_path.is_empty() => {
                problems.push("bind mount has an empty host path".to_string());
            }
            Mount::Volume { volume_name, .. } if volume_name.is_empty() => {
                problems.push("volume mount has an empty volume name".to_string());
            }
            _ => {}
        }
    }
    for port in configuration.ports() {
        if port.host_port == 0 || port.container_port == 0 {
            problems.push(format!(
                "invalid port mapping {}:{}",
                port.host_port, port.container_port
            ));
        }
    }
    if let Some(wd) = configuration.config.working_directory.as_deref() {
        if !wd.starts_with('/') {
            problems.push(format!("working directory '{}' is not an absolute path", wd));
        }
    }
    if let Some(entrypoint) = configuration.config.entrypoint.as_ref() {
        if entrypoint.first().is_none_or(|e| e.is_empty()) {
            problems.push("entrypoint must name a program".to_string());
        }
    }
    if let Some(name) = spec.name.as_deref() {
        if !valid_container_name(name) {
            problems.push(format!("invalid job name '{}'", name));
        }
    }
    for (key, _) in &spec.labels {
        if key.is_empty() || key.contains('=') {
            problems.push(format!("invalid label key '{}'", key));
        }
    }

    if problems.is_empty() {
        ValidatedOutput::ok(())
    } else {
        ValidatedOutput::failed(errors::invalid_job(&problems.join("\n")))
    }
}

fn mount_value(mount: &Mount, options: RenderOptions) -> String {
    match mount {
        Mount::Bind {
            host_path,
            container_path,
            readonly,
            consistency,
            ..
        } => {
            let mut value = format!(
                "type=bind,source={},destination={}",
                bash_escape(host_path),
                bash_escape(container_path)
            );
            if *readonly {
                value.push_str(",readonly");
            }
            if options.mount_consistency {
                value.push_str(",consistency=");
                value.push_str(consistency.as_deref().unwrap_or("consistent"));
            }
            value
        }
        Mount::Volume {
            volume_name,
            container_path,
            readonly,
        } => {
            let mut value = format!(
                "type=volume,source={},destination={}",
                bash_escape(volume_name),
                bash_escape(container_path)
            );
            if *readonly {
                value.push_str(",readonly");
            }
            value
        }
        Mount::Tmpfs { container_path } => {
            format!("type=tmpfs,destination={}", bash_escape(container_path))
        }
    }
}

fn selinux_volume_value(host_path: &str, container_path: &str, readonly: bool) -> String {
    let mut value = format!("{}:{}:z", bash_escape(host_path), bash_escape(container_path));
    if readonly {
        value.push_str(",ro");
    }
    value
}

/// `--mount` and `--volume` flags for every mount.
pub fn mount_flags(mounts: &[Mount], options: RenderOptions) -> Flags {
    let mut standard = Vec::new();
    let mut relabeled = Vec::new();
    for mount in mounts {
        match mount {
            Mount::Bind {
                host_path,
                container_path,
                readonly,
                selinux,
                ..
            } if options.selinux || *selinux => {
                relabeled.push(selinux_volume_value(host_path, container_path, *readonly));
            }
            other => standard.push(mount_value(other, options)),
        }
    }
    let mut flags = Flags::new();
    if !standard.is_empty() {
        flags.push(Flag::values("mount", standard).raw());
    }
    if !relabeled.is_empty() {
        flags.push(Flag::values("volume", relabeled).raw());
    }
    flags
}

/// Flags for `create`, in a stable order.
pub fn create_flags(configuration: &StackConfiguration, spec: &JobSpec, options: RenderOptions) -> Flags {
    let config = &configuration.config;
    let mut flags = Flags::new()
        .value_opt(
            "entrypoint",
            config.entrypoint.as_ref().and_then(|e| e.first().cloned()),
        )
        .switch_if("rm", spec.remove)
        .switch_if("i", spec.interactive)
        .switch_if("t", spec.interactive)
        .value_opt("w", config.working_directory.clone())
        .value_opt("name", spec.name.clone());

    let ports: Vec<String> = configuration
        .ports()
        .iter()
        .map(|p| match p.address.as_deref() {
            Some(addr) => format!("{}:{}:{}", addr, p.host_port, p.container_port),
            None => format!("{}:{}", p.host_port, p.container_port),
        })
        .collect();
    if !ports.is_empty() {
        flags.push(Flag::values("p", ports).raw());
    }

    if let Some(env) = config.environment.as_ref().filter(|e| !e.is_empty()) {
        flags.push(Flag::values("env", env.iter().map(|(k, v)| format!("{}={}", k, v))));
    }

    flags.extend(mount_flags(configuration.mounts(), options));

    if let Some(resources) = config.resources.as_ref() {
        flags = flags
            .value_opt("cpus", resources.cpus.clone())
            .value_opt("memory", resources.memory.clone())
            .value_opt("memory-swap", resources.swap_memory.clone())
            .value_opt("gpus", resources.gpu.clone());
    }

    if !spec.labels.is_empty() {
        flags.push(Flag::values(
            "label",
            spec.labels.iter().map(|(k, v)| format!("{}={}", k, v)),
        ));
    }

    if let Some(extra) = config.flags.as_ref() {
        flags = flags
            .value_opt("network", extra.network.clone())
            .value_opt("mac-address", extra.mac_address.clone());
    }
    flags
}

/// Positional arguments for `create`: the image, any extra entrypoint words,
/// then the command. Without an entrypoint the command runs under `sh -c`.
pub fn create_args(configuration: &StackConfiguration, spec: &JobSpec) -> Vec<ShellArg> {
    let mut args = vec![ShellArg::from(configuration.image_name())];
    match configuration.config.entrypoint.as_ref() {
        Some(entrypoint) => {
            args.extend(entrypoint.iter().skip(1).map(ShellArg::from));
            if !spec.command.is_empty() {
                args.push(ShellArg::from(spec.command.as_str()));
            }
        }
        None if !spec.command.is_empty() => {
            args.push(ShellArg::from(COMMAND_SHELL));
            args.push(ShellArg::from("-c"));
            args.push(ShellArg::from(spec.command.as_str()));
        }
        None => {}
    }
    args
}

/// Flags for `exec`.
pub fn exec_flags(spec: &ExecSpec) -> Flags {
    Flags::new()
        .switch_if("i", spec.interactive)
        .switch_if("t", spec.interactive)
        .value_opt("w", spec.working_dir.clone())
        .switch_if("d", spec.detached)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::command_string;
    use crate::stack::{StackConfigFile, StackType};

    const DOCKER: RenderOptions = RenderOptions {
        selinux: false,
        mount_consistency: true,
    };

    fn configuration(yaml: &str) -> StackConfiguration {
        let mut cfg = StackConfiguration::new("/stacks/fedora", StackType::Dockerfile, "cjr");
        cfg.config = StackConfigFile::from_yaml(yaml).unwrap();
        cfg
    }

    #[test]
    fn test_create_flags_render_in_order() {
        let cfg = configuration(
            "working-directory: /root/proj\nports:\n- {hostPort: 8080, containerPort: 80}\nenvironment: {A: 'x y'}\nresources: {cpus: '2', swap-memory: 4g}\n",
        );
        let spec = JobSpec::new("make").label("runner", "cjr");
        let line = command_string("docker create", &create_flags(&cfg, &spec, DOCKER), &create_args(&cfg, &spec));
        assert_eq!(
            line,
            "docker create -i -t -w='/root/proj' -p=8080:80 --env='A=x y' --cpus='2' --memory-swap='4g' --label='runner=cjr' 'fedora:cjr' 'sh' '-c' 'make'"
        );
    }

    #[test]
    fn test_mount_flags_escape_paths_inside_value() {
        let mounts = vec![
            Mount::Bind {
                host_path: "/home/me/my proj".into(),
                container_path: "/proj".into(),
                readonly: true,
                consistency: Some("cached".into()),
                selinux: false,
            },
            Mount::volume("scratch", "/scratch"),
            Mount::Tmpfs {
                container_path: "/tmp".into(),
            },
        ];
        let line = command_string("docker create", &mount_flags(&mounts, DOCKER), &[]);
        assert_eq!(
            line,
            "docker create --mount=type=bind,source='/home/me/my proj',destination='/proj',readonly,consistency=cached \
             --mount=type=volume,source='scratch',destination='/scratch' --mount=type=tmpfs,destination='/tmp'"
        );
    }

    #[test]
    fn test_selinux_binds_use_volume_flag() {
        let mounts = vec![Mount::bind("/data", "/data"), Mount::volume("v", "/v")];
        let options = RenderOptions {
            selinux: true,
            mount_consistency: false,
        };
        let line = command_string("podman create", &mount_flags(&mounts, options), &[]);
        assert_eq!(
            line,
            "podman create --mount=type=volume,source='v',destination='/v' --volume='/data':'/data':z"
        );
    }

    #[test]
    fn test_entrypoint_splits_into_flag_and_args() {
        let cfg = configuration("entrypoint: [/bin/bash, -c]\n");
        let spec = JobSpec::new("echo hi");
        let flags = create_flags(&cfg, &spec, DOCKER);
        assert_eq!(flags.get("entrypoint").unwrap().flag_values(), ["/bin/bash"]);
        let line = command_string("docker create", &Flags::new(), &create_args(&cfg, &spec));
        assert_eq!(line, "docker create 'fedora:cjr' '-c' 'echo hi'");
    }

    #[test]
    fn test_empty_command_runs_image_default() {
        let cfg = configuration("");
        let line = command_string("docker create", &Flags::new(), &create_args(&cfg, &JobSpec::new("")));
        assert_eq!(line, "docker create 'fedora:cjr'");
    }

    #[test]
    fn test_validate_job_collects_problems() {
        let cfg = configuration(
            "working-directory: relative\nmounts:\n- {type: volume, volumeName: '', containerPath: data}\n",
        );
        let mut spec = JobSpec::new("ls");
        spec.name = Some("-bad".into());
        let out = validate_job(&cfg, &spec);
        assert!(!out.success);
        let message = &out.error[0];
        assert!(message.contains("not an absolute path"));
        assert!(message.contains("empty volume name"));
        assert!(message.contains("invalid job name"));

        assert!(validate_job(&configuration(""), &JobSpec::new("ls")).success);
    }

    #[test]
    fn test_exec_flags() {
        let spec = ExecSpec {
            interactive: true,
            detached: false,
            working_dir: Some("/root".into()),
        };
        let line = command_string("docker exec", &exec_flags(&spec), &[]);
        assert_eq!(line, "docker exec -i -t -w='/root'");
    }
}
