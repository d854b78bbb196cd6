//! Build and run drivers backed by a container runtime command line.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use super::jobs::{self, InspectEntry, JobInfo, JobState, PsEntry};
use super::run_flags::{self, RenderOptions};
use super::{
    BuildDriver, BuildOptions, DriverOptions, ExecMode, ExecSpec, JobHooks, JobSpec, RunDriver,
    labels,
};
use crate::shell::{ExecOptions, Flag, Flags, ShellArg, ShellCommand, StdioMode, args};
use crate::stack::{ARCHIVE_BASENAME, StackConfiguration, StackType, stack_basename};
use crate::{CLI_NAME, ValidatedOutput, errors};

/// Runtime-specific details of a container command line.
pub trait Runtime {
    /// Base command, e.g. `docker`.
    const COMMAND: &'static str;
    /// Whether `--mount type=bind` accepts `consistency=`.
    const MOUNT_CONSISTENCY: bool;

    /// Flag asking list commands (`ps`, `images`) for JSON output.
    fn json_format() -> Flag;

    /// Parse the output of a list command requested with [`Runtime::json_format`].
    fn parse_list(raw: &str) -> ValidatedOutput<Vec<Value>>;

    /// True if the `images --filter reference=` result really contains `image`.
    fn image_listed(image: &str, entries: &[Value]) -> bool;

    /// Additional `create` flags only this runtime understands.
    fn runtime_flags(_configuration: &StackConfiguration) -> Flags {
        Flags::new()
    }
}

/// Stack directory names accepted for local stacks.
fn valid_stack_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

/// Build and run driver for runtime `R`.
pub struct ContainerCli<R: Runtime> {
    shell: ShellCommand,
    options: DriverOptions,
    runtime: PhantomData<R>,
}

impl<R: Runtime> ContainerCli<R> {
    pub fn new(shell: ShellCommand, options: DriverOptions) -> Self {
        Self {
            shell,
            options,
            runtime: PhantomData,
        }
    }

    fn command(&self, sub: &str) -> String {
        format!("{} {}", R::COMMAND, sub)
    }

    fn render_options(&self) -> RenderOptions {
        RenderOptions {
            selinux: self.options.selinux,
            mount_consistency: R::MOUNT_CONSISTENCY,
        }
    }

    fn piped() -> ExecOptions {
        ExecOptions::new().stdio(StdioMode::Pipe)
    }

    /// Run a list command with JSON output.
    fn list(&self, sub: &str, flags: Flags, positional: &[ShellArg]) -> ValidatedOutput<Vec<Value>> {
        let flags = flags.with(R::json_format());
        self.shell
            .output(&self.command(sub), &flags, positional, &ExecOptions::new())
            .and_then(|raw| R::parse_list(&raw))
    }

    fn pull(&self, image: &str) -> ValidatedOutput<()> {
        self.shell
            .exec(&self.command("pull"), &Flags::new(), &args([image]), &ExecOptions::new())
            .map(|_| ())
    }

    fn build_dockerfile(&self, configuration: &StackConfiguration, no_cache: bool, pull: bool) -> ValidatedOutput<()> {
        let Some(dir) = configuration.stack_dir() else {
            return ValidatedOutput::failed(errors::failed_to_build(configuration.stack_path()));
        };
        let mut flags = Flags::new()
            .value("t", configuration.image_name())
            .value("f", configuration.dockerfile());
        let build_args = configuration.build_args();
        if !build_args.is_empty() {
            flags.push(Flag::values(
                "build-arg",
                build_args.iter().map(|(k, v)| format!("{}={}", k, v)),
            ));
        }
        let mut image_labels = vec![
            format!("{}={}", labels::STACK_PATH, configuration.stack_path()),
            format!("{}={}", labels::BUILDER, CLI_NAME),
        ];
        image_labels.extend(
            configuration
                .build_labels()
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v)),
        );
        flags.push(Flag::values("label", image_labels));
        let flags = flags.switch_if("no-cache", no_cache).switch_if("pull", pull);

        let mut result = self
            .shell
            .exec(
                &self.command("build"),
                &flags,
                &args([configuration.build_context()]),
                &ExecOptions::new().cwd(dir),
            )
            .map(|_| ());
        if !result.success {
            result.push_error(errors::failed_to_build(configuration.stack_path()));
        }
        result
    }

    fn load_archive(&self, configuration: &StackConfiguration, extension: &str) -> ValidatedOutput<()> {
        let archive = format!("{}.{}", ARCHIVE_BASENAME, extension);
        let Some(dir) = configuration.stack_dir() else {
            return ValidatedOutput::failed(errors::failed_to_build(configuration.stack_path()));
        };
        let load = self.shell.output_trimmed(
            &self.command("load"),
            &Flags::new().value("input", archive.as_str()).switch("q"),
            &[],
            &ExecOptions::new().cwd(dir),
        );
        if !load.success {
            let mut result = load.with_value(());
            result.push_error(errors::failed_to_build(configuration.stack_path()));
            return result;
        }
        // `Loaded image: name:tag`; everything after the first colon.
        let loaded = load
            .value
            .split_once(':')
            .map(|(_, rest)| rest.trim().to_string())
            .filter(|name| !name.is_empty());
        let Some(loaded) = loaded else {
            return ValidatedOutput::failed(errors::failed_to_extract_image_name(&archive));
        };
        debug!(loaded = %loaded, image = %configuration.image_name(), "retagging loaded image");
        self.shell
            .exec(
                &self.command("tag"),
                &Flags::new(),
                &args([loaded, configuration.image_name()]),
                &Self::piped(),
            )
            .map(|_| ())
    }

    fn ps_entries(&self, stack_path: Option<&str>, state: Option<JobState>) -> ValidatedOutput<Vec<PsEntry>> {
        let mut filters = vec![format!("label={}={}", labels::RUNNER, CLI_NAME)];
        if let Some(path) = stack_path {
            filters.push(format!("label={}={}", labels::STACK_PATH, path));
        }
        if let Some(status) = state.and_then(|s| s.filter_value()) {
            filters.push(format!("status={}", status));
        }
        let flags = Flags::new()
            .switch("a")
            .switch("no-trunc")
            .with(Flag::values("filter", filters));
        self.list("ps", flags, &[])
            .map(|values| values.iter().filter_map(jobs::normalize_ps_entry).collect())
    }

    fn inspect(&self, ids: &[String]) -> ValidatedOutput<HashMap<String, InspectEntry>> {
        if ids.is_empty() {
            return ValidatedOutput::ok(HashMap::new());
        }
        self.shell
            .output_line_json(
                &self.command("inspect"),
                &Flags::new().value("format", jobs::INSPECT_FORMAT),
                &args(ids),
                &ExecOptions::new(),
            )
            .map(|values| jobs::parse_inspect(&values))
    }

    /// Run a batch command over `ids`; empty lists do nothing.
    fn batch(&self, sub: &str, ids: &[String]) -> ValidatedOutput<()> {
        if ids.is_empty() {
            return ValidatedOutput::ok(());
        }
        self.shell
            .exec(&self.command(sub), &Flags::new(), &args(ids), &Self::piped())
            .map(|_| ())
    }
}

impl<R: Runtime> BuildDriver for ContainerCli<R> {
    fn validate(&self, stack_path: &str, overrides: &[PathBuf]) -> ValidatedOutput<StackConfiguration> {
        let tag = self.options.image_tag.as_str();
        let dir = Path::new(stack_path);
        if dir.is_dir() {
            if !valid_stack_name(&stack_basename(stack_path)) {
                return ValidatedOutput::failure(
                    StackConfiguration::new(stack_path, StackType::Dockerfile, tag),
                    errors::invalid_stack_name(stack_path),
                );
            }
            return StackConfiguration::open(stack_path, overrides, tag);
        }

        let remote = StackConfiguration::new(stack_path, StackType::RemoteImage, tag);
        if !self.is_built(&remote) && !self.pull(stack_path).success {
            return ValidatedOutput::failure(remote, errors::missing_stack_dir(stack_path));
        }
        StackConfiguration::load(stack_path, StackType::RemoteImage, overrides, tag)
    }

    fn is_built(&self, configuration: &StackConfiguration) -> bool {
        let image = configuration.image_name();
        if image.is_empty() {
            return false;
        }
        let flags = Flags::new().value("filter", format!("reference={}", image));
        let listed = self.list("images", flags, &[]);
        listed.success && R::image_listed(&image, &listed.value)
    }

    fn build(&self, configuration: &StackConfiguration, options: &BuildOptions) -> ValidatedOutput<()> {
        let built = self.is_built(configuration);
        if !options.needs_build(configuration, built) {
            debug!(image = %configuration.image_name(), "image exists, skipping build");
            return ValidatedOutput::ok(());
        }
        let (no_cache, pull) = options.effective(configuration);
        match configuration.stack_type() {
            StackType::Dockerfile => self.build_dockerfile(configuration, no_cache, pull),
            StackType::Tar => self.load_archive(configuration, "tar"),
            StackType::TarGz => self.load_archive(configuration, "tar.gz"),
            StackType::RemoteImage | StackType::Config => {
                let mut result = self.pull(&configuration.image_name());
                if !result.success {
                    result.push_error(errors::failed_to_build(configuration.stack_path()));
                }
                result
            }
        }
    }

    fn remove_image(&self, configuration: &StackConfiguration) -> ValidatedOutput<()> {
        let image = configuration.image_name();
        if !self.is_built(configuration) {
            let mut result = ValidatedOutput::ok(());
            result.push_warning(errors::no_such_image(&image));
            return result;
        }
        self.shell
            .exec(&self.command("rmi"), &Flags::new(), &args([image]), &ExecOptions::new())
            .map(|_| ())
    }

    fn remove_all_images(&self, stack_path: &str) -> ValidatedOutput<()> {
        let flags = Flags::new().switch("q").with(Flag::values(
            "filter",
            [
                format!("label={}={}", labels::STACK_PATH, stack_path),
                format!("label={}={}", labels::BUILDER, CLI_NAME),
            ],
        ));
        let listed = self
            .shell
            .output(&self.command("images"), &flags, &[], &ExecOptions::new());
        if !listed.success {
            return listed.with_value(());
        }
        let mut ids: Vec<String> = Vec::new();
        for id in listed.value.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if !ids.iter().any(|known| known == id) {
                ids.push(id.to_string());
            }
        }
        self.batch("rmi", &ids)
    }
}

impl<R: Runtime> RunDriver for ContainerCli<R> {
    fn job_start(
        &self,
        configuration: &StackConfiguration,
        spec: &JobSpec,
        hooks: JobHooks<'_>,
    ) -> ValidatedOutput<String> {
        let mut spec = spec.clone();
        spec.labels.retain(|(k, _)| k != labels::RUNNER);
        spec.labels.push((labels::RUNNER.to_string(), CLI_NAME.to_string()));

        let check = run_flags::validate_job(configuration, &spec);
        if !check.success {
            return check.with_value(String::new());
        }

        let mut flags = run_flags::create_flags(configuration, &spec, self.render_options());
        flags.extend(R::runtime_flags(configuration));
        let create = self.shell.output_trimmed(
            &self.command("create"),
            &flags,
            &run_flags::create_args(configuration, &spec),
            &ExecOptions::new(),
        );
        if !create.success {
            return create;
        }
        if create.value.is_empty() {
            return ValidatedOutput::failed(errors::empty_create_id());
        }
        let id = create.value.clone();
        let mut result = create;
        debug!(id = %id, image = %configuration.image_name(), "created job");

        if let Some(post_create) = hooks.post_create {
            let hooked = post_create(&id);
            result.absorb(&hooked);
            if !hooked.success {
                return result;
            }
        }

        let (start_flags, stdio) = if spec.synchronous {
            (
                Flags::new().switch("attach").switch("interactive"),
                StdioMode::Inherit,
            )
        } else {
            (Flags::new(), StdioMode::Pipe)
        };
        let start = self.shell.exec(
            &self.command("start"),
            &start_flags,
            &args([id.as_str()]),
            &ExecOptions::new().stdio(stdio),
        );
        result.absorb(&start);

        if let Some(post_exec) = hooks.post_exec {
            post_exec(&result);
        }
        result
    }

    fn job_exec(&self, id: &str, command: &[String], spec: &ExecSpec, mode: ExecMode) -> ValidatedOutput<Value> {
        let mut positional = vec![ShellArg::from(id)];
        positional.extend(command.iter().map(ShellArg::from));
        let flags = run_flags::exec_flags(spec);
        let exec = self.command("exec");
        match mode {
            ExecMode::Print => self
                .shell
                .exec(&exec, &flags, &positional, &ExecOptions::new())
                .map(|_| Value::Null),
            ExecMode::Output => self
                .shell
                .output(&exec, &flags, &positional, &ExecOptions::new())
                .map(Value::String),
            ExecMode::Json => self
                .shell
                .output_json(&exec, &flags, &positional, &ExecOptions::new()),
        }
    }

    fn job_attach(&self, id: &str) -> ValidatedOutput<()> {
        self.shell
            .exec(&self.command("attach"), &Flags::new(), &args([id]), &ExecOptions::new())
            .map(|_| ())
    }

    fn job_log(&self, id: &str, lines: Option<&str>) -> ValidatedOutput<()> {
        let tail = lines.and_then(|l| l.trim().parse::<u64>().ok());
        let flags = Flags::new().value_opt("tail", tail.map(|n| n.to_string()));
        self.shell
            .exec(&self.command("logs"), &flags, &args([id]), &ExecOptions::new())
            .map(|_| ())
    }

    fn job_stop(&self, ids: &[String]) -> ValidatedOutput<()> {
        self.batch("stop", ids)
    }

    fn job_delete(&self, ids: &[String]) -> ValidatedOutput<()> {
        let mut result = self.batch("stop", ids);
        let removed = self.batch("rm", ids);
        result.absorb(&removed);
        result
    }

    fn job_info(&self, stack_paths: &[String], states: &[JobState]) -> ValidatedOutput<Vec<JobInfo>> {
        let stack_filters: Vec<Option<&str>> = if stack_paths.is_empty() {
            vec![None]
        } else {
            stack_paths.iter().map(|s| Some(s.as_str())).collect()
        };
        let state_filters: Vec<Option<JobState>> = if states.is_empty() {
            vec![None]
        } else {
            states.iter().copied().map(Some).collect()
        };

        let mut result = ValidatedOutput::ok(Vec::new());
        let mut entries = Vec::new();
        for stack_path in &stack_filters {
            for state in &state_filters {
                let listed = self.ps_entries(*stack_path, *state);
                result.absorb(&listed);
                entries.extend(listed.value);
            }
        }

        let ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
        let inspected = self.inspect(&ids);
        if !inspected.success {
            // Jobs started with --rm can vanish between ps and inspect.
            warn!(count = ids.len(), "inspect failed, job labels unavailable");
            for message in &inspected.error {
                result.push_warning(message.clone());
            }
        }

        let mut found = jobs::assemble(entries, inspected.value);
        if !states.is_empty() {
            found.retain(|job| states.contains(&job.status));
        }
        result.value = found;
        result
    }

    fn job_to_image(&self, id: &str, image: &str) -> ValidatedOutput<()> {
        self.shell
            .exec(&self.command("commit"), &Flags::new(), &args([id, image]), &Self::piped())
            .map(|_| ())
    }

    fn job_copy_in(&self, id: &str, host_dir: &Path, container_dir: &str) -> ValidatedOutput<()> {
        let source = format!("{}/.", host_dir.display());
        let destination = format!("{}:{}", id, container_dir);
        self.shell
            .exec(&self.command("cp"), &Flags::new(), &args([source, destination]), &Self::piped())
            .map(|_| ())
    }

    fn job_copy_out(&self, id: &str, container_dir: &str, host_dir: &Path) -> ValidatedOutput<()> {
        let source = format!("{}:{}/.", id, container_dir.trim_end_matches('/'));
        let destination = host_dir.display().to_string();
        self.shell
            .exec(&self.command("cp"), &Flags::new(), &args([source, destination]), &Self::piped())
            .map(|_| ())
    }

    fn volume_create(&self, volume_labels: &[(String, String)]) -> ValidatedOutput<String> {
        let mut flags = Flags::new();
        if !volume_labels.is_empty() {
            flags.push(Flag::values(
                "label",
                volume_labels.iter().map(|(k, v)| format!("{}={}", k, v)),
            ));
        }
        let created = self
            .shell
            .output_trimmed(&self.command("volume create"), &flags, &[], &ExecOptions::new());
        if !created.success || created.value.is_empty() {
            let mut result = created.with_value(String::new());
            result.push_error(errors::failed_create_volume());
            return result;
        }
        created
    }

    fn volume_delete(&self, names: &[String]) -> ValidatedOutput<()> {
        self.batch("volume rm", names)
    }
}
