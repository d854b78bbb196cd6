//! Container runtime drivers.
//!
//! [`BuildDriver`] turns a stack into a tagged image, [`RunDriver`] creates,
//! starts, queries and removes job containers. Both are implemented once by
//! [`ContainerCli`], parameterized by a [`Runtime`] that isolates the
//! differences between the Docker and Podman command lines.

mod cli;
mod docker;
pub mod jobs;
mod podman;
pub mod run_flags;

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;

pub use cli::{ContainerCli, Runtime};
pub use docker::{Docker, DockerDriver};
pub use jobs::{JobInfo, JobState};
pub use podman::{Podman, PodmanDriver};

use crate::ValidatedOutput;
use crate::errors;
use crate::shell::ShellCommand;
use crate::stack::StackConfiguration;

/// Label keys stamped on images and containers.
pub mod labels {
    /// Marks containers created by this tool; value is the tool name.
    pub const RUNNER: &str = "runner";
    /// Marks images built by this tool; value is the tool name.
    pub const BUILDER: &str = "builder";
    pub const STACK_PATH: &str = "stack-path";
    pub const PROJECT_ROOT: &str = "project-root";
    pub const CONTAINER_ROOT: &str = "container-root";
    pub const FILE_VOLUME: &str = "filevolume";
    pub const FILE_ACCESS: &str = "file-access";
    pub const MESSAGE: &str = "message";
    pub const JOB_TYPE: &str = "jobtype";
    pub const REMOTE_JOB_DIR: &str = "remote-job-dir";
    pub const PROJECT_ID: &str = "project-id";
}

/// Which runtime CLI to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    DockerCli,
    PodmanCli,
}

impl DriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriverKind::DockerCli => "docker-cli",
            DriverKind::PodmanCli => "podman-cli",
        }
    }

    /// Docker on macOS and Windows, Podman elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(any(target_os = "macos", target_os = "windows")) {
            DriverKind::DockerCli
        } else {
            DriverKind::PodmanCli
        }
    }
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "docker-cli" | "docker" => Ok(DriverKind::DockerCli),
            "podman-cli" | "podman" => Ok(DriverKind::PodmanCli),
            other => Err(format!(
                "unknown driver '{}', expected docker-cli or podman-cli",
                other
            )),
        }
    }
}

impl std::fmt::Display for DriverKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Driver-wide settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    /// Tag appended to stack image names.
    pub image_tag: String,
    /// Relabel bind mounts for SELinux.
    pub selinux: bool,
}

/// Build both drivers for `kind`.
pub fn new_drivers(
    kind: DriverKind,
    shell: ShellCommand,
    options: DriverOptions,
) -> (Box<dyn BuildDriver>, Box<dyn RunDriver>) {
    match kind {
        DriverKind::DockerCli => (
            Box::new(DockerDriver::new(shell.clone(), options.clone())),
            Box::new(DockerDriver::new(shell, options)),
        ),
        DriverKind::PodmanCli => (
            Box::new(PodmanDriver::new(shell.clone(), options.clone())),
            Box::new(PodmanDriver::new(shell, options)),
        ),
    }
}

/// When to rebuild an image that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Never rebuild an existing image.
    ReuseImage,
    /// Rebuild only if missing, unless the stack asks for no-cache or pull.
    #[default]
    Cached,
    /// Always rebuild without the layer cache.
    NoCache,
}

/// Build mode plus an optional forced pull of base images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildOptions {
    pub mode: BuildMode,
    pub pull: bool,
}

impl FromStr for BuildOptions {
    type Err = String;

    /// Parse `reuse-image`, `cached` or `no-cache`, optionally followed by `,pull`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',').map(str::trim);
        let mode = match parts.next() {
            Some("reuse-image") => BuildMode::ReuseImage,
            Some("cached") | Some("") => BuildMode::Cached,
            Some("no-cache") => BuildMode::NoCache,
            _ => return Err(errors::invalid_build_mode(s)),
        };
        let mut pull = false;
        for extra in parts {
            match extra {
                "pull" => pull = true,
                _ => return Err(errors::invalid_build_mode(s)),
            }
        }
        Ok(BuildOptions { mode, pull })
    }
}

impl std::fmt::Display for BuildOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.mode {
            BuildMode::ReuseImage => "reuse-image",
            BuildMode::Cached => "cached",
            BuildMode::NoCache => "no-cache",
        };
        if self.pull {
            write!(f, "{},pull", mode)
        } else {
            write!(f, "{}", mode)
        }
    }
}

impl BuildOptions {
    /// Combine with the stack's own build flags: (no_cache, pull).
    pub fn effective(&self, configuration: &StackConfiguration) -> (bool, bool) {
        match self.mode {
            BuildMode::ReuseImage => (false, false),
            BuildMode::Cached => (configuration.no_cache(), self.pull || configuration.pull()),
            BuildMode::NoCache => (true, self.pull || configuration.pull()),
        }
    }

    /// True if an image in state `built` has to be (re)built.
    pub fn needs_build(&self, configuration: &StackConfiguration, built: bool) -> bool {
        let (no_cache, pull) = self.effective(configuration);
        !built || no_cache || pull
    }
}

/// Produces images from stacks.
pub trait BuildDriver {
    /// Determine the stack type and load its layered configuration.
    fn validate(&self, stack_path: &str, overrides: &[PathBuf]) -> ValidatedOutput<StackConfiguration>;

    /// True if the stack's image exists, matched by exact name.
    fn is_built(&self, configuration: &StackConfiguration) -> bool;

    /// Build, load or pull the image. Does nothing if it exists and the
    /// options do not force a rebuild.
    fn build(&self, configuration: &StackConfiguration, options: &BuildOptions) -> ValidatedOutput<()>;

    fn remove_image(&self, configuration: &StackConfiguration) -> ValidatedOutput<()>;

    /// Remove every image this tool built for `stack_path`.
    fn remove_all_images(&self, stack_path: &str) -> ValidatedOutput<()>;
}

/// Validate a stack and make sure its image exists.
pub fn build_and_load(
    builder: &dyn BuildDriver,
    options: &BuildOptions,
    stack_path: &str,
    overrides: &[PathBuf],
) -> ValidatedOutput<StackConfiguration> {
    let mut result = builder.validate(stack_path, overrides);
    if !result.success {
        return result;
    }
    let build = builder.build(&result.value, options);
    result.absorb(&build);
    result
}

/// What to run in a new job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Shell command; empty runs the image default.
    pub command: String,
    /// Attach to the job and wait for it to finish.
    pub synchronous: bool,
    /// Allocate a TTY and keep stdin open.
    pub interactive: bool,
    /// Remove the container once it exits.
    pub remove: bool,
    pub name: Option<String>,
    pub labels: Vec<(String, String)>,
}

impl JobSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            synchronous: true,
            interactive: true,
            remove: false,
            name: None,
            labels: Vec::new(),
        }
    }

    pub fn label(mut self, key: &str, value: impl Into<String>) -> Self {
        self.labels.push((key.to_string(), value.into()));
        self
    }
}

/// Callbacks around job start. `post_create` sees the new container id
/// before the job starts, `post_exec` sees the final start result.
#[derive(Default)]
pub struct JobHooks<'a> {
    pub post_create: Option<Box<dyn FnOnce(&str) -> ValidatedOutput<()> + 'a>>,
    pub post_exec: Option<Box<dyn FnOnce(&ValidatedOutput<String>) + 'a>>,
}

/// How `job_exec` reports the command's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Stream to the terminal; value is `null`.
    Print,
    /// Capture stdout as a JSON string.
    Output,
    /// Parse stdout as JSON.
    Json,
}

/// Options for executing inside a running job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecSpec {
    pub interactive: bool,
    pub detached: bool,
    pub working_dir: Option<String>,
}

/// Creates, starts and tracks job containers.
pub trait RunDriver {
    /// Create and start a job; returns the container id.
    fn job_start(
        &self,
        configuration: &StackConfiguration,
        spec: &JobSpec,
        hooks: JobHooks<'_>,
    ) -> ValidatedOutput<String>;

    /// Run an argv inside a running job.
    fn job_exec(&self, id: &str, command: &[String], spec: &ExecSpec, mode: ExecMode) -> ValidatedOutput<Value>;

    fn job_attach(&self, id: &str) -> ValidatedOutput<()>;

    /// Print the last `lines` lines of a job's log; `None` or an unparseable
    /// count prints everything.
    fn job_log(&self, id: &str, lines: Option<&str>) -> ValidatedOutput<()>;

    fn job_stop(&self, ids: &[String]) -> ValidatedOutput<()>;

    /// Stop then remove.
    fn job_delete(&self, ids: &[String]) -> ValidatedOutput<()>;

    /// Jobs created by this tool, filtered by stack path and state.
    /// Empty filters match everything.
    fn job_info(&self, stack_paths: &[String], states: &[JobState]) -> ValidatedOutput<Vec<JobInfo>>;

    /// Commit a job's filesystem to an image.
    fn job_to_image(&self, id: &str, image: &str) -> ValidatedOutput<()>;

    /// Copy a host directory's contents into a job.
    fn job_copy_in(&self, id: &str, host_dir: &Path, container_dir: &str) -> ValidatedOutput<()>;

    /// Copy a job directory's contents onto the host.
    fn job_copy_out(&self, id: &str, container_dir: &str, host_dir: &Path) -> ValidatedOutput<()>;

    /// Create a named volume; returns its name.
    fn volume_create(&self, labels: &[(String, String)]) -> ValidatedOutput<String>;

    fn volume_delete(&self, names: &[String]) -> ValidatedOutput<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::StackType;

    #[test]
    fn test_build_options_parse_and_display() {
        let opts: BuildOptions = "no-cache,pull".parse().unwrap();
        assert_eq!(opts.mode, BuildMode::NoCache);
        assert!(opts.pull);
        assert_eq!(opts.to_string(), "no-cache,pull");
        assert_eq!("reuse-image".parse::<BuildOptions>().unwrap().to_string(), "reuse-image");
        assert!("sometimes".parse::<BuildOptions>().is_err());
        assert!("cached,push".parse::<BuildOptions>().is_err());
    }

    #[test]
    fn test_needs_build_by_mode() {
        let cfg = StackConfiguration::new("/s/a", StackType::Dockerfile, "cjr");
        let cached = BuildOptions::default();
        assert!(cached.needs_build(&cfg, false));
        assert!(!cached.needs_build(&cfg, true));

        let pull = BuildOptions { mode: BuildMode::Cached, pull: true };
        assert!(pull.needs_build(&cfg, true));

        let reuse = BuildOptions { mode: BuildMode::ReuseImage, pull: true };
        assert!(!reuse.needs_build(&cfg, true));

        let no_cache = BuildOptions { mode: BuildMode::NoCache, pull: false };
        assert!(no_cache.needs_build(&cfg, true));
    }

    #[test]
    fn test_driver_kind_parse() {
        assert_eq!("docker-cli".parse::<DriverKind>(), Ok(DriverKind::DockerCli));
        assert_eq!("podman".parse::<DriverKind>(), Ok(DriverKind::PodmanCli));
        assert!("lxc".parse::<DriverKind>().is_err());
    }
}
