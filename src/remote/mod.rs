//! Remote job lifecycle over SSH.
//!
//! A remote resource runs the same CLI. Remote operations upload the stack and
//! project files with rsync and then invoke the remote CLI, forwarding only the
//! flags a sub-command is known to accept. Job metadata needed later (job
//! directory, project id) travels as container labels, so there is no remote
//! manifest to keep in sync.

mod cjr;
pub mod resource;
pub mod upload;

use std::path::PathBuf;

use crate::ValidatedOutput;
use crate::config::FileAccess;
use crate::drivers::{BuildOptions, JobInfo, JobState};
use crate::jobs::CopyMode;
use crate::jobs::jupyter::ServerOptions;
use crate::shell::{Flag, Flags};
use crate::stack::PortMapping;

pub use cjr::CjrRemoteDriver;
pub use resource::{Resource, ResourceRegistry};
pub use upload::UploadMode;

/// Multiplex connection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexOptions {
    /// Open a master before operations that make several remote calls.
    pub autoconnect: bool,
    /// Close the master when such an operation finishes.
    pub autodisconnect: bool,
    /// Replace a master that is already running when connecting. When off,
    /// a running master is reused and left open.
    pub restart_existing: bool,
}

impl Default for MultiplexOptions {
    fn default() -> Self {
        Self {
            autoconnect: true,
            autodisconnect: true,
            restart_existing: true,
        }
    }
}

/// Remote CLI sub-commands that accept forwarded flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    JobAttach,
    JobCp,
    JobRm,
    JobLabels,
    JobLs,
    JobLog,
    JobStop,
    JobShell,
    JobJupyter,
    Run,
}

impl RemoteCommand {
    /// Sub-command path on the remote CLI.
    pub fn path(&self) -> &'static str {
        match self {
            RemoteCommand::JobAttach => "job attach",
            RemoteCommand::JobCp => "job cp",
            RemoteCommand::JobRm => "job rm",
            RemoteCommand::JobLabels => "job labels",
            RemoteCommand::JobLs => "job ls",
            RemoteCommand::JobLog => "job log",
            RemoteCommand::JobStop => "job stop",
            RemoteCommand::JobShell => "job shell",
            RemoteCommand::JobJupyter => "job jupyter",
            RemoteCommand::Run => "run",
        }
    }

    /// Flags forwarded to the remote CLI; everything else is dropped.
    pub fn transferable_flags(&self) -> &'static [&'static str] {
        match self {
            RemoteCommand::JobAttach => &["explicit"],
            RemoteCommand::JobCp => &["explicit", "verbose", "all"],
            RemoteCommand::JobRm => &["explicit", "quiet"],
            RemoteCommand::JobLabels => &["all", "all-completed", "all-running"],
            RemoteCommand::JobLs => &["explicit", "verbose", "json", "all"],
            RemoteCommand::JobLog => &["explicit", "lines", "all"],
            RemoteCommand::JobStop => &["explicit", "all", "all-completed", "all-running", "quiet"],
            RemoteCommand::JobShell => &["explicit", "discard"],
            RemoteCommand::JobJupyter => &["build-mode", "explicit"],
            RemoteCommand::Run => &[
                "explicit", "async", "verbose", "quiet", "port", "x11", "message", "label",
                "autocopy", "build-mode",
            ],
        }
    }

    /// `cjr <path>` as run on the resource.
    pub fn command_line(&self) -> String {
        format!("{} {}", crate::CLI_NAME, self.path())
    }
}

/// Value of a flag given to a local command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlagValue {
    Switch(bool),
    Text(String),
    List(Vec<String>),
}

/// Flags of a local command, in the order they were given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFlags {
    entries: Vec<(String, FlagValue)>,
}

impl RemoteFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn switch(mut self, name: &str, on: bool) -> Self {
        self.entries.push((name.to_string(), FlagValue::Switch(on)));
        self
    }

    pub fn text(mut self, name: &str, value: Option<impl Into<String>>) -> Self {
        if let Some(value) = value {
            self.entries.push((name.to_string(), FlagValue::Text(value.into())));
        }
        self
    }

    pub fn list(mut self, name: &str, values: Vec<String>) -> Self {
        self.entries.push((name.to_string(), FlagValue::List(values)));
        self
    }

    /// Shell flags for `command`: allow-listed entries only, switches that
    /// are off and empty lists dropped.
    pub fn for_command(&self, command: RemoteCommand) -> Flags {
        let allowed = command.transferable_flags();
        let mut flags = Flags::new();
        for (name, value) in &self.entries {
            if !allowed.contains(&name.as_str()) {
                continue;
            }
            match value {
                FlagValue::Switch(true) => {
                    flags.push(Flag::switch(name).long());
                }
                FlagValue::Switch(false) => {}
                FlagValue::Text(text) => {
                    flags.push(Flag::value(name, text.as_str()).long());
                }
                FlagValue::List(values) if values.is_empty() => {}
                FlagValue::List(values) => {
                    flags.push(Flag::values(name, values.iter().cloned()).long());
                }
            }
        }
        flags
    }
}

/// Output flags shared by every remote operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    pub verbose: bool,
    pub quiet: bool,
    pub explicit: bool,
}

/// How to start a job on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteJobOptions {
    /// Local stack path (directory or image reference).
    pub stack_path: String,
    pub config_files: Vec<PathBuf>,
    pub command: String,
    pub synchronous: bool,
    pub x11: bool,
    pub labels: Vec<(String, String)>,
    pub ports: Vec<PortMapping>,
    pub message: Option<String>,
    pub build: BuildOptions,
    pub file_access: FileAccess,
    /// Local directory the user is working in.
    pub cwd: PathBuf,
    /// Local project root, if any.
    pub host_root: Option<PathBuf>,
}

/// Upload policy for `rjob run`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteStartOptions {
    pub auto_copy: bool,
    pub file_upload_mode: UploadMode,
    pub stack_upload_mode: UploadMode,
}

/// Which remote command starts a job from a previous one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteExecMode {
    Exec,
    Shell,
    /// A Jupyter server; the job command holds extra server arguments.
    Jupyter(ServerOptions),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteExecOptions {
    /// Job whose files the new job shares.
    pub id: String,
    pub host_project_root: Option<PathBuf>,
    pub mode: RemoteExecMode,
    pub stack_upload_mode: UploadMode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDeleteOptions {
    pub ids: Vec<String>,
    pub delete_images: bool,
    pub delete_files: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCopyOptions {
    pub ids: Vec<String>,
    /// Local directory receiving the files.
    pub host_path: Option<PathBuf>,
    pub mode: CopyMode,
    /// Copy even when the job was started from a different project.
    pub force: bool,
}

/// Job lifecycle on a remote resource.
pub trait RemoteDriver {
    fn connect(&mut self, resource: &Resource, x11: bool) -> ValidatedOutput<()>;
    fn disconnect(&mut self, resource: &Resource, x11: bool) -> ValidatedOutput<()>;

    fn job_start(
        &mut self,
        resource: &Resource,
        job: &RemoteJobOptions,
        options: &RemoteStartOptions,
    ) -> ValidatedOutput<()>;
    fn job_exec(
        &mut self,
        resource: &Resource,
        job: &RemoteJobOptions,
        options: &RemoteExecOptions,
    ) -> ValidatedOutput<()>;
    /// Copy job files back; the value lists the jobs that were copied.
    fn job_copy(&mut self, resource: &Resource, options: &RemoteCopyOptions) -> ValidatedOutput<Vec<String>>;
    fn job_delete(&mut self, resource: &Resource, options: &RemoteDeleteOptions) -> ValidatedOutput<()>;

    fn job_attach(&mut self, resource: &Resource, flags: &RemoteFlags, id: Option<&str>) -> ValidatedOutput<()>;
    fn job_log(&mut self, resource: &Resource, flags: &RemoteFlags, id: Option<&str>) -> ValidatedOutput<()>;
    fn job_list(&mut self, resource: &Resource, flags: &RemoteFlags) -> ValidatedOutput<()>;
    fn job_state(&mut self, resource: &Resource, id: &str) -> ValidatedOutput<()>;
    fn job_stop(&mut self, resource: &Resource, flags: &RemoteFlags, ids: &[String]) -> ValidatedOutput<()>;
    fn job_info(&mut self, resource: &Resource, states: &[JobState]) -> ValidatedOutput<Vec<JobInfo>>;

    /// Stop the Jupyter server of job `id` and close the X11 connection.
    fn jupyter_stop(&mut self, resource: &Resource, id: &str) -> ValidatedOutput<()>;
    fn jupyter_list(&mut self, resource: &Resource, id: &str) -> ValidatedOutput<()>;
    /// Url of the Jupyter server of job `id`, addressed to the resource.
    fn jupyter_url(&mut self, resource: &Resource, id: &str) -> ValidatedOutput<String>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::command_string;

    #[test]
    fn test_only_allow_listed_flags_are_forwarded() {
        let flags = RemoteFlags::new()
            .switch("explicit", true)
            .switch("verbose", true)
            .switch("all", false)
            .text("lines", Some("20"))
            .switch("json", true);
        assert_eq!(
            command_string("cjr job log", &flags.for_command(RemoteCommand::JobLog), &[]),
            "cjr job log --explicit --lines='20'"
        );
        assert_eq!(
            command_string("cjr job ls", &flags.for_command(RemoteCommand::JobLs), &[]),
            "cjr job ls --explicit --verbose --json"
        );
    }

    #[test]
    fn test_list_flags_repeat() {
        let flags = RemoteFlags::new()
            .list("label", vec!["a=1".into(), "b=2".into()])
            .list("port", vec![]);
        assert_eq!(
            command_string("cjr run", &flags.for_command(RemoteCommand::Run), &[]),
            "cjr run --label='a=1' --label='b=2'"
        );
    }

    #[test]
    fn test_allow_list_per_command() {
        assert_eq!(RemoteCommand::JobRm.transferable_flags(), &["explicit", "quiet"]);
        assert!(!RemoteCommand::JobLabels.transferable_flags().contains(&"explicit"));
        assert_eq!(RemoteCommand::JobShell.command_line(), "cjr job shell");
        assert_eq!(RemoteCommand::JobJupyter.transferable_flags(), &["build-mode", "explicit"]);
    }
}
