//! Driver for resources that run this CLI themselves.
//!
//! A remote job start uploads the stack and the project files with rsync and
//! then runs `cjr run` on the resource. Everything needed later is written as
//! labels on the remote job, so copy, exec and delete start by reading those
//! labels back with `cjr job labels --json`.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use super::upload::{self, DirRequest, UploadMode};
use super::{
    MultiplexOptions, OutputOptions, RemoteCommand, RemoteCopyOptions, RemoteDeleteOptions,
    RemoteDriver, RemoteExecMode, RemoteExecOptions, RemoteFlags, RemoteJobOptions,
    RemoteStartOptions, Resource,
};
use crate::config::Paths;
use crate::drivers::{JobInfo, JobState, labels};
use crate::jobs::jupyter::{self, ServerOptions};
use crate::jobs::{CopyMode, filter_by_state};
use crate::project::{
    EMPTY_PROJECT_ID, container_working_dir, ensure_project_id, get_project_id, posix_dirname,
    posix_join,
};
use crate::shell::ssh::{
    DEFAULT_MULTIPLEX_TAG, SshOptions, SshShellCommand, SyncDirection, X11_MULTIPLEX_TAG,
};
use crate::shell::rsync::{contents_of, rule_flags, scratch_dir};
use crate::shell::{Flag, Flags, ShellArg, args, command_string};
use crate::stack::{StackConfiguration, bundle_files};
use crate::{CLI_NAME, ValidatedOutput, errors};

/// Labels of remote jobs, keyed by job id in the order the remote CLI
/// resolved them.
type JobLabels = IndexMap<String, BTreeMap<String, String>>;

/// Remote locations of one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct JobDirs {
    /// Removed with the job when files are deleted.
    job_dir: String,
    project_root: Option<String>,
    stack_path: String,
}

/// Which remote command starts the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Launch<'a> {
    Run,
    /// New job sharing the files of the given job.
    Exec(&'a str),
    Shell(&'a str),
    /// Jupyter server beside the given job.
    Jupyter(&'a str, ServerOptions),
}

fn multiplex_tag(x11: bool) -> &'static str {
    if x11 {
        X11_MULTIPLEX_TAG
    } else {
        DEFAULT_MULTIPLEX_TAG
    }
}

/// Closes the multiplex master when dropped, if it is ours to close.
struct MultiplexGuard<'a> {
    ssh: &'a SshShellCommand,
    tag: &'static str,
    active: bool,
}

impl Drop for MultiplexGuard<'_> {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        let stopped = self.ssh.multiplex_stop(self.tag);
        if !stopped.success {
            debug!(tag = self.tag, "ssh master was already gone");
        }
    }
}

/// Remote driver speaking to `cjr` over ssh.
pub struct CjrRemoteDriver {
    ssh: SshShellCommand,
    output: OutputOptions,
    multiplex: MultiplexOptions,
    /// Tag of the images built from local stacks.
    image_tag: String,
    bundle_dir: PathBuf,
    job_copy_dir: PathBuf,
}

impl CjrRemoteDriver {
    pub fn new(ssh: SshShellCommand, output: OutputOptions, paths: &Paths) -> Self {
        Self {
            ssh,
            output,
            multiplex: MultiplexOptions::default(),
            image_tag: CLI_NAME.to_string(),
            bundle_dir: paths.bundle_dir(),
            job_copy_dir: paths.job_copy_dir(),
        }
    }

    pub fn with_multiplex(mut self, multiplex: MultiplexOptions) -> Self {
        self.multiplex = multiplex;
        self
    }

    pub fn with_image_tag(mut self, tag: impl Into<String>) -> Self {
        self.image_tag = tag.into();
        self
    }

    fn select(&mut self, resource: &Resource) -> ValidatedOutput<()> {
        self.ssh.set_target(resource.ssh_target())
    }

    /// Start a master for `resource`. The value is true if this call started
    /// it, false if a running master was kept.
    fn open_master(&mut self, resource: &Resource, x11: bool) -> ValidatedOutput<bool> {
        let selected = self.select(resource);
        if !selected.success {
            return selected.with_value(false);
        }
        let tag = multiplex_tag(x11);
        if self.ssh.multiplex_exists(tag) {
            if !self.multiplex.restart_existing {
                debug!(tag, "reusing ssh master");
                return ValidatedOutput::ok(false);
            }
            let stopped = self.ssh.multiplex_stop(tag);
            if !stopped.success {
                return stopped.with_value(false);
            }
        }
        self.ssh.multiplex_start(tag, x11).with_value(true)
    }

    /// Select the resource and open a master if autoconnect is on.
    fn init_connection(&mut self, resource: &Resource, x11: bool) -> ValidatedOutput<bool> {
        if self.multiplex.autoconnect {
            self.open_master(resource, x11)
        } else {
            self.select(resource).with_value(false)
        }
    }

    /// Guard for the master opened by `init_connection`. X11 masters stay
    /// open after the call so display forwarding outlives it; they are closed
    /// by `disconnect` or when a jupyter server is stopped.
    fn session(&self, x11: bool, owned: bool) -> MultiplexGuard<'_> {
        MultiplexGuard {
            ssh: &self.ssh,
            tag: multiplex_tag(x11),
            active: owned && !x11 && self.multiplex.autodisconnect,
        }
    }

    /// The local stack of `job`, tagged like locally built images.
    fn load_stack(&self, job: &RemoteJobOptions) -> ValidatedOutput<StackConfiguration> {
        StackConfiguration::open(&job.stack_path, &job.config_files, &self.image_tag)
    }

    fn output_flags(&self) -> Flags {
        Flags::new()
            .switch_if("explicit", self.output.explicit)
            .switch_if("quiet", self.output.quiet)
            .switch_if("verbose", self.output.verbose)
    }

    fn rsync_flags(&self) -> Flags {
        Flags::new().switch("a").switch_if("v", self.output.verbose)
    }

    /// Run a directory script and return the directory it echoed.
    fn make_dirs(&self, request: &DirRequest) -> ValidatedOutput<String> {
        let mut result = self
            .ssh
            .output_line(&request.script(), SshOptions::default())
            .map(|out| {
                out.lines()
                    .rev()
                    .map(str::trim)
                    .find(|l| !l.is_empty())
                    .unwrap_or_default()
                    .to_string()
            });
        if !result.success || result.value.is_empty() {
            result.push_error(errors::remote_temp_dir_failed());
        }
        result
    }

    /// Allocate the remote directories for a new job.
    fn upload_dirs(
        &self,
        resource: &Resource,
        configuration: &StackConfiguration,
        job: &RemoteJobOptions,
        project_id: &str,
        options: &RemoteStartOptions,
    ) -> ValidatedOutput<JobDirs> {
        let storage = resource.storage_dir.as_str();
        let files = self.make_dirs(&upload::file_dir_request(
            options.file_upload_mode,
            storage,
            project_id,
        ));
        if !files.success {
            return files.with_value(JobDirs::default());
        }
        let project_name = job
            .host_root
            .as_deref()
            .and_then(Path::file_name)
            .map(|n| n.to_string_lossy().into_owned());
        let (job_dir, project_root) = upload::file_dirs(
            options.file_upload_mode,
            &files.value,
            project_id,
            project_name.as_deref(),
        );
        let stack_name = configuration.safe_stack_name();

        if options.file_upload_mode == UploadMode::Uncached
            && options.stack_upload_mode == UploadMode::Uncached
        {
            let stack_path = posix_join(&job_dir, &stack_name);
            return files.with_value(JobDirs {
                job_dir,
                project_root,
                stack_path,
            });
        }

        let stacks = self.make_dirs(&upload::stack_dir_request(
            options.stack_upload_mode,
            storage,
            project_id,
            None,
        ));
        let stack_path =
            upload::stack_path(options.stack_upload_mode, &stacks.value, project_id, &stack_name);
        let mut result = files.with_value(JobDirs {
            job_dir,
            project_root,
            stack_path,
        });
        result.absorb(&stacks);
        result
    }

    /// Send the stack directory and its bundle to `remote_stack`.
    fn push_stack(&self, configuration: &StackConfiguration, remote_stack: &str) -> ValidatedOutput<()> {
        let bundle = match scratch_dir(&self.bundle_dir, "stack-") {
            Ok(dir) => dir,
            Err(e) => return ValidatedOutput::from_error(e),
        };
        let mut result = configuration.write_bundle(bundle.path());
        if !result.success {
            return result;
        }
        if let Some(dir) = configuration.stack_dir() {
            let pushed = self.ssh.rsync(
                &contents_of(dir),
                remote_stack,
                SyncDirection::Push,
                self.rsync_flags().switch("delete"),
            );
            result.absorb(&pushed);
            if !result.success {
                return result;
            }
        }
        let pushed = self.ssh.rsync(
            &contents_of(bundle.path()),
            remote_stack,
            SyncDirection::Push,
            self.rsync_flags(),
        );
        result.absorb(&pushed);
        result
    }

    fn push_project_files(
        &self,
        configuration: &StackConfiguration,
        local_root: &Path,
        remote_root: &str,
    ) -> ValidatedOutput<()> {
        let rules = configuration.rsync_files();
        let flags = rule_flags(
            self.rsync_flags().switch("delete"),
            rules.upload_include.as_deref().map(Path::new),
            rules.upload_exclude.as_deref().map(Path::new),
        );
        info!(local = %local_root.display(), remote = remote_root, "uploading project files");
        self.ssh
            .rsync(&contents_of(local_root), remote_root, SyncDirection::Push, flags)
            .with_value(())
    }

    /// Copy `remote_root` into `local_root`, filtered by the download rules
    /// stored with the remote stack.
    fn pull_project_files(
        &self,
        local_root: &Path,
        remote_root: &str,
        remote_stack: &str,
        mode: CopyMode,
    ) -> ValidatedOutput<()> {
        let rules = match scratch_dir(&self.job_copy_dir, "rules-") {
            Ok(dir) => dir,
            Err(e) => return ValidatedOutput::from_error(e),
        };
        let mut result = ValidatedOutput::ok(());
        if !remote_stack.is_empty() {
            let fetch = Flags::new()
                .switch("a")
                .with(Flag::values(
                    "include",
                    [bundle_files::DOWNLOAD_INCLUDE, bundle_files::DOWNLOAD_EXCLUDE],
                ))
                .with(Flag::value("exclude", "*"));
            let fetched = self.ssh.rsync(
                &contents_of(rules.path()),
                &format!("{}/", remote_stack.trim_end_matches('/')),
                SyncDirection::Pull,
                fetch,
            );
            result.absorb(&fetched);
            if !result.success {
                return result;
            }
        }

        let mut flags = self.rsync_flags();
        flags.extend(mode.rsync_flags());
        let include = rules.path().join(bundle_files::DOWNLOAD_INCLUDE);
        let exclude = rules.path().join(bundle_files::DOWNLOAD_EXCLUDE);
        let flags = rule_flags(flags, Some(include.as_path()), Some(exclude.as_path()));

        if let Err(e) = fs::create_dir_all(local_root) {
            result.push_error(e.to_string());
            return result;
        }
        info!(remote = remote_root, local = %local_root.display(), "downloading project files");
        let pulled = self.ssh.rsync(
            &contents_of(local_root),
            &format!("{}/", remote_root.trim_end_matches('/')),
            SyncDirection::Pull,
            flags,
        );
        result.absorb(&pulled);
        result
    }

    /// Labels of the remote jobs matching `ids`.
    fn job_labels(&self, ids: &[String]) -> ValidatedOutput<JobLabels> {
        let raw = self.ssh.output(
            &RemoteCommand::JobLabels.command_line(),
            &Flags::new().switch("json"),
            &args(ids),
            SshOptions::default(),
        );
        if !raw.success {
            return raw.with_value(JobLabels::new());
        }
        let found: JobLabels = match serde_json::from_str(raw.value.trim()) {
            Ok(found) => found,
            Err(_) => return ValidatedOutput::failed(errors::invalid_json(&raw.value)),
        };
        if !ids.is_empty() && found.is_empty() {
            return ValidatedOutput::failed(errors::no_matching_id());
        }
        ValidatedOutput::ok(found)
    }

    /// Remote command line that starts the job.
    fn start_command(
        &self,
        job: &RemoteJobOptions,
        dirs: &JobDirs,
        project_id: &str,
        launch: Launch<'_>,
        auto_copy: bool,
    ) -> String {
        let (command, positional): (String, Vec<ShellArg>) = match launch {
            Launch::Run => (
                RemoteCommand::Run.command_line(),
                args((!job.command.is_empty()).then_some(&job.command)),
            ),
            Launch::Exec(id) => (
                format!("{} job exec", CLI_NAME),
                args(std::iter::once(id).chain((!job.command.is_empty()).then_some(job.command.as_str()))),
            ),
            Launch::Shell(id) => (RemoteCommand::JobShell.command_line(), args([id])),
            Launch::Jupyter(id, _) => (
                format!("{} start", RemoteCommand::JobJupyter.command_line()),
                args([id]),
            ),
        };

        let mut flags = Flags::new()
            .value("stack", dirs.stack_path.as_str())
            .value("build-mode", job.build.to_string());
        if launch == Launch::Run {
            flags = flags
                .value("file-access", job.file_access.as_str())
                .value_opt("project-root", dirs.project_root.as_deref())
                .switch_if("autocopy", auto_copy)
                .value_opt("message", job.message.as_deref());
        }
        match launch {
            Launch::Shell(_) => {}
            Launch::Jupyter(_, server) => {
                flags = flags
                    .value("server-port", server.port.to_string())
                    .switch_if("expose", server.expose);
            }
            _ => {
                flags = flags.switch(if job.synchronous { "sync" } else { "async" });
            }
        }
        flags = flags.switch_if("x11", job.x11);
        if let (Some(host_root), Some(remote_root)) = (job.host_root.as_deref(), dirs.project_root.as_deref()) {
            let remote_parent = posix_dirname(remote_root);
            if let Some(dir) = container_working_dir(&job.cwd, host_root, &remote_parent) {
                flags = flags.value("working-directory", dir);
            }
        }
        flags.extend(self.output_flags());
        if matches!(launch, Launch::Jupyter(..)) && !self.output.quiet {
            flags = flags.switch("quiet");
        }

        let mut job_labels: Vec<String> = job
            .labels
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect();
        job_labels.push(format!("{}={}", labels::REMOTE_JOB_DIR, dirs.job_dir));
        job_labels.push(format!("{}={}", labels::PROJECT_ID, project_id));
        flags.push(Flag::values("label", job_labels));
        if !job.ports.is_empty() {
            flags.push(Flag::values("port", job.ports.iter().map(|p| p.to_string())));
        }

        // Server arguments follow the job id after `--`.
        let all_args = match launch {
            Launch::Jupyter(..) => {
                let mut all_args = positional;
                if !job.command.is_empty() {
                    all_args.push(ShellArg::raw("--"));
                    all_args.extend(args([job.command.as_str()]));
                }
                all_args
            }
            _ => {
                let mut all_args = vec![ShellArg::raw("--")];
                all_args.extend(positional);
                all_args
            }
        };
        command_string(&command, &flags, &all_args)
    }

    fn start_job(
        &self,
        job: &RemoteJobOptions,
        dirs: &JobDirs,
        project_id: &str,
        launch: Launch<'_>,
        auto_copy: bool,
    ) -> ValidatedOutput<()> {
        let line = self.start_command(job, dirs, project_id, launch, auto_copy);
        let options = SshOptions {
            interactive: true,
            x11: job.x11,
        };
        self.ssh.exec_line(&line, options).with_value(())
    }

    /// `cjr job jupyter <action> <id>` on the resource.
    fn jupyter_line(&self, action: &str, id: &str, interactive: bool) -> ValidatedOutput<String> {
        let command = format!("{} {}", RemoteCommand::JobJupyter.command_line(), action);
        let flags = Flags::new().switch_if("explicit", self.output.explicit);
        if interactive {
            self.ssh
                .exec(&command, &flags, &args([id]), SshOptions::interactive())
                .with_value(String::new())
        } else {
            self.ssh.output(&command, &flags, &args([id]), SshOptions::default())
        }
    }

    /// Run an allow-listed remote command with the user's flags.
    fn forward(
        &mut self,
        resource: &Resource,
        command: RemoteCommand,
        flags: &RemoteFlags,
        ids: &[String],
    ) -> ValidatedOutput<()> {
        let selected = self.select(resource);
        if !selected.success {
            return selected;
        }
        self.ssh
            .exec(
                &command.command_line(),
                &flags.for_command(command),
                &args(ids),
                SshOptions::interactive(),
            )
            .with_value(())
    }
}

impl RemoteDriver for CjrRemoteDriver {
    fn connect(&mut self, resource: &Resource, x11: bool) -> ValidatedOutput<()> {
        self.open_master(resource, x11).with_value(())
    }

    fn disconnect(&mut self, resource: &Resource, x11: bool) -> ValidatedOutput<()> {
        let selected = self.select(resource);
        if !selected.success {
            return selected;
        }
        self.ssh.multiplex_stop(multiplex_tag(x11))
    }

    fn job_start(
        &mut self,
        resource: &Resource,
        job: &RemoteJobOptions,
        options: &RemoteStartOptions,
    ) -> ValidatedOutput<()> {
        let project_id = match job.host_root.as_deref() {
            Some(root) => match ensure_project_id(root) {
                Ok(id) => id,
                Err(e) => return ValidatedOutput::from_error(e),
            },
            None => EMPTY_PROJECT_ID.to_string(),
        };
        let configuration = self.load_stack(job);
        if !configuration.success {
            return configuration.with_value(());
        }

        let connection = self.init_connection(resource, job.x11);
        if !connection.success {
            return connection.with_value(());
        }
        let _session = self.session(job.x11, connection.value);

        let mut result = ValidatedOutput::ok(());
        result.absorb(&configuration);
        let dirs = self.upload_dirs(resource, &configuration.value, job, &project_id, options);
        result.absorb(&dirs);
        if !result.success {
            return result;
        }
        let dirs = dirs.value;

        result.absorb(&self.push_stack(&configuration.value, &dirs.stack_path));
        if !result.success {
            return result;
        }
        if let (Some(local), Some(remote)) = (job.host_root.as_deref(), dirs.project_root.as_deref()) {
            result.absorb(&self.push_project_files(&configuration.value, local, remote));
            if !result.success {
                return result;
            }
        }

        info!(host = %resource.address, stack = %dirs.stack_path, "starting remote job");
        result.absorb(&self.start_job(job, &dirs, &project_id, Launch::Run, options.auto_copy));
        if result.success && options.auto_copy && job.synchronous {
            if let (Some(local), Some(remote)) = (job.host_root.as_deref(), dirs.project_root.as_deref()) {
                result.absorb(&self.pull_project_files(local, remote, &dirs.stack_path, CopyMode::Update));
            }
        }
        result
    }

    fn job_exec(
        &mut self,
        resource: &Resource,
        job: &RemoteJobOptions,
        options: &RemoteExecOptions,
    ) -> ValidatedOutput<()> {
        if options.id.trim().is_empty() {
            return ValidatedOutput::failed(errors::empty_id());
        }
        let configuration = self.load_stack(job);
        if !configuration.success {
            return configuration.with_value(());
        }

        let connection = self.init_connection(resource, job.x11);
        if !connection.success {
            return connection.with_value(());
        }
        let _session = self.session(job.x11, connection.value);

        let found = self.job_labels(std::slice::from_ref(&options.id));
        if !found.success {
            return found.with_value(());
        }
        let Some((parent_id, parent)) = found.value.iter().next() else {
            return ValidatedOutput::failed(errors::no_matching_id());
        };
        let remote_project_id = parent
            .get(labels::PROJECT_ID)
            .cloned()
            .unwrap_or_else(|| EMPTY_PROJECT_ID.to_string());
        let local_project_id = match options.host_project_root.as_deref() {
            Some(root) => match ensure_project_id(root) {
                Ok(id) => id,
                Err(e) => return ValidatedOutput::from_error(e),
            },
            None => EMPTY_PROJECT_ID.to_string(),
        };
        // Local paths only mean something when the job came from this project.
        let host_root = if local_project_id == remote_project_id {
            options.host_project_root.clone()
        } else {
            None
        };

        let mut result = ValidatedOutput::ok(());
        result.absorb(&configuration);
        let stacks = self.make_dirs(&upload::stack_dir_request(
            options.stack_upload_mode,
            &resource.storage_dir,
            &remote_project_id,
            parent.get(labels::REMOTE_JOB_DIR).map(String::as_str),
        ));
        result.absorb(&stacks);
        if !result.success {
            return result;
        }
        let stack_path = upload::stack_path(
            options.stack_upload_mode,
            &stacks.value,
            &remote_project_id,
            &configuration.value.safe_stack_name(),
        );
        let job_dir = match options.stack_upload_mode {
            UploadMode::Cached => stack_path.clone(),
            UploadMode::Uncached => posix_dirname(&stack_path),
        };
        let dirs = JobDirs {
            job_dir,
            project_root: parent
                .get(labels::PROJECT_ROOT)
                .filter(|root| !root.is_empty())
                .cloned(),
            stack_path,
        };

        result.absorb(&self.push_stack(&configuration.value, &dirs.stack_path));
        if !result.success {
            return result;
        }

        let job = RemoteJobOptions {
            host_root,
            ..job.clone()
        };
        let launch = match options.mode {
            RemoteExecMode::Exec => Launch::Exec(parent_id),
            RemoteExecMode::Shell => Launch::Shell(parent_id),
            RemoteExecMode::Jupyter(server) => Launch::Jupyter(parent_id, server),
        };
        result.absorb(&self.start_job(&job, &dirs, &remote_project_id, launch, false));
        result
    }

    fn job_copy(&mut self, resource: &Resource, options: &RemoteCopyOptions) -> ValidatedOutput<Vec<String>> {
        if options.ids.is_empty() {
            return ValidatedOutput::failed(errors::empty_id());
        }
        let host_path = match options.host_path.as_deref() {
            Some(path) if !path.as_os_str().is_empty() => path,
            _ => return ValidatedOutput::failed(errors::empty_local_host_root()),
        };

        let connection = self.init_connection(resource, false);
        if !connection.success {
            return connection.with_value(Vec::new());
        }
        let _session = self.session(false, connection.value);

        let found = self.job_labels(&options.ids);
        if !found.success {
            return found.with_value(Vec::new());
        }
        let local_project_id = get_project_id(host_path);
        let copy_flags = Flags::new()
            .value("mode", options.mode.as_str())
            .switch_if("verbose", self.output.verbose)
            .switch_if("explicit", self.output.explicit)
            .switch_if("quiet", self.output.quiet);

        let mut result = ValidatedOutput::ok(Vec::new());
        for (id, job_labels) in &found.value {
            let Some(remote_root) = job_labels
                .get(labels::PROJECT_ROOT)
                .filter(|root| !root.is_empty())
            else {
                warn!(id = %id, "remote job has no project root");
                result.push_warning(errors::missing_remote_project_root(id));
                continue;
            };
            if !options.force && job_labels.get(labels::PROJECT_ID) != local_project_id.as_ref() {
                result.push_warning(errors::differing_project_id(id));
                continue;
            }

            // Bring volume contents back to the remote project root first.
            let copied = self.ssh.exec(
                &RemoteCommand::JobCp.command_line(),
                &copy_flags,
                &args([id]),
                SshOptions::interactive(),
            );
            if !copied.success {
                result.absorb(&copied);
                continue;
            }

            let remote_stack = job_labels
                .get(labels::STACK_PATH)
                .map(String::as_str)
                .unwrap_or_default();
            let pulled = self.pull_project_files(host_path, remote_root, remote_stack, options.mode);
            result.absorb(&pulled);
            if pulled.success {
                result.value.push(id.clone());
            }
        }
        result
    }

    fn job_delete(&mut self, resource: &Resource, options: &RemoteDeleteOptions) -> ValidatedOutput<()> {
        let mut result = ValidatedOutput::ok(());
        if options.ids.is_empty() {
            result.push_warning(errors::empty_id());
            return result;
        }

        let connection = self.init_connection(resource, false);
        if !connection.success {
            return connection.with_value(());
        }
        let _session = self.session(false, connection.value);

        let found = self.job_labels(&options.ids);
        if !found.success {
            return found.with_value(());
        }

        let storage = resource.storage_dir.as_str();
        let mut ids = Vec::new();
        let mut job_dirs = BTreeSet::new();
        let mut stacks = BTreeSet::new();
        for (id, job_labels) in &found.value {
            let job_dir = job_labels
                .get(labels::REMOTE_JOB_DIR)
                .map(String::as_str)
                .unwrap_or_default();
            if !upload::is_within_storage(job_dir, storage) {
                warn!(id = %id, job_dir, "not deleting remote job outside storage");
                result.push_warning(errors::remote_job_outside_storage(id));
                continue;
            }
            ids.push(id.clone());
            job_dirs.insert(job_dir.to_string());
            if let Some(stack) = job_labels.get(labels::STACK_PATH) {
                if upload::is_within_storage(stack, storage) {
                    stacks.insert(stack.clone());
                }
            }
        }
        if ids.is_empty() {
            result.push_warning(errors::no_matching_remote_jobs());
            return result;
        }

        let flags = Flags::new()
            .switch_if("explicit", self.output.explicit)
            .switch_if("quiet", self.output.quiet);
        result.absorb(&self.ssh.exec(
            &RemoteCommand::JobRm.command_line(),
            &flags,
            &args(&ids),
            SshOptions::interactive(),
        ));
        if options.delete_images && !stacks.is_empty() {
            result.absorb(&self.ssh.exec(
                &format!("{} stack rmi", CLI_NAME),
                &flags.clone().switch("all"),
                &args(&stacks),
                SshOptions::interactive(),
            ));
        }
        if options.delete_files {
            job_dirs.extend(stacks);
            result.absorb(&self.ssh.exec(
                "rm",
                &Flags::new().switch("r").switch("f"),
                &args(&job_dirs),
                SshOptions::default(),
            ));
        }
        result
    }

    fn job_attach(&mut self, resource: &Resource, flags: &RemoteFlags, id: Option<&str>) -> ValidatedOutput<()> {
        let ids: Vec<String> = id.map(str::to_string).into_iter().collect();
        self.forward(resource, RemoteCommand::JobAttach, flags, &ids)
    }

    fn job_log(&mut self, resource: &Resource, flags: &RemoteFlags, id: Option<&str>) -> ValidatedOutput<()> {
        let ids: Vec<String> = id.map(str::to_string).into_iter().collect();
        self.forward(resource, RemoteCommand::JobLog, flags, &ids)
    }

    fn job_list(&mut self, resource: &Resource, flags: &RemoteFlags) -> ValidatedOutput<()> {
        self.forward(resource, RemoteCommand::JobLs, flags, &[])
    }

    fn job_state(&mut self, resource: &Resource, id: &str) -> ValidatedOutput<()> {
        let selected = self.select(resource);
        if !selected.success {
            return selected;
        }
        self.ssh
            .exec(
                &format!("{} job state", CLI_NAME),
                &Flags::new(),
                &args([id]),
                SshOptions::interactive(),
            )
            .with_value(())
    }

    fn job_stop(&mut self, resource: &Resource, flags: &RemoteFlags, ids: &[String]) -> ValidatedOutput<()> {
        self.forward(resource, RemoteCommand::JobStop, flags, ids)
    }

    fn job_info(&mut self, resource: &Resource, states: &[JobState]) -> ValidatedOutput<Vec<JobInfo>> {
        let selected = self.select(resource);
        if !selected.success {
            return selected.with_value(Vec::new());
        }
        let raw = self.ssh.output(
            &RemoteCommand::JobLs.command_line(),
            &Flags::new().switch("json"),
            &[],
            SshOptions::default(),
        );
        if !raw.success {
            return raw.with_value(Vec::new());
        }
        match serde_json::from_str::<Vec<JobInfo>>(raw.value.trim()) {
            Ok(jobs) => ValidatedOutput::ok(filter_by_state(&jobs, states).into_iter().cloned().collect()),
            Err(_) => ValidatedOutput::failed(errors::invalid_json(&raw.value)),
        }
    }

    fn jupyter_stop(&mut self, resource: &Resource, id: &str) -> ValidatedOutput<()> {
        let selected = self.select(resource);
        if !selected.success {
            return selected;
        }
        let mut result = ValidatedOutput::ok(());
        if self.ssh.multiplex_exists(X11_MULTIPLEX_TAG) {
            result.absorb(&self.ssh.multiplex_stop(X11_MULTIPLEX_TAG));
        }
        result.absorb(&self.jupyter_line("stop", id, true));
        result
    }

    fn jupyter_list(&mut self, resource: &Resource, id: &str) -> ValidatedOutput<()> {
        let selected = self.select(resource);
        if !selected.success {
            return selected;
        }
        self.jupyter_line("list", id, true).with_value(())
    }

    fn jupyter_url(&mut self, resource: &Resource, id: &str) -> ValidatedOutput<String> {
        let selected = self.select(resource);
        if !selected.success {
            return selected.with_value(String::new());
        }
        let raw = self.jupyter_line("url", id, false);
        if !raw.success {
            return raw;
        }
        let Some(url) = jupyter::find_url(&raw.value) else {
            return ValidatedOutput::failed(errors::jupyter_url_missing(id));
        };
        raw.with_value(jupyter::with_host(&url, &resource.address))
    }
}
