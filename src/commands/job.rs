//! Local job commands: `run` and `job ...`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::{Context, Output};
use crate::cli::{JobArgs, Selector};
use crate::config::{FileAccess, RunMode};
use crate::drivers::{
    ExecMode, ExecSpec, JobHooks, JobInfo, JobSpec, JobState, RunDriver, build_and_load, labels,
};
use crate::jobs::{CopyMode, JobRecord, match_id, match_ids};
use crate::project::{container_working_dir, posix_join};
use crate::shell::rsync::{contents_of, rule_flags, scratch_dir};
use crate::shell::{ExecOptions, Flags, args};
use crate::stack::{DEFAULT_CONTAINER_ROOT, Mount, RsyncFiles, StackConfiguration};
use crate::{CLI_NAME, ValidatedOutput, errors};

/// Values of the `jobtype` label.
pub mod job_types {
    pub const RUN: &str = "run";
    pub const EXEC: &str = "exec";
    pub const SHELL: &str = "shell";
    /// Project files saved in a volume; the job runs nothing.
    pub const STASH: &str = "stash";
    pub const JUPYTER: &str = "jupyter";
}

const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";

// ============================================================================
// Outputs
// ============================================================================

/// A job that was started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStarted {
    pub id: String,
    pub synchronous: bool,
}

impl Output for JobStarted {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Attached jobs already showed their output; detached ones print their id.
    fn to_human(&self) -> String {
        if self.synchronous || self.id.is_empty() {
            String::new()
        } else {
            self.id.clone()
        }
    }
}

/// `job ls`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobList {
    pub jobs: Vec<JobInfo>,
    /// Columns of the human table.
    pub fields: Vec<String>,
}

fn field_text(job: &serde_json::Value, field: &str) -> String {
    match job.get(field) {
        None | Some(serde_json::Value::Null) => String::new(),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(","),
        Some(other) => other.to_string(),
    }
}

impl JobList {
    fn table(&self, jobs: &[&JobInfo]) -> String {
        let mut rows: Vec<Vec<String>> = vec![self.fields.iter().map(|f| f.to_uppercase()).collect()];
        for job in jobs {
            let value = serde_json::to_value(job).unwrap_or_default();
            rows.push(
                self.fields
                    .iter()
                    .map(|field| {
                        let text = field_text(&value, field);
                        if field == "id" {
                            text.chars().take(12).collect()
                        } else {
                            text
                        }
                    })
                    .collect(),
            );
        }
        let widths: Vec<usize> = (0..self.fields.len())
            .map(|col| rows.iter().map(|r| r[col].chars().count()).max().unwrap_or(0))
            .collect();
        rows.iter()
            .map(|row| {
                row.iter()
                    .zip(&widths)
                    .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
                    .collect::<Vec<_>>()
                    .join("  ")
                    .trim_end()
                    .to_string()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Output for JobList {
    /// A plain array, as read back by remote drivers.
    fn to_json(&self) -> String {
        serde_json::to_string(&self.jobs).unwrap_or_default()
    }

    /// One table per group: running jobs, the rest, then stashes.
    fn to_human(&self) -> String {
        if self.jobs.is_empty() {
            return "No jobs.".to_string();
        }
        let is_stash = |job: &JobInfo| job.label(labels::JOB_TYPE) == Some(job_types::STASH);
        let mut running = Vec::new();
        let mut completed = Vec::new();
        let mut stashes = Vec::new();
        for job in &self.jobs {
            if is_stash(job) {
                stashes.push(job);
            } else if job.status == JobState::Running {
                running.push(job);
            } else {
                completed.push(job);
            }
        }
        [("Running Jobs", running), ("Completed Jobs", completed), ("Stashes", stashes)]
            .into_iter()
            .filter(|(_, jobs)| !jobs.is_empty())
            .map(|(title, jobs)| format!("{}\n{}", title, self.table(&jobs)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// `job labels`: labels keyed by job id, in the order the ids matched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobLabelsOutput(pub IndexMap<String, BTreeMap<String, String>>);

impl Output for JobLabelsOutput {
    fn to_json(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        for (id, job_labels) in &self.0 {
            lines.push(id.clone());
            for (key, value) in job_labels {
                lines.push(format!("  {}={}", key, value));
            }
        }
        lines.join("\n")
    }
}

/// `job state`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobStateOutput {
    pub id: String,
    pub state: Option<JobState>,
}

impl Output for JobStateOutput {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        self.state.map(|s| s.to_string()).unwrap_or_default()
    }
}

/// Jobs changed by a batch command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JobsChanged {
    pub action: String,
    pub ids: Vec<String>,
}

impl JobsChanged {
    pub(crate) fn new(action: &str, ids: Vec<String>) -> Self {
        Self {
            action: action.to_string(),
            ids,
        }
    }
}

impl Output for JobsChanged {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.ids.is_empty() {
            return String::new();
        }
        let short: Vec<String> = self.ids.iter().map(|id| id.chars().take(12).collect()).collect();
        format!("{} {}", self.action, short.join(" "))
    }
}

/// `job info`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobDetails(pub Option<JobRecord>);

impl Output for JobDetails {
    fn to_json(&self) -> String {
        serde_json::to_string_pretty(&self.0).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        let Some(record) = &self.0 else {
            return String::new();
        };
        let none = || "-".to_string();
        let rows = [
            ("ID", record.id.clone()),
            ("Stack", record.stack_path.clone()),
            ("Image", record.image.clone()),
            ("Command", record.command.clone()),
            ("Project root", record.project_root.clone().unwrap_or_else(none)),
            ("Container root", record.container_root.clone()),
            ("File access", record.file_access.clone()),
            ("File volume", record.file_volume.clone().unwrap_or_else(none)),
            ("Message", record.message.clone().unwrap_or_else(none)),
            (
                "Mode",
                if record.synchronous { "sync" } else { "async" }.to_string(),
            ),
            ("Created", record.created_at.to_rfc3339()),
        ];
        rows.iter()
            .map(|(name, value)| format!("{:<15} {}", format!("{}:", name), value))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// Job files
// ============================================================================

/// Where a job's project files come from and where they appear in the job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct JobFiles {
    host_root: Option<PathBuf>,
    container_root: String,
    access: FileAccess,
    /// Named volume holding a copy of the project.
    volume: Option<String>,
}

impl JobFiles {
    fn from_labels(job: &JobInfo) -> Self {
        Self {
            host_root: job
                .label(labels::PROJECT_ROOT)
                .filter(|root| !root.is_empty())
                .map(PathBuf::from),
            container_root: job
                .label(labels::CONTAINER_ROOT)
                .unwrap_or(DEFAULT_CONTAINER_ROOT)
                .to_string(),
            access: job
                .label(labels::FILE_ACCESS)
                .and_then(FileAccess::parse)
                .unwrap_or_default(),
            volume: job
                .label(labels::FILE_VOLUME)
                .filter(|volume| !volume.is_empty())
                .map(str::to_string),
        }
    }

    /// `<container-root>/<project name>`.
    fn mount_point(&self) -> Option<String> {
        let name = self.host_root.as_ref()?.file_name()?.to_string_lossy().into_owned();
        Some(posix_join(&self.container_root, &name))
    }

    fn labels(&self) -> Vec<(String, String)> {
        let mut out = vec![
            (labels::CONTAINER_ROOT.to_string(), self.container_root.clone()),
            (labels::FILE_ACCESS.to_string(), self.access.to_string()),
        ];
        if let Some(root) = &self.host_root {
            out.push((labels::PROJECT_ROOT.to_string(), root.to_string_lossy().into_owned()));
        }
        if let Some(volume) = &self.volume {
            out.push((labels::FILE_VOLUME.to_string(), volume.clone()));
        }
        out
    }

    fn mount(&self, configuration: &mut StackConfiguration) {
        let (Some(root), Some(point)) = (self.host_root.as_ref(), self.mount_point()) else {
            return;
        };
        match &self.volume {
            Some(volume) => configuration.add_mount(Mount::volume(volume.clone(), point)),
            None => configuration.add_bind(root.to_string_lossy(), point),
        }
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Copy a job's project files into `dest`.
///
/// Volume jobs are copied out of the container first; bind jobs are copied
/// from their project root, which is a no-op when `dest` is that root.
fn copy_job_files(
    ctx: &Context,
    runner: &dyn RunDriver,
    id: &str,
    files: &JobFiles,
    dest: &Path,
    mode: CopyMode,
    rules: &RsyncFiles,
) -> ValidatedOutput<()> {
    let scratch: TempDir;
    let source = match (&files.volume, files.mount_point()) {
        (Some(_), Some(point)) => {
            scratch = match scratch_dir(&ctx.paths.job_copy_dir(), "job-") {
                Ok(dir) => dir,
                Err(e) => return ValidatedOutput::from_error(e),
            };
            let copied = runner.job_copy_out(id, &point, scratch.path());
            if !copied.success {
                return copied;
            }
            scratch.path().to_path_buf()
        }
        _ => match &files.host_root {
            Some(root) => root.clone(),
            None => return ValidatedOutput::failed(errors::missing_project_root(id)),
        },
    };
    if same_dir(&source, dest) {
        debug!(id, "job files are already in place");
        return ValidatedOutput::ok(());
    }
    if let Err(e) = fs::create_dir_all(dest) {
        return ValidatedOutput::from_error(e.into());
    }

    let mut flags = Flags::new().switch("a").switch_if("v", ctx.output.verbose);
    flags.extend(mode.rsync_flags());
    let flags = rule_flags(
        flags,
        rules.download_include.as_deref().map(Path::new),
        rules.download_exclude.as_deref().map(Path::new),
    );
    let paths = [
        contents_of(&source).to_string_lossy().into_owned(),
        contents_of(dest).to_string_lossy().into_owned(),
    ];
    info!(id, dest = %dest.display(), mode = %mode, "copying job files");
    ctx.shell
        .exec("rsync", &flags, &args(paths), &ExecOptions::new())
        .with_value(())
}

/// Download rules of the stack a job was started from.
fn download_rules(ctx: &Context, job: &JobInfo) -> RsyncFiles {
    if job.stack.is_empty() {
        return RsyncFiles::default();
    }
    StackConfiguration::open(&job.stack, &[], &ctx.settings.image_tag)
        .value
        .rsync_files()
}

// ============================================================================
// Starting jobs
// ============================================================================

pub(crate) fn synchronous(ctx: &Context, job: &JobArgs) -> bool {
    if job.sync {
        true
    } else if job.async_mode {
        false
    } else {
        ctx.settings.job_default_run_mode == RunMode::Sync
    }
}

/// Bind the X11 socket directory and pass DISPLAY through.
fn share_x11(configuration: &mut StackConfiguration) -> ValidatedOutput<()> {
    let mut result = ValidatedOutput::ok(());
    if !cfg!(target_os = "linux") {
        result.push_warning(errors::x11_unavailable());
        return result;
    }
    let dir = Path::new(X11_SOCKET_DIR);
    if !dir.is_dir() {
        result.push_warning(errors::x11_missing_dir(X11_SOCKET_DIR));
        return result;
    }
    let has_socket = fs::read_dir(dir)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false);
    if !has_socket {
        result.push_warning(errors::x11_missing_socket(X11_SOCKET_DIR));
        return result;
    }
    configuration.add_bind(X11_SOCKET_DIR, X11_SOCKET_DIR);
    let display = std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string());
    configuration.add_env("DISPLAY", display);
    result
}

/// Mount project files and apply the per-job flags to a loaded stack.
fn apply_job_args(
    ctx: &Context,
    configuration: &mut StackConfiguration,
    files: &JobFiles,
    job: &JobArgs,
) -> ValidatedOutput<()> {
    let mut result = ValidatedOutput::ok(());
    files.mount(configuration);
    if let Some(root) = files.host_root.as_deref() {
        let host_dir = ctx.host_dir(job.working_directory.as_deref());
        if let Some(dir) = container_working_dir(&host_dir, root, &files.container_root) {
            configuration.set_working_dir(dir);
        }
    }
    for port in &job.ports {
        configuration.add_port(port.clone());
    }
    if job.x11 {
        result.absorb(&share_x11(configuration));
    }
    result
}

fn job_labels(
    configuration: &StackConfiguration,
    files: &JobFiles,
    job_type: &str,
    job: &JobArgs,
) -> Vec<(String, String)> {
    let mut out = vec![
        (labels::STACK_PATH.to_string(), configuration.stack_path().to_string()),
        (labels::JOB_TYPE.to_string(), job_type.to_string()),
    ];
    out.extend(files.labels());
    if let Some(message) = &job.message {
        out.push((labels::MESSAGE.to_string(), message.clone()));
    }
    out.extend(job.labels.iter().cloned());
    out
}

/// A job ready to start.
struct Launch {
    configuration: StackConfiguration,
    files: JobFiles,
    spec: JobSpec,
    message: Option<String>,
    /// `files.volume` was created for this job and still needs the project.
    fresh_volume: bool,
    autocopy: bool,
}

fn start(ctx: &Context, runner: &dyn RunDriver, launch: Launch) -> ValidatedOutput<JobStarted> {
    let Launch {
        configuration,
        files,
        spec,
        message,
        fresh_volume,
        autocopy,
    } = launch;
    let records = ctx.records();
    let record = JobRecord {
        id: String::new(),
        stack_path: configuration.stack_path().to_string(),
        image: configuration.image_name(),
        command: spec.command.clone(),
        project_root: files.host_root.as_ref().map(|r| r.to_string_lossy().into_owned()),
        container_root: files.container_root.clone(),
        file_access: files.access.to_string(),
        file_volume: files.volume.clone(),
        message,
        synchronous: spec.synchronous,
        created_at: Utc::now(),
    };
    let copy_in = if fresh_volume {
        files.host_root.clone().zip(files.mount_point())
    } else {
        None
    };

    let hooks = JobHooks {
        post_create: Some(Box::new(|id: &str| {
            let mut result = ValidatedOutput::ok(());
            if let Some((root, point)) = &copy_in {
                result.absorb(&runner.job_copy_in(id, root, point));
                if !result.success {
                    return result;
                }
            }
            let record = JobRecord {
                id: id.to_string(),
                ..record
            };
            if let Err(e) = records.write(&record) {
                warn!(id, error = %e, "unable to write job record");
                result.push_warning(e.to_string());
            }
            result
        })),
        post_exec: Some(Box::new(|started: &ValidatedOutput<String>| {
            info!(id = %started.value, success = started.success, "job start finished");
        })),
    };
    let started = runner.job_start(&configuration, &spec, hooks);
    let id = started.value.clone();
    let mut result = started.with_value(JobStarted {
        id: id.clone(),
        synchronous: spec.synchronous,
    });

    if id.is_empty() {
        if let (true, Some(volume)) = (fresh_volume, &files.volume) {
            result.absorb(&runner.volume_delete(std::slice::from_ref(volume)));
        }
        return result;
    }
    if spec.synchronous && spec.remove {
        if let Err(e) = records.remove(&id) {
            result.push_warning(e.to_string());
        }
    }
    if result.success && spec.synchronous && autocopy && files.volume.is_some() {
        if let Some(root) = files.host_root.as_deref() {
            let rules = configuration.rsync_files();
            result.absorb(&copy_job_files(ctx, runner, &id, &files, root, CopyMode::Update, &rules));
        }
    }
    result
}

/// `run`: start a job from a stack.
pub fn run(ctx: &Context, job: &JobArgs, command: &[String]) -> ValidatedOutput<JobStarted> {
    start_new(ctx, job, command.join(" "), job_types::RUN)
}

/// `job stash`: copy the project into a volume held by a job that runs
/// nothing, so the files can later be shelled into or copied back.
pub fn stash(ctx: &Context, job: &JobArgs) -> ValidatedOutput<JobStarted> {
    let args = JobArgs {
        file_access: Some(FileAccess::Volume.to_string()),
        sync: false,
        async_mode: true,
        autocopy: false,
        ..job.clone()
    };
    start_new(ctx, &args, "true".to_string(), job_types::STASH)
}

/// Start a job with fresh project files.
fn start_new(ctx: &Context, job: &JobArgs, command: String, job_type: &str) -> ValidatedOutput<JobStarted> {
    let stack_path = ctx.resolve_stack(job.stack.as_deref());
    if !stack_path.success {
        return stack_path.with_value(JobStarted::default());
    }
    let (builder, runner) = ctx.drivers();
    let loaded = build_and_load(builder.as_ref(), &job.build_mode, &stack_path.value, &job.config_files);
    let mut result = ValidatedOutput::ok(JobStarted::default());
    result.absorb(&loaded);
    if !loaded.success {
        return result;
    }
    let mut configuration = loaded.value;

    let access = job
        .file_access
        .as_deref()
        .and_then(FileAccess::parse)
        .unwrap_or(ctx.settings.file_access);
    let mut files = JobFiles {
        host_root: ctx.project_root(job.project_root.as_deref()),
        container_root: configuration.container_root(),
        access,
        volume: None,
    };
    let fresh_volume = access == FileAccess::Volume && files.host_root.is_some();
    if fresh_volume {
        let created = runner.volume_create(&[
            (labels::RUNNER.to_string(), CLI_NAME.to_string()),
            (labels::STACK_PATH.to_string(), configuration.stack_path().to_string()),
        ]);
        result.absorb(&created);
        if !created.success {
            return result;
        }
        files.volume = Some(created.value);
    }

    result.absorb(&apply_job_args(ctx, &mut configuration, &files, job));
    let spec = JobSpec {
        command,
        synchronous: synchronous(ctx, job),
        interactive: true,
        remove: false,
        name: None,
        labels: job_labels(&configuration, &files, job_type, job),
    };
    let started = start(
        ctx,
        runner.as_ref(),
        Launch {
            configuration,
            files,
            spec,
            message: job.message.clone(),
            fresh_volume,
            autocopy: job.autocopy || ctx.settings.autocopy_sync_job,
        },
    );
    result.absorb(&started);
    result.value = started.value;
    result
}

/// What a job started from an existing one runs.
pub(crate) struct FollowUp {
    pub command: String,
    pub job_type: &'static str,
    /// Remove the job once it exits.
    pub remove: bool,
    pub name: Option<String>,
}

/// Start a job that shares the files of the job matching `id`.
fn start_from(ctx: &Context, job: &JobArgs, id: Option<&str>, follow: FollowUp) -> ValidatedOutput<JobStarted> {
    let (_, runner) = ctx.drivers();
    let parent = select_one(ctx, runner.as_ref(), id);
    if !parent.success {
        return parent.with_value(JobStarted::default());
    }
    let Some(found) = parent.value.clone() else {
        return parent.with_value(JobStarted::default());
    };
    let mut result = parent.with_value(JobStarted::default());
    let started = start_with_parent(ctx, job, &found, follow);
    result.absorb(&started);
    result.value = started.value;
    result
}

/// Start a job that shares the files of `parent`.
pub(crate) fn start_with_parent(
    ctx: &Context,
    job: &JobArgs,
    parent: &JobInfo,
    follow: FollowUp,
) -> ValidatedOutput<JobStarted> {
    let (builder, runner) = ctx.drivers();
    let stack_path = match job.stack.as_deref() {
        Some(stack) => ctx.resolve_stack(Some(stack)),
        None if !parent.stack.is_empty() => ValidatedOutput::ok(parent.stack.clone()),
        None => ValidatedOutput::failed(errors::missing_stack()),
    };
    if !stack_path.success {
        return stack_path.with_value(JobStarted::default());
    }
    let loaded = build_and_load(builder.as_ref(), &job.build_mode, &stack_path.value, &job.config_files);
    let mut result = ValidatedOutput::ok(JobStarted::default());
    result.absorb(&loaded);
    if !loaded.success {
        return result;
    }
    let mut configuration = loaded.value;

    let files = JobFiles::from_labels(parent);
    result.absorb(&apply_job_args(ctx, &mut configuration, &files, job));
    let FollowUp {
        command,
        job_type,
        remove,
        name,
    } = follow;
    let synchronous = job_type == job_types::SHELL || synchronous(ctx, job);
    let spec = JobSpec {
        command,
        synchronous,
        interactive: true,
        remove,
        name,
        labels: job_labels(&configuration, &files, job_type, job),
    };
    debug!(parent = %parent.id, job_type, "starting job from existing job");
    let started = start(
        ctx,
        runner.as_ref(),
        Launch {
            configuration,
            files,
            spec,
            message: job.message.clone(),
            fresh_volume: false,
            autocopy: job.autocopy,
        },
    );
    result.absorb(&started);
    result.value = started.value;
    result
}

/// `job exec`: new job sharing the files of an existing one.
pub fn exec(ctx: &Context, job: &JobArgs, id: &str, command: &[String]) -> ValidatedOutput<JobStarted> {
    let follow = FollowUp {
        command: command.join(" "),
        job_type: job_types::EXEC,
        remove: false,
        name: None,
    };
    start_from(ctx, job, Some(id), follow)
}

/// `job shell`: interactive shell sharing the files of an existing job.
pub fn shell(ctx: &Context, job: &JobArgs, id: Option<&str>, discard: bool) -> ValidatedOutput<JobStarted> {
    let follow = FollowUp {
        command: ctx.settings.container_default_shell.clone(),
        job_type: job_types::SHELL,
        remove: discard,
        name: None,
    };
    start_from(ctx, job, id, follow)
}

// ============================================================================
// Selecting jobs
// ============================================================================

/// Jobs matching typed IDs or a batch selector, in match order.
fn select_jobs(
    ctx: &Context,
    runner: &dyn RunDriver,
    ids: &[String],
    select: Selector,
) -> ValidatedOutput<Vec<JobInfo>> {
    let listed = runner.job_info(&[], &select.states());
    if !listed.success {
        return listed;
    }
    let matched = match_ids(ids, &listed.value, select.any(), ctx.prompt());
    let mut result = ValidatedOutput::ok(Vec::new());
    result.absorb(&listed);
    result.absorb(&matched);
    result.value = matched
        .value
        .iter()
        .filter_map(|id| listed.value.iter().find(|job| &job.id == id).cloned())
        .collect();
    result
}

/// The first job matching `id`; `None` if the user backed out of the prompt.
pub(crate) fn select_one(ctx: &Context, runner: &dyn RunDriver, id: Option<&str>) -> ValidatedOutput<Option<JobInfo>> {
    let listed = runner.job_info(&[], &[]);
    if !listed.success {
        return listed.with_value(None);
    }
    let matched = match_id(id.unwrap_or_default(), &listed.value, false, ctx.prompt());
    let job = matched
        .value
        .first()
        .and_then(|id| listed.value.iter().find(|job| &job.id == id))
        .cloned();
    let mut result = ValidatedOutput::ok(job);
    result.absorb(&listed);
    result.absorb(&matched);
    result
}

fn ids_of(jobs: &[JobInfo]) -> Vec<String> {
    jobs.iter().map(|job| job.id.clone()).collect()
}

// ============================================================================
// Job commands
// ============================================================================

/// `job ls`.
pub fn list(ctx: &Context, stack: Option<&str>, all: bool) -> ValidatedOutput<JobList> {
    let stacks = match stack {
        Some(stack) if !all => {
            let resolved = ctx.resolve_stack(Some(stack));
            if !resolved.success {
                return resolved.with_value(JobList::default());
            }
            vec![resolved.value]
        }
        _ => Vec::new(),
    };
    let (_, runner) = ctx.drivers();
    let fields = ctx.settings.job_ls_field_list();
    runner
        .job_info(&stacks, &[])
        .map(|jobs| JobList { jobs, fields })
}

/// `job labels`.
pub fn job_labels_of(ctx: &Context, ids: &[String], select: Selector) -> ValidatedOutput<JobLabelsOutput> {
    let (_, runner) = ctx.drivers();
    select_jobs(ctx, runner.as_ref(), ids, select).map(|jobs| {
        JobLabelsOutput(jobs.into_iter().map(|job| (job.id, job.labels)).collect())
    })
}

/// `job state`.
pub fn state(ctx: &Context, id: &str) -> ValidatedOutput<JobStateOutput> {
    let (_, runner) = ctx.drivers();
    let listed = runner.job_info(&[], &[]);
    if !listed.success {
        return listed.with_value(JobStateOutput::default());
    }
    let matched = match_id(id, &listed.value, false, None);
    let first = matched.value.first().cloned();
    let mut result = matched.with_value(JobStateOutput::default());
    if let Some(job) = listed.value.iter().find(|job| Some(&job.id) == first.as_ref()) {
        result.value = JobStateOutput {
            id: job.id.clone(),
            state: Some(job.status),
        };
    }
    result
}

/// `job log`.
pub fn log(ctx: &Context, id: Option<&str>, lines: Option<&str>, all: bool) -> ValidatedOutput<()> {
    let (_, runner) = ctx.drivers();
    let jobs = if all {
        runner.job_info(&[], &[])
    } else {
        select_one(ctx, runner.as_ref(), id).map(|job| job.into_iter().collect())
    };
    let ids = ids_of(&jobs.value);
    let mut result = jobs.with_value(());
    if !result.success {
        return result;
    }
    for job_id in ids {
        result.absorb(&runner.job_log(&job_id, lines));
    }
    result
}

/// `job attach`.
pub fn attach(ctx: &Context, id: Option<&str>) -> ValidatedOutput<()> {
    let (_, runner) = ctx.drivers();
    let job = select_one(ctx, runner.as_ref(), id);
    let (Some(found), true) = (job.value.clone(), job.success) else {
        return job.with_value(());
    };
    let mut result = job.with_value(());
    result.absorb(&runner.job_attach(&found.id));
    result
}

/// `job stop`.
pub fn stop(ctx: &Context, ids: &[String], select: Selector) -> ValidatedOutput<JobsChanged> {
    let (_, runner) = ctx.drivers();
    let jobs = select_jobs(ctx, runner.as_ref(), ids, select);
    if !jobs.success {
        return jobs.with_value(JobsChanged::default());
    }
    let ids = ids_of(&jobs.value);
    let mut result = jobs.with_value(JobsChanged::new("Stopped", Vec::new()));
    let stopped = runner.job_stop(&ids);
    result.absorb(&stopped);
    if stopped.success {
        result.value.ids = ids;
    }
    result
}

/// `job rm`: delete jobs, their records and file volumes no other job uses.
pub fn remove(ctx: &Context, ids: &[String], select: Selector) -> ValidatedOutput<JobsChanged> {
    let (_, runner) = ctx.drivers();
    let jobs = select_jobs(ctx, runner.as_ref(), ids, select);
    if !jobs.success {
        return jobs.with_value(JobsChanged::default());
    }
    let ids = ids_of(&jobs.value);
    let volumes: Vec<String> = jobs
        .value
        .iter()
        .filter_map(|job| job.label(labels::FILE_VOLUME))
        .filter(|volume| !volume.is_empty())
        .map(str::to_string)
        .collect();
    let mut result = jobs.with_value(JobsChanged::new("Removed", Vec::new()));
    let deleted = runner.job_delete(&ids);
    result.absorb(&deleted);

    if !volumes.is_empty() {
        let remaining = runner.job_info(&[], &[]);
        let in_use: Vec<&str> = remaining
            .value
            .iter()
            .filter(|job| !ids.contains(&job.id))
            .filter_map(|job| job.label(labels::FILE_VOLUME))
            .collect();
        let mut unused: Vec<String> = Vec::new();
        for volume in volumes {
            if !in_use.contains(&volume.as_str()) && !unused.contains(&volume) {
                unused.push(volume);
            }
        }
        result.absorb(&runner.volume_delete(&unused));
    }

    let records = ctx.records();
    for id in &ids {
        if let Err(e) = records.remove(id) {
            result.push_warning(e.to_string());
        }
    }
    if deleted.success {
        result.value.ids = ids;
    }
    result
}

/// `job cp`: copy job files to their project root or `copy_path`.
pub fn copy(
    ctx: &Context,
    ids: &[String],
    all: bool,
    mode: CopyMode,
    copy_path: Option<&Path>,
) -> ValidatedOutput<JobsChanged> {
    let (_, runner) = ctx.drivers();
    let select = Selector {
        all,
        ..Default::default()
    };
    let jobs = select_jobs(ctx, runner.as_ref(), ids, select);
    if !jobs.success {
        return jobs.with_value(JobsChanged::default());
    }
    let mut result = ValidatedOutput::ok(JobsChanged::new("Copied", Vec::new()));
    result.absorb(&jobs);
    let copy_path = copy_path.map(|p| ctx.cwd.join(p));
    for job in &jobs.value {
        let files = JobFiles::from_labels(job);
        let Some(dest) = copy_path.clone().or_else(|| files.host_root.clone()) else {
            warn!(id = %job.id, "job has no project root");
            result.push_warning(errors::missing_project_root(&job.id));
            continue;
        };
        let rules = download_rules(ctx, job);
        let copied = copy_job_files(ctx, runner.as_ref(), &job.id, &files, &dest, mode, &rules);
        result.absorb(&copied);
        if copied.success {
            result.value.ids.push(job.id.clone());
        }
    }
    result
}

/// `job enter`: run a command in a running job.
pub fn enter(
    ctx: &Context,
    id: Option<&str>,
    container_dir: Option<&str>,
    command: &[String],
) -> ValidatedOutput<()> {
    let (_, runner) = ctx.drivers();
    let job = select_one(ctx, runner.as_ref(), id);
    let (Some(found), true) = (job.value.clone(), job.success) else {
        return job.with_value(());
    };
    let command = if command.is_empty() {
        vec![ctx.settings.container_default_shell.clone()]
    } else {
        command.to_vec()
    };
    let spec = ExecSpec {
        interactive: true,
        detached: false,
        working_dir: container_dir.map(str::to_string),
    };
    runner
        .job_exec(&found.id, &command, &spec, ExecMode::Print)
        .with_value(())
}

/// `job commit`.
pub fn commit(ctx: &Context, id: &str, image: &str) -> ValidatedOutput<()> {
    let (_, runner) = ctx.drivers();
    let job = select_one(ctx, runner.as_ref(), Some(id));
    let (Some(found), true) = (job.value.clone(), job.success) else {
        return job.with_value(());
    };
    let mut result = job.with_value(());
    result.absorb(&runner.job_to_image(&found.id, image));
    result
}

/// `job info`: the record written when the job started.
pub fn details(ctx: &Context, id: Option<&str>) -> ValidatedOutput<JobDetails> {
    let (_, runner) = ctx.drivers();
    let job = select_one(ctx, runner.as_ref(), id);
    let (Some(found), true) = (job.value.clone(), job.success) else {
        return job.with_value(JobDetails::default());
    };
    let mut result = job.with_value(JobDetails::default());
    match ctx.records().read(&found.id) {
        Ok(Some(record)) => result.value = JobDetails(Some(record)),
        Ok(None) => {
            result.push_error(errors::missing_job_record(&found.id));
        }
        Err(e) => {
            result.push_error(e.to_string());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::commands::test_support::{FixedPrompt, context, script_jobs};
    use crate::shell::ProcessOutput;
    use crate::test_utils::ScriptedExecutor;

    /// A Dockerfile stack whose image already exists, and a project with a
    /// `.cjr` marker containing a `src` directory.
    fn workspace(exec: &Arc<ScriptedExecutor>, tmp: &TempDir) -> (Context, PathBuf) {
        let mut ctx = context(exec, tmp);
        let stack = ctx.settings.stacks_dir.join("fedora");
        fs::create_dir_all(&stack).unwrap();
        fs::write(stack.join("Dockerfile"), "FROM fedora\n").unwrap();
        fs::write(stack.join("config.yml"), "files:\n  container-root: /root\n").unwrap();
        let project = ctx.cwd.join("proj");
        fs::create_dir_all(project.join(".cjr")).unwrap();
        fs::create_dir_all(project.join("src")).unwrap();
        ctx.cwd = fs::canonicalize(project.join("src")).unwrap();
        exec.on("docker images", "{\"ID\":\"img\"}\n");
        (ctx, fs::canonicalize(project).unwrap())
    }

    fn job_args(stack: &str) -> JobArgs {
        JobArgs {
            stack: Some(stack.to_string()),
            async_mode: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_run_binds_project_and_stamps_labels() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let (ctx, project) = workspace(&exec, &tmp);
        exec.on("docker create", "c0ffee\n");

        let mut args = job_args("fedora");
        args.message = Some("nightly".into());
        let out = run(&ctx, &args, &["make".into(), "test".into()]);
        assert!(out.success, "{:?}", out.error);
        assert_eq!(out.value.id, "c0ffee");
        assert_eq!(out.value.to_human(), "c0ffee");

        let create = &exec.calls_matching("docker create")[0];
        assert!(create.contains("-w='/root/proj/src'"), "{}", create);
        assert!(
            create.contains(&format!("source='{}',destination='/root/proj'", project.display())),
            "{}",
            create
        );
        assert!(create.contains(&format!("--label='project-root={}'", project.display())));
        assert!(create.contains("--label='jobtype=run'"));
        assert!(create.contains("--label='message=nightly'"));
        assert!(create.ends_with("'sh' '-c' 'make test'"));
        assert_eq!(exec.calls_matching("docker start"), vec!["docker start 'c0ffee'"]);

        let record = ctx.records().read("c0ffee").unwrap().unwrap();
        assert_eq!(record.container_root, "/root");
        assert_eq!(record.message.as_deref(), Some("nightly"));
        assert!(!record.synchronous);
    }

    #[test]
    fn test_run_volume_copies_project_before_start() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let (ctx, project) = workspace(&exec, &tmp);
        exec.on("docker volume create", "vol1\n");
        exec.on("docker create", "c0ffee\n");

        let mut args = job_args("fedora");
        args.file_access = Some("volume".into());
        let out = run(&ctx, &args, &[]);
        assert!(out.success, "{:?}", out.error);

        let calls = exec.calls();
        let create = calls.iter().position(|c| c.starts_with("docker create")).unwrap();
        let copy = calls.iter().position(|c| c.starts_with("docker cp")).unwrap();
        let start = calls.iter().position(|c| c.starts_with("docker start")).unwrap();
        assert!(create < copy && copy < start);
        assert_eq!(
            calls[copy],
            format!("docker cp '{}/.' 'c0ffee:/root/proj'", project.display())
        );
        assert!(calls[create].contains("--mount=type=volume,source='vol1',destination='/root/proj'"));
        assert!(calls[create].contains("--label='filevolume=vol1'"));
    }

    #[test]
    fn test_stash_copies_project_into_volume_job() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let (ctx, _) = workspace(&exec, &tmp);
        exec.on("docker volume create", "vol1\n");
        exec.on("docker create", "5a5a5a\n");

        let mut args = job_args("fedora");
        args.async_mode = false;
        args.sync = true;
        let out = stash(&ctx, &args);
        assert!(out.success, "{:?}", out.error);
        assert_eq!(out.value.id, "5a5a5a");
        assert!(!out.value.synchronous);

        let create = &exec.calls_matching("docker create")[0];
        assert!(create.contains("--label='jobtype=stash'"), "{}", create);
        assert!(create.contains("--label='filevolume=vol1'"));
        assert!(create.ends_with("'sh' '-c' 'true'"));
        assert_eq!(exec.calls_matching("docker cp").len(), 1);
    }

    #[test]
    fn test_failed_create_removes_fresh_volume() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let (ctx, _) = workspace(&exec, &tmp);
        exec.on("docker volume create", "vol1\n");
        exec.fail("docker create", "no space left");

        let mut args = job_args("fedora");
        args.file_access = Some("volume".into());
        let out = run(&ctx, &args, &[]);
        assert!(!out.success);
        assert_eq!(exec.calls_matching("docker volume rm"), vec!["docker volume rm 'vol1'"]);
        assert!(exec.calls_matching("docker start").is_empty());
    }

    #[test]
    fn test_sync_volume_job_copies_back() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let (ctx, project) = workspace(&exec, &tmp);
        exec.on("docker volume create", "vol1\n");
        exec.on("docker create", "c0ffee\n");

        let args = JobArgs {
            stack: Some("fedora".into()),
            sync: true,
            file_access: Some("volume".into()),
            ..Default::default()
        };
        let out = run(&ctx, &args, &["make".into()]);
        assert!(out.success, "{:?}", out.error);
        assert_eq!(out.value.to_human(), "");

        let outbound = exec.calls_matching("docker cp 'c0ffee:/root/proj/.'");
        assert_eq!(outbound.len(), 1);
        let rsync = &exec.calls_matching("rsync")[0];
        assert!(rsync.starts_with("rsync -a --update"), "{}", rsync);
        assert!(rsync.ends_with(&format!("'{}/'", project.display())), "{}", rsync);
    }

    #[test]
    fn test_run_without_stack_fails_before_runtime() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        let out = run(&ctx, &JobArgs::default(), &[]);
        assert_eq!(out.error, vec![errors::missing_stack()]);
        assert!(exec.calls().is_empty());
    }

    #[test]
    fn test_exec_reuses_parent_files_and_stack() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let (ctx, _) = workspace(&exec, &tmp);
        let stack = ctx.resolve_stack(Some("fedora")).value;
        let labels = format!(
            "{{\"stack-path\":\"{}\",\"project-root\":\"/home/me/proj\",\"container-root\":\"/root\",\"filevolume\":\"vol1\",\"file-access\":\"volume\"}}",
            stack
        );
        script_jobs(&exec, &[("abc123", "Up 2 minutes", &labels)]);
        exec.on("docker create", "d00d\n");

        let out = exec_job(&ctx, "abc");
        assert!(out.success, "{:?}", out.error);
        let create = &exec.calls_matching("docker create")[0];
        assert!(create.contains("--mount=type=volume,source='vol1',destination='/root/proj'"));
        assert!(create.contains("--label='jobtype=exec'"));
        assert!(create.contains(&format!("--label='stack-path={}'", stack)));
        assert!(exec.calls_matching("docker volume create").is_empty());
        assert!(exec.calls_matching("docker cp").is_empty());
    }

    fn exec_job(ctx: &Context, id: &str) -> ValidatedOutput<JobStarted> {
        exec(ctx, &JobArgs::default(), id, &["ls".to_string()])
    }

    #[test]
    fn test_exec_unknown_id() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let (ctx, _) = workspace(&exec, &tmp);
        script_jobs(&exec, &[("abc123", "Up 2 minutes", "{}")]);
        let out = exec_job(&ctx, "zzz");
        assert_eq!(out.error, vec![errors::no_matching_id()]);
        assert!(exec.calls_matching("docker create").is_empty());
    }

    #[test]
    fn test_shell_discard_removes_container() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let (ctx, _) = workspace(&exec, &tmp);
        let stack = ctx.resolve_stack(Some("fedora")).value;
        script_jobs(
            &exec,
            &[("abc123", "Exited (0) 1 minute ago", &format!("{{\"stack-path\":\"{}\"}}", stack))],
        );
        exec.on("docker create", "d00d\n");
        let out = shell(&ctx, &JobArgs::default(), Some("abc"), true);
        assert!(out.success, "{:?}", out.error);
        let create = &exec.calls_matching("docker create")[0];
        assert!(create.starts_with("docker create --rm -i -t"), "{}", create);
        assert!(create.ends_with("'sh' '-c' 'bash'"), "{}", create);
        assert!(ctx.records().read("d00d").unwrap().is_none());
    }

    #[test]
    fn test_blank_id_without_prompt_is_invalid() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        script_jobs(&exec, &[("abc123", "Up 1 minute", "{}")]);
        let out = stop(&ctx, &[], Selector::default());
        assert_eq!(out.error, vec![errors::invalid_id()]);
        assert!(exec.calls_matching("docker stop").is_empty());
    }

    #[test]
    fn test_blank_id_uses_prompt() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp).with_prompt(Box::new(FixedPrompt(Some(1))));
        script_jobs(&exec, &[("aaa", "Up 1 minute", "{}"), ("bbb", "Up 1 minute", "{}")]);
        let out = stop(&ctx, &[], Selector::default());
        assert!(out.success);
        assert_eq!(out.value.ids, vec!["bbb".to_string()]);
        assert_eq!(exec.calls_matching("docker stop"), vec!["docker stop 'bbb'"]);
    }

    #[test]
    fn test_prompt_exit_does_nothing() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp).with_prompt(Box::new(FixedPrompt(None)));
        script_jobs(&exec, &[("aaa", "Up 1 minute", "{}")]);
        assert!(attach(&ctx, None).success);
        assert!(exec.calls_matching("docker attach").is_empty());
    }

    #[test]
    fn test_stop_all_running_filters_state() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        script_jobs(&exec, &[("aaa", "Up 1 minute", "{}")]);
        let select = Selector {
            all_running: true,
            ..Default::default()
        };
        let out = stop(&ctx, &[], select);
        assert!(out.success);
        assert!(exec.calls_matching("docker ps")[0].contains("--filter='status=running'"));
        assert_eq!(exec.calls_matching("docker stop"), vec!["docker stop 'aaa'"]);
    }

    #[test]
    fn test_remove_keeps_volumes_still_in_use() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        let ps_all = "{\"ID\":\"aaa\",\"Names\":\"a\",\"Command\":\"x\",\"Status\":\"Exited (0) 1 minute ago\"}\n\
                      {\"ID\":\"bbb\",\"Names\":\"b\",\"Command\":\"x\",\"Status\":\"Up 1 minute\"}\n\
                      {\"ID\":\"ccc\",\"Names\":\"c\",\"Command\":\"x\",\"Status\":\"Exited (0) 1 minute ago\"}\n";
        exec.on("docker ps", ps_all);
        exec.on(
            "docker inspect",
            "{\"ID\":\"aaa\",\"Labels\":{\"filevolume\":\"shared\"}}\n\
             {\"ID\":\"bbb\",\"Labels\":{\"filevolume\":\"shared\"}}\n\
             {\"ID\":\"ccc\",\"Labels\":{\"filevolume\":\"own\"}}\n",
        );
        let out = remove(&ctx, &["aaa".into(), "ccc".into()], Selector::default());
        assert!(out.success, "{:?}", out.error);
        assert_eq!(exec.calls_matching("docker rm"), vec!["docker rm 'aaa' 'ccc'"]);
        assert_eq!(exec.calls_matching("docker volume rm"), vec!["docker volume rm 'own'"]);
    }

    #[test]
    fn test_copy_skips_job_without_project_root() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        let dest = tmp.path().join("dest");
        let labels = format!(
            "{{\"project-root\":\"{}\",\"container-root\":\"/\",\"filevolume\":\"vol1\"}}",
            dest.display()
        );
        script_jobs(&exec, &[("aaa", "Exited (0) 1 minute ago", &labels), ("bbb", "Exited (0) 1 minute ago", "{}")]);

        let out = copy(&ctx, &[], true, CopyMode::Mirror, None);
        assert!(out.success, "{:?}", out.error);
        assert_eq!(out.value.ids, vec!["aaa".to_string()]);
        assert_eq!(out.warning, vec![errors::missing_project_root("bbb")]);
        assert_eq!(exec.calls_matching("docker cp").len(), 1);
        assert!(exec.calls_matching("docker cp")[0].starts_with("docker cp 'aaa:/dest/.'"));
        assert!(exec.calls_matching("rsync")[0].contains("--delete"));
    }

    #[test]
    fn test_copy_bind_job_into_its_own_root_is_noop() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        let root = tmp.path().join("proj");
        fs::create_dir_all(&root).unwrap();
        let labels = format!("{{\"project-root\":\"{}\"}}", root.display());
        script_jobs(&exec, &[("aaa", "Exited (0) 1 minute ago", &labels)]);
        let out = copy(&ctx, &["aaa".into()], false, CopyMode::Update, None);
        assert!(out.success);
        assert!(exec.calls_matching("rsync").is_empty());
    }

    #[test]
    fn test_labels_map_and_state() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        script_jobs(&exec, &[("abc123", "Exited (1) 2 hours ago", "{\"project-id\":\"p1\"}")]);

        let out = job_labels_of(&ctx, &["abc".into()], Selector::default());
        assert!(out.success);
        assert_eq!(out.value.to_json(), "{\"abc123\":{\"project-id\":\"p1\"}}");

        let state = state(&ctx, "abc");
        assert_eq!(state.value.to_human(), "exited");
        assert_eq!(
            state_missing(&ctx).error,
            vec![errors::no_matching_id()]
        );
    }

    fn state_missing(ctx: &Context) -> ValidatedOutput<JobStateOutput> {
        state(ctx, "zzz")
    }

    #[test]
    fn test_labels_keep_typed_order() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        script_jobs(&exec, &[("aaa111", "Up 1 minute", "{}"), ("zzz999", "Up 1 minute", "{}")]);

        let out = job_labels_of(&ctx, &["zzz".into(), "aaa".into()], Selector::default());
        assert!(out.success, "{:?}", out.error);
        assert_eq!(out.value.to_json(), "{\"zzz999\":{},\"aaa111\":{}}");
    }

    #[test]
    fn test_list_json_is_plain_array() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        script_jobs(&exec, &[("abc123", "Up 1 minute", "{\"stack-path\":\"/s/fedora\"}")]);
        let out = list(&ctx, None, false);
        assert!(out.success);
        let parsed: Vec<JobInfo> = serde_json::from_str(&out.value.to_json()).unwrap();
        assert_eq!(parsed[0].id, "abc123");

        let table = out.value.to_human();
        let mut lines = table.lines();
        assert_eq!(lines.next(), Some("Running Jobs"));
        assert!(lines.next().unwrap().starts_with("ID"));
        assert!(lines.next().unwrap().contains("running"));
    }

    #[test]
    fn test_list_groups_running_completed_and_stashes() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        script_jobs(
            &exec,
            &[
                ("aaa111", "Exited (0) 1 minute ago", "{\"jobtype\":\"stash\"}"),
                ("bbb222", "Exited (1) 2 hours ago", "{\"jobtype\":\"run\"}"),
                ("ccc333", "Up 5 minutes", "{\"jobtype\":\"run\"}"),
            ],
        );
        let human = list(&ctx, None, false).value.to_human();
        let groups: Vec<&str> = human.split("\n\n").collect();
        assert_eq!(groups.len(), 3, "{}", human);
        assert!(groups[0].starts_with("Running Jobs\n") && groups[0].contains("ccc333"));
        assert!(groups[1].starts_with("Completed Jobs\n") && groups[1].contains("bbb222"));
        assert!(groups[2].starts_with("Stashes\n") && groups[2].contains("aaa111"));
        assert!(!groups[1].contains("aaa111"));
    }

    #[test]
    fn test_list_skips_empty_groups() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        script_jobs(&exec, &[("bbb222", "Exited (0) 1 minute ago", "{}")]);
        let human = list(&ctx, None, false).value.to_human();
        assert!(human.starts_with("Completed Jobs\n"), "{}", human);
        assert!(!human.contains("Running Jobs") && !human.contains("Stashes"));
    }

    #[test]
    fn test_log_all_reads_every_job() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        script_jobs(&exec, &[("aaa", "Up 1 minute", "{}"), ("bbb", "Up 1 minute", "{}")]);
        assert!(log(&ctx, None, Some("5"), true).success);
        assert_eq!(
            exec.calls_matching("docker logs"),
            vec!["docker logs --tail='5' 'aaa'", "docker logs --tail='5' 'bbb'"]
        );
    }

    #[test]
    fn test_enter_defaults_to_container_shell() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        script_jobs(&exec, &[("aaa", "Up 1 minute", "{}")]);
        assert!(enter(&ctx, Some("a"), Some("/root"), &[]).success);
        assert_eq!(
            exec.calls_matching("docker exec"),
            vec!["docker exec -i -t -w='/root' 'aaa' 'bash'"]
        );
    }

    #[test]
    fn test_info_reads_record() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        script_jobs(&exec, &[("aaa", "Up 1 minute", "{}")]);
        assert_eq!(
            details(&ctx, Some("aaa")).error,
            vec![errors::missing_job_record("aaa")]
        );

        ctx.records()
            .write(&JobRecord {
                id: "aaa".into(),
                stack_path: "/s/fedora".into(),
                image: "fedora:cjr".into(),
                command: "make".into(),
                project_root: None,
                container_root: "/".into(),
                file_access: "bind".into(),
                file_volume: None,
                message: None,
                synchronous: true,
                created_at: Utc::now(),
            })
            .unwrap();
        let out = details(&ctx, Some("aaa"));
        assert!(out.success);
        assert!(out.value.to_human().lines().any(|l| l.starts_with("Image:") && l.ends_with("fedora:cjr")));
    }

    #[test]
    fn test_ps_failure_surfaces() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        exec.on_sequence("docker ps", vec![ProcessOutput::failure(1, "daemon not running")]);
        let out = commit(&ctx, "aaa", "snapshot");
        assert!(!out.success);
        assert!(exec.calls_matching("docker commit").is_empty());
    }
}
