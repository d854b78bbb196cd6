//! `rjob` commands: jobs on registered remote resources.

use std::path::Path;

use tracing::debug;

use super::Context;
use super::job::{JobsChanged, synchronous};
use super::jupyter::JupyterUrl;
use crate::cli::{JobArgs, RemoteArgs, Selector, UploadArgs};
use crate::config::FileAccess;
use crate::jobs::CopyMode;
use crate::jobs::jupyter::ServerOptions;
use crate::remote::{
    CjrRemoteDriver, MultiplexOptions, RemoteCopyOptions, RemoteDeleteOptions, RemoteDriver, RemoteExecMode,
    RemoteExecOptions, RemoteFlags, RemoteJobOptions, RemoteStartOptions, Resource,
    ResourceRegistry,
};
use crate::shell::ssh::SshShellCommand;
use crate::{ValidatedOutput, errors};

/// The resource named by `--resource`, or the only registered one.
pub fn select_resource(ctx: &Context, name: Option<&str>) -> ValidatedOutput<Resource> {
    let registry = ResourceRegistry::load(&ctx.paths.config_dir);
    if !registry.success {
        return registry.with_value(Resource::new("", "", ""));
    }
    let registry = registry.value;
    let (name, found) = match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) => (name.to_string(), registry.require(name)),
        None if registry.len() == 1 => match registry.iter().next() {
            Some((name, resource)) => (name.clone(), ValidatedOutput::ok(resource.clone())),
            None => return ValidatedOutput::failure(Resource::new("", "", ""), errors::no_resource_selected()),
        },
        None => return ValidatedOutput::failure(Resource::new("", "", ""), errors::no_resource_selected()),
    };
    if found.success && !found.value.enabled {
        return ValidatedOutput::failure(found.value, errors::resource_disabled(&name));
    }
    debug!(resource = %name, "selected resource");
    found
}

fn driver(ctx: &Context) -> CjrRemoteDriver {
    let ssh = SshShellCommand::new(ctx.shell.clone(), ctx.paths.ssh_dir());
    CjrRemoteDriver::new(ssh, ctx.output, &ctx.paths)
        .with_multiplex(MultiplexOptions {
            autoconnect: ctx.settings.remote_autoconnect,
            autodisconnect: ctx.settings.remote_autodisconnect,
            restart_existing: ctx.settings.remote_restart_existing_connection,
        })
        .with_image_tag(ctx.settings.image_tag.clone())
}

/// Select the resource and hand it to `f` with a fresh driver.
fn on_resource<T: Default>(
    ctx: &Context,
    remote: &RemoteArgs,
    f: impl FnOnce(&mut CjrRemoteDriver, &Resource) -> ValidatedOutput<T>,
) -> ValidatedOutput<T> {
    let resource = select_resource(ctx, remote.resource.as_deref());
    if !resource.success {
        return resource.with_value(T::default());
    }
    f(&mut driver(ctx), &resource.value)
}

fn output_flags(ctx: &Context) -> RemoteFlags {
    RemoteFlags::new()
        .switch("explicit", ctx.output.explicit)
        .switch("verbose", ctx.output.verbose)
        .switch("quiet", ctx.output.quiet)
}

fn job_options(ctx: &Context, job: &JobArgs, stack_path: String, command: String) -> RemoteJobOptions {
    RemoteJobOptions {
        stack_path,
        config_files: job.config_files.clone(),
        command,
        synchronous: synchronous(ctx, job),
        x11: job.x11,
        labels: job.labels.clone(),
        ports: job.ports.clone(),
        message: job.message.clone(),
        build: job.build_mode,
        file_access: job
            .file_access
            .as_deref()
            .and_then(FileAccess::parse)
            .unwrap_or(ctx.settings.file_access),
        cwd: ctx.host_dir(job.working_directory.as_deref()),
        host_root: ctx.project_root(job.project_root.as_deref()),
    }
}

/// `rjob run`.
pub fn run(
    ctx: &Context,
    remote: &RemoteArgs,
    upload: &UploadArgs,
    job: &JobArgs,
    command: &[String],
) -> ValidatedOutput<()> {
    let stack_path = ctx.resolve_stack(job.stack.as_deref());
    if !stack_path.success {
        return stack_path.with_value(());
    }
    let options = job_options(ctx, job, stack_path.value, command.join(" "));
    let start = RemoteStartOptions {
        auto_copy: job.autocopy || ctx.settings.autocopy_sync_job,
        file_upload_mode: upload.file_upload_mode,
        stack_upload_mode: upload.stack_upload_mode,
    };
    on_resource(ctx, remote, |driver, resource| driver.job_start(resource, &options, &start))
}

fn start_from(
    ctx: &Context,
    remote: &RemoteArgs,
    upload: &UploadArgs,
    job: &JobArgs,
    id: &str,
    command: String,
    mode: RemoteExecMode,
) -> ValidatedOutput<()> {
    let stack_path = ctx.resolve_stack(job.stack.as_deref());
    if !stack_path.success {
        return stack_path.with_value(());
    }
    let options = job_options(ctx, job, stack_path.value, command);
    let exec = RemoteExecOptions {
        id: id.to_string(),
        host_project_root: options.host_root.clone(),
        mode,
        stack_upload_mode: upload.stack_upload_mode,
    };
    on_resource(ctx, remote, |driver, resource| driver.job_exec(resource, &options, &exec))
}

/// `rjob exec`.
pub fn exec(
    ctx: &Context,
    remote: &RemoteArgs,
    upload: &UploadArgs,
    job: &JobArgs,
    id: &str,
    command: &[String],
) -> ValidatedOutput<()> {
    start_from(ctx, remote, upload, job, id, command.join(" "), RemoteExecMode::Exec)
}

/// `rjob shell`.
pub fn shell(
    ctx: &Context,
    remote: &RemoteArgs,
    upload: &UploadArgs,
    job: &JobArgs,
    id: &str,
) -> ValidatedOutput<()> {
    start_from(ctx, remote, upload, job, id, String::new(), RemoteExecMode::Shell)
}

/// `rjob ls`: the remote CLI prints the table.
pub fn list(ctx: &Context, remote: &RemoteArgs, all: bool, json: bool) -> ValidatedOutput<()> {
    let flags = output_flags(ctx).switch("all", all).switch("json", json);
    on_resource(ctx, remote, |driver, resource| driver.job_list(resource, &flags))
}

pub fn state(ctx: &Context, remote: &RemoteArgs, id: &str) -> ValidatedOutput<()> {
    on_resource(ctx, remote, |driver, resource| driver.job_state(resource, id))
}

pub fn log(
    ctx: &Context,
    remote: &RemoteArgs,
    id: Option<&str>,
    lines: Option<&str>,
    all: bool,
) -> ValidatedOutput<()> {
    let flags = output_flags(ctx).text("lines", lines).switch("all", all);
    on_resource(ctx, remote, |driver, resource| driver.job_log(resource, &flags, id))
}

pub fn attach(ctx: &Context, remote: &RemoteArgs, id: Option<&str>) -> ValidatedOutput<()> {
    let flags = output_flags(ctx);
    on_resource(ctx, remote, |driver, resource| driver.job_attach(resource, &flags, id))
}

pub fn stop(ctx: &Context, remote: &RemoteArgs, ids: &[String], select: Selector) -> ValidatedOutput<()> {
    let flags = output_flags(ctx)
        .switch("all", select.all)
        .switch("all-completed", select.all_completed)
        .switch("all-running", select.all_running);
    on_resource(ctx, remote, |driver, resource| driver.job_stop(resource, &flags, ids))
}

/// Typed IDs, or every remote job in the selected states.
fn remote_ids(
    driver: &mut CjrRemoteDriver,
    resource: &Resource,
    ids: &[String],
    select: Selector,
) -> ValidatedOutput<Vec<String>> {
    if !select.any() {
        return ValidatedOutput::ok(ids.to_vec());
    }
    driver
        .job_info(resource, &select.states())
        .map(|jobs| jobs.into_iter().map(|job| job.id).collect())
}

/// `rjob rm`.
pub fn remove(
    ctx: &Context,
    remote: &RemoteArgs,
    ids: &[String],
    select: Selector,
    keep_images: bool,
    keep_files: bool,
) -> ValidatedOutput<()> {
    on_resource(ctx, remote, |driver, resource| {
        let ids = remote_ids(driver, resource, ids, select);
        if !ids.success {
            return ids.with_value(());
        }
        let options = RemoteDeleteOptions {
            ids: ids.value,
            delete_images: !keep_images,
            delete_files: !keep_files,
        };
        driver.job_delete(resource, &options)
    })
}

/// `rjob cp`: into `copy_path`, or the local project root.
pub fn copy(
    ctx: &Context,
    remote: &RemoteArgs,
    ids: &[String],
    all: bool,
    mode: CopyMode,
    copy_path: Option<&Path>,
    force: bool,
) -> ValidatedOutput<JobsChanged> {
    let host_path = match copy_path {
        Some(path) => Some(ctx.cwd.join(path)),
        None => ctx.project_root(None),
    };
    let select = Selector {
        all,
        ..Default::default()
    };
    on_resource(ctx, remote, |driver, resource| {
        let ids = remote_ids(driver, resource, ids, select);
        if !ids.success {
            return ids.with_value(JobsChanged::default());
        }
        let options = RemoteCopyOptions {
            ids: ids.value,
            host_path,
            mode,
            force,
        };
        driver
            .job_copy(resource, &options)
            .map(|copied| JobsChanged::new("Copied", copied))
    })
}

/// `rjob jupyter start`: runs `job jupyter start` beside the remote job.
pub fn jupyter_start(
    ctx: &Context,
    remote: &RemoteArgs,
    upload: &UploadArgs,
    job: &JobArgs,
    server: ServerOptions,
    id: &str,
    args: &[String],
) -> ValidatedOutput<()> {
    start_from(ctx, remote, upload, job, id, args.join(" "), RemoteExecMode::Jupyter(server))
}

pub fn jupyter_stop(ctx: &Context, remote: &RemoteArgs, id: &str) -> ValidatedOutput<()> {
    on_resource(ctx, remote, |driver, resource| driver.jupyter_stop(resource, id))
}

pub fn jupyter_list(ctx: &Context, remote: &RemoteArgs, id: &str) -> ValidatedOutput<()> {
    on_resource(ctx, remote, |driver, resource| driver.jupyter_list(resource, id))
}

pub fn jupyter_url(ctx: &Context, remote: &RemoteArgs, id: &str) -> ValidatedOutput<JupyterUrl> {
    on_resource(ctx, remote, |driver, resource| {
        driver.jupyter_url(resource, id).map(|url| JupyterUrl { url })
    })
}

pub fn connect(ctx: &Context, remote: &RemoteArgs, x11: bool) -> ValidatedOutput<()> {
    on_resource(ctx, remote, |driver, resource| driver.connect(resource, x11))
}

pub fn disconnect(ctx: &Context, remote: &RemoteArgs, x11: bool) -> ValidatedOutput<()> {
    on_resource(ctx, remote, |driver, resource| driver.disconnect(resource, x11))
}
