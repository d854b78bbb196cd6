//! `job jupyter`: Jupyter servers running beside existing jobs.

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::job::{FollowUp, JobStarted, JobsChanged, job_types, select_one, start_with_parent};
use super::{Context, Output};
use crate::cli::JobArgs;
use crate::drivers::{ExecMode, ExecSpec, JobInfo, RunDriver};
use crate::jobs::jupyter::{self, ServerOptions};
use crate::stack::PortMapping;
use crate::{ValidatedOutput, errors};

/// Host that reaches a server published on this machine.
const LOCAL_HOST: &str = "127.0.0.1";

/// `job jupyter url`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JupyterUrl {
    pub url: String,
}

impl Output for JupyterUrl {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        self.url.clone()
    }
}

/// A job and the server running beside it, if any.
#[derive(Debug, Clone)]
struct Served {
    parent: JobInfo,
    server: Option<JobInfo>,
    jobs: Vec<JobInfo>,
}

fn lookup(ctx: &Context, runner: &dyn RunDriver, id: Option<&str>) -> ValidatedOutput<Option<Served>> {
    let parent = select_one(ctx, runner, id);
    let (Some(found), true) = (parent.value.clone(), parent.success) else {
        return parent.with_value(None);
    };
    let listed = runner.job_info(&[], &[]);
    let mut result = parent.with_value(None);
    result.absorb(&listed);
    if !listed.success {
        return result;
    }
    let server = jupyter::find_server(&listed.value, &found.id).cloned();
    result.value = Some(Served {
        parent: found,
        server,
        jobs: listed.value,
    });
    result
}

/// `job jupyter start`: a server job sharing the files of the job matching
/// `id`, published on `server.address()`.
pub fn start(
    ctx: &Context,
    job: &JobArgs,
    server: ServerOptions,
    id: Option<&str>,
    args: &[String],
) -> ValidatedOutput<JobStarted> {
    let (_, runner) = ctx.drivers();
    let found = lookup(ctx, runner.as_ref(), id);
    let (Some(served), true) = (found.value.clone(), found.success) else {
        return found.with_value(JobStarted::default());
    };
    let mut result = found.with_value(JobStarted::default());
    if let Some(running) = &served.server {
        result.push_warning(errors::jupyter_running(&served.parent.id));
        result.value = JobStarted {
            id: running.id.clone(),
            synchronous: false,
        };
        return result;
    }

    let port = server.host_port(&served.jobs);
    let mut server_args = JobArgs {
        sync: false,
        async_mode: true,
        autocopy: false,
        ..job.clone()
    };
    server_args.ports.push(PortMapping {
        host_port: port,
        container_port: port,
        address: Some(server.address().to_string()),
    });
    let follow = FollowUp {
        command: jupyter::server_command(&ctx.settings.jupyter_command, port, args),
        job_type: job_types::JUPYTER,
        remove: true,
        name: Some(jupyter::server_name(&served.parent.id)),
    };
    info!(parent = %served.parent.id, port, "starting jupyter server");
    let started = start_with_parent(ctx, &server_args, &served.parent, follow);
    result.absorb(&started);
    result.value = started.value;
    result
}

/// `job jupyter stop`. A job without a server only warns.
pub fn stop(ctx: &Context, id: Option<&str>) -> ValidatedOutput<JobsChanged> {
    let (_, runner) = ctx.drivers();
    let found = lookup(ctx, runner.as_ref(), id);
    let (Some(served), true) = (found.value.clone(), found.success) else {
        return found.with_value(JobsChanged::default());
    };
    let mut result = found.with_value(JobsChanged::new("Stopped", Vec::new()));
    let Some(server) = served.server else {
        result.push_warning(errors::jupyter_not_running(&served.parent.id));
        return result;
    };
    let stopped = runner.job_stop(std::slice::from_ref(&server.id));
    result.absorb(&stopped);
    if stopped.success {
        result.value.ids.push(server.id);
    }
    result
}

/// Run the list command inside the server of the job matching `id`.
fn list_servers(ctx: &Context, id: Option<&str>, mode: ExecMode) -> ValidatedOutput<(String, Value)> {
    let (_, runner) = ctx.drivers();
    let found = lookup(ctx, runner.as_ref(), id);
    let (Some(served), true) = (found.value.clone(), found.success) else {
        return found.with_value((String::new(), Value::Null));
    };
    let mut result = found.with_value((served.parent.id.clone(), Value::Null));
    let Some(server) = served.server else {
        result.push_error(errors::jupyter_not_running(&served.parent.id));
        return result;
    };
    let command = jupyter::list_command(&ctx.settings.jupyter_command);
    let listed = runner.job_exec(&server.id, &command, &ExecSpec::default(), mode);
    result.absorb(&listed);
    result.value.1 = listed.value;
    result
}

/// `job jupyter list`: the server prints its own listing.
pub fn list(ctx: &Context, id: Option<&str>) -> ValidatedOutput<()> {
    list_servers(ctx, id, ExecMode::Print).with_value(())
}

/// `job jupyter url`: the server url, reachable from this host.
pub fn url(ctx: &Context, id: Option<&str>) -> ValidatedOutput<JupyterUrl> {
    let listed = list_servers(ctx, id, ExecMode::Output);
    let (parent_id, text) = listed.value.clone();
    let mut result = listed.with_value(JupyterUrl::default());
    if !result.success {
        return result;
    }
    match text.as_str().and_then(jupyter::find_url) {
        Some(found) => {
            result.value.url = jupyter::with_host(&found, LOCAL_HOST);
        }
        None => {
            result.push_error(errors::jupyter_url_missing(&parent_id));
        }
    }
    result
}
