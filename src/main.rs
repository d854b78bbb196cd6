//! cjr - run shell commands as container jobs, locally or on remote hosts.

use std::env;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cjr::cli::{
    Cli, Commands, ConfigCommands, JobCommands, JupyterCommands, ResourceCommands, RjobCommands,
    RjupyterCommands, StackCommands,
};
use cjr::commands::{Context, Output, config, job, jupyter, remote, stack};
use cjr::config::{Paths, load_settings};
use cjr::remote::{OutputOptions, Resource};
use cjr::shell::ShellCommand;
use cjr::{CLI_NAME, ValidatedOutput};

/// Overrides the log filter, e.g. `CJR_LOG=cjr=trace`.
const LOG_ENV: &str = "CJR_LOG";

fn init_logging(verbose: bool) {
    let default = if verbose { "cjr=debug" } else { "cjr=warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let json = cli.json;

    let paths = match Paths::resolve() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("{}: error: {}", CLI_NAME, e);
            process::exit(1);
        }
    };
    let settings = load_settings(&paths);
    let settings_value = settings.value.clone();
    if !report(&settings.with_value(()), json) {
        process::exit(1);
    }
    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    debug!(config = %paths.config_dir.display(), data = %paths.data_dir.display(), "resolved paths");

    let output = OutputOptions {
        verbose: cli.verbose,
        quiet: cli.quiet,
        explicit: cli.explicit,
    };
    let shell = ShellCommand::new(cli.explicit, cli.quiet);
    let ctx = Context::new(paths, settings_value, shell, output, cwd).with_terminal_prompt();

    if !run_command(&ctx, cli.command, json) {
        process::exit(1);
    }
}

/// Print the value, then warnings and errors on stderr. Returns success.
fn report<T: Output>(result: &ValidatedOutput<T>, json: bool) -> bool {
    let text = if json {
        result.value.to_json()
    } else {
        result.value.to_human()
    };
    if !text.is_empty() {
        println!("{}", text);
    }
    for warning in &result.warning {
        eprintln!("{}: warning: {}", CLI_NAME, warning);
    }
    for error in &result.error {
        eprintln!("{}: error: {}", CLI_NAME, error);
    }
    result.success
}

fn run_command(ctx: &Context, command: Commands, json: bool) -> bool {
    match command {
        Commands::Run { job: args, command } => report(&job::run(ctx, &args, &command), json),
        Commands::Job { command } => run_job(ctx, command, json),
        Commands::Stack { command } => match command {
            StackCommands::Build {
                stack: name,
                config_files,
                build_mode,
            } => report(&stack::build(ctx, Some(&name), &config_files, &build_mode), json),
            StackCommands::Rmi { stacks, all } => {
                report(&stack::remove_images(ctx, &stacks, all), json)
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Ls => report(&config::config_list(ctx), json),
            ConfigCommands::Get { key } => report(&config::config_get(ctx, &key), json),
            ConfigCommands::Set { key, value } => report(&config::config_set(ctx, &key, &value), json),
        },
        Commands::Resource { command } => match command {
            ResourceCommands::Add {
                name,
                address,
                username,
                storage_dir,
                key,
            } => {
                let mut resource = Resource::new(address, username, storage_dir);
                resource.key = key;
                report(&config::resource_add(ctx, &name, resource), json)
            }
            ResourceCommands::Set { name, field, value } => {
                report(&config::resource_set(ctx, &name, &field, &value), json)
            }
            ResourceCommands::Rm { name } => report(&config::resource_remove(ctx, &name), json),
            ResourceCommands::Ls => report(&config::resource_list(ctx), json),
        },
        Commands::Rjob { command } => run_rjob(ctx, command, json),
    }
}

fn run_job(ctx: &Context, command: JobCommands, json: bool) -> bool {
    match command {
        JobCommands::Ls { stack: name, all } => report(&job::list(ctx, name.as_deref(), all), json),
        JobCommands::Labels { ids, select } => report(&job::job_labels_of(ctx, &ids, select), json),
        JobCommands::State { id } => report(&job::state(ctx, &id), json),
        JobCommands::Log { id, lines, all } => {
            report(&job::log(ctx, id.as_deref(), lines.as_deref(), all), json)
        }
        JobCommands::Attach { id } => report(&job::attach(ctx, id.as_deref()), json),
        JobCommands::Stop { ids, select } => report(&job::stop(ctx, &ids, select), json),
        JobCommands::Rm { ids, select } => report(&job::remove(ctx, &ids, select), json),
        JobCommands::Cp {
            ids,
            all,
            mode,
            copy_path,
        } => report(&job::copy(ctx, &ids, all, mode, copy_path.as_deref()), json),
        JobCommands::Exec { job: args, id, command } => {
            report(&job::exec(ctx, &args, &id, &command), json)
        }
        JobCommands::Shell { job: args, id, discard } => {
            report(&job::shell(ctx, &args, id.as_deref(), discard), json)
        }
        JobCommands::Enter {
            id,
            container_dir,
            command,
        } => report(
            &job::enter(ctx, id.as_deref(), container_dir.as_deref(), &command),
            json,
        ),
        JobCommands::Commit { id, image } => report(&job::commit(ctx, &id, &image), json),
        JobCommands::Info { id } => report(&job::details(ctx, id.as_deref()), json),
        JobCommands::Stash { job: args } => report(&job::stash(ctx, &args), json),
        JobCommands::Jupyter { command } => run_jupyter(ctx, command, json),
    }
}

fn run_jupyter(ctx: &Context, command: JupyterCommands, json: bool) -> bool {
    match command {
        JupyterCommands::Start {
            job: args,
            server,
            id,
            args: extra,
        } => report(
            &jupyter::start(ctx, &args, server.server(), id.as_deref(), &extra),
            json,
        ),
        JupyterCommands::Stop { id } => report(&jupyter::stop(ctx, id.as_deref()), json),
        JupyterCommands::List { id } => report(&jupyter::list(ctx, id.as_deref()), json),
        JupyterCommands::Url { id } => report(&jupyter::url(ctx, id.as_deref()), json),
    }
}

fn run_rjob(ctx: &Context, command: RjobCommands, json: bool) -> bool {
    match command {
        RjobCommands::Run {
            remote: target,
            upload,
            job: args,
            command,
        } => report(&remote::run(ctx, &target, &upload, &args, &command), json),
        RjobCommands::Exec {
            remote: target,
            upload,
            job: args,
            id,
            command,
        } => report(&remote::exec(ctx, &target, &upload, &args, &id, &command), json),
        RjobCommands::Shell {
            remote: target,
            upload,
            job: args,
            id,
        } => report(&remote::shell(ctx, &target, &upload, &args, &id), json),
        RjobCommands::Ls { remote: target, all } => report(&remote::list(ctx, &target, all, json), json),
        RjobCommands::State { remote: target, id } => report(&remote::state(ctx, &target, &id), json),
        RjobCommands::Log {
            remote: target,
            id,
            lines,
            all,
        } => report(
            &remote::log(ctx, &target, id.as_deref(), lines.as_deref(), all),
            json,
        ),
        RjobCommands::Attach { remote: target, id } => {
            report(&remote::attach(ctx, &target, id.as_deref()), json)
        }
        RjobCommands::Stop {
            remote: target,
            ids,
            select,
        } => report(&remote::stop(ctx, &target, &ids, select), json),
        RjobCommands::Rm {
            remote: target,
            ids,
            select,
            keep_images,
            keep_files,
        } => report(
            &remote::remove(ctx, &target, &ids, select, keep_images, keep_files),
            json,
        ),
        RjobCommands::Cp {
            remote: target,
            ids,
            all,
            mode,
            copy_path,
            force,
        } => report(
            &remote::copy(ctx, &target, &ids, all, mode, copy_path.as_deref(), force),
            json,
        ),
        RjobCommands::Connect { remote: target, x11 } => report(&remote::connect(ctx, &target, x11), json),
        RjobCommands::Disconnect { remote: target, x11 } => {
            report(&remote::disconnect(ctx, &target, x11), json)
        }
        RjobCommands::Jupyter { command } => run_rjupyter(ctx, command, json),
    }
}

fn run_rjupyter(ctx: &Context, command: RjupyterCommands, json: bool) -> bool {
    match command {
        RjupyterCommands::Start {
            remote: target,
            upload,
            job: args,
            server,
            id,
            args: extra,
        } => report(
            &remote::jupyter_start(ctx, &target, &upload, &args, server.server(), &id, &extra),
            json,
        ),
        RjupyterCommands::Stop { remote: target, id } => {
            report(&remote::jupyter_stop(ctx, &target, &id), json)
        }
        RjupyterCommands::List { remote: target, id } => {
            report(&remote::jupyter_list(ctx, &target, &id), json)
        }
        RjupyterCommands::Url { remote: target, id } => {
            report(&remote::jupyter_url(ctx, &target, &id), json)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_returns_success() {
        let ok: ValidatedOutput<()> = ValidatedOutput::ok(());
        assert!(report(&ok, false));
        let failed: ValidatedOutput<()> = ValidatedOutput::failed("boom");
        assert!(!report(&failed, true));
    }
}
