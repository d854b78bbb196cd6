//! CLI argument definitions for cjr.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::drivers::{BuildOptions, JobState};
use crate::jobs::CopyMode;
use crate::jobs::jupyter::{ServerOptions, ServerPort};
use crate::remote::UploadMode;
use crate::stack::PortMapping;

/// cjr - run shell commands in containers, locally or on remote hosts.
///
/// Start with `cjr run --stack=<stack> -- <command>` from inside a project.
#[derive(Parser, Debug)]
#[command(name = "cjr")]
#[command(
    author,
    version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("CJR_GIT_COMMIT"),
        " ",
        env!("CJR_BUILD_TIMESTAMP"),
        ")"
    ),
    about = "Run shell commands as container jobs",
    long_about = None
)]
pub struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Echo every external command before running it
    #[arg(long, global = true)]
    pub explicit: bool,

    /// Show debug logs and verbose tool output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Hide the output of external commands
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a job from a stack
    ///
    /// Project files are bound or copied into the job depending on
    /// --file-access. Without --async the job is attached to the terminal.
    #[command(visible_alias = "$")]
    Run {
        #[command(flatten)]
        job: JobArgs,

        /// Shell command to run; empty runs the image default
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Job management commands
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Stack image commands
    Stack {
        #[command(subcommand)]
        command: StackCommands,
    },

    /// CLI settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Remote resource registry
    Resource {
        #[command(subcommand)]
        command: ResourceCommands,
    },

    /// Jobs on a remote resource
    Rjob {
        #[command(subcommand)]
        command: RjobCommands,
    },
}

/// Options shared by every command that starts a job.
#[derive(Args, Debug, Clone, Default)]
pub struct JobArgs {
    /// Stack directory, name of a stack in stacks-dir, or an image reference
    #[arg(long, env = "CJR_STACK")]
    pub stack: Option<String>,

    /// Extra stack configuration files, merged over config.yml in order
    #[arg(long = "config-files", value_delimiter = ',')]
    pub config_files: Vec<PathBuf>,

    /// Project root shared with the job (default: search upward for .cjr)
    #[arg(long)]
    pub project_root: Option<PathBuf>,

    /// reuse-image, cached or no-cache, optionally followed by ",pull"
    #[arg(long, default_value = "cached")]
    pub build_mode: BuildOptions,

    /// How project files reach the job
    #[arg(long, value_parser = ["bind", "volume"])]
    pub file_access: Option<String>,

    /// Attach to the job and wait for it to finish
    #[arg(long, conflicts_with = "async_mode")]
    pub sync: bool,

    /// Start the job in the background and print its ID
    #[arg(long = "async")]
    pub async_mode: bool,

    /// Share the X11 display with the job
    #[arg(long)]
    pub x11: bool,

    /// Publish a port, [address:]host:container (repeatable)
    #[arg(long = "port", value_parser = PortMapping::parse)]
    pub ports: Vec<PortMapping>,

    /// Extra job label, key=value (repeatable)
    #[arg(long = "label", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,

    /// Note stored with the job
    #[arg(long)]
    pub message: Option<String>,

    /// Host directory used in place of the current one to pick the
    /// container working directory
    #[arg(long)]
    pub working_directory: Option<PathBuf>,

    /// Copy volume files back to the project root after a synchronous job
    #[arg(long)]
    pub autocopy: bool,
}

/// Batch selectors for commands acting on several jobs.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct Selector {
    /// Every job
    #[arg(long)]
    pub all: bool,

    /// Every exited job
    #[arg(long)]
    pub all_completed: bool,

    /// Every running job
    #[arg(long)]
    pub all_running: bool,
}

impl Selector {
    /// True if any selector was given.
    pub fn any(&self) -> bool {
        self.all || self.all_completed || self.all_running
    }

    /// States the selection covers; empty means every state.
    pub fn states(&self) -> Vec<JobState> {
        let mut states = Vec::new();
        if self.all {
            return states;
        }
        if self.all_completed {
            states.push(JobState::Exited);
        }
        if self.all_running {
            states.push(JobState::Running);
        }
        states
    }
}

/// Publishing options for a Jupyter server.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct JupyterArgs {
    /// Host port, or auto for the first free port from 7019
    #[arg(long, default_value = "auto")]
    pub server_port: ServerPort,

    /// Listen on every host interface instead of loopback only
    #[arg(long)]
    pub expose: bool,
}

impl JupyterArgs {
    pub fn server(&self) -> ServerOptions {
        ServerOptions {
            port: self.server_port,
            expose: self.expose,
        }
    }
}

/// Job subcommands
#[derive(Subcommand, Debug)]
pub enum JobCommands {
    /// List jobs
    Ls {
        /// Only jobs started from this stack
        #[arg(long)]
        stack: Option<String>,

        /// Every job, ignoring --stack
        #[arg(long)]
        all: bool,
    },

    /// Print job labels as JSON
    Labels {
        /// Job ID prefixes
        ids: Vec<String>,

        #[command(flatten)]
        select: Selector,
    },

    /// Print the state of a job
    State {
        /// Job ID prefix
        id: String,
    },

    /// Print job logs
    Log {
        /// Job ID prefix (prompts when blank)
        id: Option<String>,

        /// Number of trailing lines
        #[arg(long)]
        lines: Option<String>,

        /// Logs of every job
        #[arg(long)]
        all: bool,
    },

    /// Attach to a running job
    Attach {
        /// Job ID prefix (prompts when blank)
        id: Option<String>,
    },

    /// Stop jobs
    Stop {
        /// Job ID prefixes
        ids: Vec<String>,

        #[command(flatten)]
        select: Selector,
    },

    /// Stop and remove jobs with their file volumes
    Rm {
        /// Job ID prefixes
        ids: Vec<String>,

        #[command(flatten)]
        select: Selector,
    },

    /// Copy job files back to the project root
    Cp {
        /// Job ID prefixes
        ids: Vec<String>,

        /// Every job
        #[arg(long)]
        all: bool,

        /// update, overwrite or mirror
        #[arg(long, default_value = "update")]
        mode: CopyMode,

        /// Copy into this directory instead of the job's project root
        #[arg(long)]
        copy_path: Option<PathBuf>,
    },

    /// Start a new job that shares the files of an existing one
    Exec {
        #[command(flatten)]
        job: JobArgs,

        /// Job ID prefix
        id: String,

        /// Shell command to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Start an interactive shell sharing the files of an existing job
    Shell {
        #[command(flatten)]
        job: JobArgs,

        /// Job ID prefix (prompts when blank)
        id: Option<String>,

        /// Remove the shell job when it exits
        #[arg(long)]
        discard: bool,
    },

    /// Run a command inside a running job
    Enter {
        /// Job ID prefix (prompts when blank)
        id: Option<String>,

        /// Working directory inside the container
        #[arg(long)]
        container_dir: Option<String>,

        /// Command to run (default: the container shell)
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Save a job's filesystem as an image
    Commit {
        /// Job ID prefix
        id: String,

        /// Image name
        image: String,
    },

    /// Show how a job was started
    Info {
        /// Job ID prefix (prompts when blank)
        id: Option<String>,
    },

    /// Save the project files in a job that runs nothing
    Stash {
        #[command(flatten)]
        job: JobArgs,
    },

    /// Jupyter servers sharing the files of a job
    Jupyter {
        #[command(subcommand)]
        command: JupyterCommands,
    },
}

/// Jupyter subcommands
#[derive(Subcommand, Debug)]
pub enum JupyterCommands {
    /// Start a server for a job
    Start {
        #[command(flatten)]
        job: JobArgs,

        #[command(flatten)]
        server: JupyterArgs,

        /// Job ID prefix (prompts when blank)
        id: Option<String>,

        /// Extra arguments for the server
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Stop the server of a job
    Stop {
        /// Job ID prefix (prompts when blank)
        id: Option<String>,
    },

    /// Print the servers running beside a job
    List {
        /// Job ID prefix (prompts when blank)
        id: Option<String>,
    },

    /// Print the url of a job's server
    Url {
        /// Job ID prefix (prompts when blank)
        id: Option<String>,
    },
}

/// Stack subcommands
#[derive(Subcommand, Debug)]
pub enum StackCommands {
    /// Build or pull a stack's image
    Build {
        /// Stack directory, stack name or image reference
        stack: String,

        /// Extra stack configuration files
        #[arg(long = "config-files", value_delimiter = ',')]
        config_files: Vec<PathBuf>,

        /// reuse-image, cached or no-cache, optionally followed by ",pull"
        #[arg(long, default_value = "no-cache")]
        build_mode: BuildOptions,
    },

    /// Remove the images built for stacks
    Rmi {
        /// Stack directories or names
        #[arg(required = true)]
        stacks: Vec<String>,

        /// Every image built for the stack, not just the current tag
        #[arg(long)]
        all: bool,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// List every setting with its resolved value
    Ls,

    /// Print one setting
    Get {
        /// Setting key (e.g., file-access)
        key: String,
    },

    /// Change one setting
    Set {
        /// Setting key
        key: String,

        /// New value
        value: String,
    },
}

/// Resource subcommands
#[derive(Subcommand, Debug)]
pub enum ResourceCommands {
    /// Register a remote resource
    Add {
        /// Resource name
        name: String,

        /// Host name or IP address
        #[arg(long)]
        address: String,

        /// SSH user
        #[arg(long)]
        username: String,

        /// Directory on the host that holds job data
        #[arg(long)]
        storage_dir: String,

        /// SSH private key
        #[arg(long)]
        key: Option<String>,
    },

    /// Change one field of a resource
    Set {
        /// Resource name
        name: String,

        /// address, username, key, storage-dir or enabled
        field: String,

        /// New value
        value: String,
    },

    /// Remove a resource
    Rm {
        /// Resource name
        name: String,
    },

    /// List resources
    Ls,
}

/// Resource selection for remote commands.
#[derive(Args, Debug, Clone, Default)]
pub struct RemoteArgs {
    /// Resource to use (default: the only registered one)
    #[arg(long, env = "CJR_RESOURCE")]
    pub resource: Option<String>,
}

/// Upload policy for remote commands that start jobs.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct UploadArgs {
    /// Reuse the remote stack directory of this project
    #[arg(long, default_value = "uncached")]
    pub stack_upload_mode: UploadMode,

    /// Reuse the remote project files of this project
    #[arg(long, default_value = "uncached")]
    pub file_upload_mode: UploadMode,
}

/// Remote job subcommands
#[derive(Subcommand, Debug)]
pub enum RjobCommands {
    /// Upload the stack and project and start a job remotely
    Run {
        #[command(flatten)]
        remote: RemoteArgs,

        #[command(flatten)]
        upload: UploadArgs,

        #[command(flatten)]
        job: JobArgs,

        /// Shell command to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Start a remote job sharing the files of an existing remote job
    Exec {
        #[command(flatten)]
        remote: RemoteArgs,

        #[command(flatten)]
        upload: UploadArgs,

        #[command(flatten)]
        job: JobArgs,

        /// Remote job ID prefix
        id: String,

        /// Shell command to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Open a shell sharing the files of an existing remote job
    Shell {
        #[command(flatten)]
        remote: RemoteArgs,

        #[command(flatten)]
        upload: UploadArgs,

        #[command(flatten)]
        job: JobArgs,

        /// Remote job ID prefix
        id: String,
    },

    /// List remote jobs
    Ls {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Every job
        #[arg(long)]
        all: bool,
    },

    /// Print the state of a remote job
    State {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Remote job ID prefix
        id: String,
    },

    /// Print remote job logs
    Log {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Remote job ID prefix
        id: Option<String>,

        /// Number of trailing lines
        #[arg(long)]
        lines: Option<String>,

        /// Logs of every job
        #[arg(long)]
        all: bool,
    },

    /// Attach to a remote job
    Attach {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Remote job ID prefix
        id: Option<String>,
    },

    /// Stop remote jobs
    Stop {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Remote job ID prefixes
        ids: Vec<String>,

        #[command(flatten)]
        select: Selector,
    },

    /// Remove remote jobs, their images and their uploaded files
    Rm {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Remote job ID prefixes
        ids: Vec<String>,

        #[command(flatten)]
        select: Selector,

        /// Keep the stack images on the resource
        #[arg(long)]
        keep_images: bool,

        /// Keep the uploaded stack and project files on the resource
        #[arg(long)]
        keep_files: bool,
    },

    /// Copy remote job files back to the local project
    Cp {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Remote job ID prefixes
        ids: Vec<String>,

        /// Every job
        #[arg(long)]
        all: bool,

        /// update, overwrite or mirror
        #[arg(long, default_value = "update")]
        mode: CopyMode,

        /// Local directory to copy into (default: the project root)
        #[arg(long)]
        copy_path: Option<PathBuf>,

        /// Copy jobs started from a different project
        #[arg(long)]
        force: bool,
    },

    /// Open a multiplexed SSH connection to a resource
    Connect {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Open the X11-forwarding connection
        #[arg(long)]
        x11: bool,
    },

    /// Close a multiplexed SSH connection
    Disconnect {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Close the X11-forwarding connection
        #[arg(long)]
        x11: bool,
    },

    /// Jupyter servers beside remote jobs
    Jupyter {
        #[command(subcommand)]
        command: RjupyterCommands,
    },
}

/// Remote Jupyter subcommands
#[derive(Subcommand, Debug)]
pub enum RjupyterCommands {
    /// Start a server beside a remote job
    Start {
        #[command(flatten)]
        remote: RemoteArgs,

        #[command(flatten)]
        upload: UploadArgs,

        #[command(flatten)]
        job: JobArgs,

        #[command(flatten)]
        server: JupyterArgs,

        /// Remote job ID prefix
        id: String,

        /// Extra arguments for the server
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Stop the server of a remote job and its X11 connection
    Stop {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Remote job ID prefix
        id: String,
    },

    /// Print the servers running beside a remote job
    List {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Remote job ID prefix
        id: String,
    },

    /// Print the url of a remote job's server, addressed to the resource
    Url {
        #[command(flatten)]
        remote: RemoteArgs,

        /// Remote job ID prefix
        id: String,
    },
}

/// Parse `key=value`.
fn parse_label(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("invalid label '{}' (expected key=value)", raw)),
    }
}
