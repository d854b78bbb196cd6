//! Shell command execution.
//!
//! `ShellCommand` renders a command, a [`Flags`] list and positional
//! arguments into one escaped command line and runs it through `bash -c`.
//! Process spawning sits behind the [`Executor`] trait so drivers can be
//! exercised without a container runtime.

mod flags;
pub mod rsync;
pub mod ssh;

pub use flags::{Flag, Flags, ShellArg, args, bash_escape, command_string};

use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::ValidatedOutput;
use crate::errors;

/// Interpreter used for every command line.
pub const SHELL: &str = "bash";

/// How the child's standard streams are connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StdioMode {
    /// Share the terminal with the child.
    #[default]
    Inherit,
    /// Capture stdout and stderr.
    Pipe,
    /// Discard all output.
    Ignore,
}

/// Spawn options for one command.
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdio: Option<StdioMode>,
}

impl ExecOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn stdio(mut self, mode: StdioMode) -> Self {
        self.stdio = Some(mode);
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// A fully rendered command ready to run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub command_line: String,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub stdio: StdioMode,
}

/// Exit status and captured streams of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(stdout: &str) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: &str) -> Self {
        Self {
            status: Some(code),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs rendered command lines.
pub trait Executor {
    /// Run to completion.
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput>;

    /// Start without waiting; stdout and stderr are piped unless ignored.
    fn spawn(&self, invocation: &Invocation) -> io::Result<Child>;
}

/// Executor backed by real OS processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl SystemExecutor {
    fn command(invocation: &Invocation) -> Command {
        let mut cmd = Command::new(SHELL);
        cmd.arg("-c").arg(&invocation.command_line);
        if let Some(ref cwd) = invocation.cwd {
            cmd.current_dir(cwd);
        }
        cmd.envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        match invocation.stdio {
            StdioMode::Inherit => {
                cmd.stdin(Stdio::inherit())
                    .stdout(Stdio::inherit())
                    .stderr(Stdio::inherit());
            }
            StdioMode::Pipe => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped());
            }
            StdioMode::Ignore => {
                cmd.stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null());
            }
        }
        cmd
    }
}

impl Executor for SystemExecutor {
    fn run(&self, invocation: &Invocation) -> io::Result<ProcessOutput> {
        let output = Self::command(invocation).output()?;
        Ok(ProcessOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn(&self, invocation: &Invocation) -> io::Result<Child> {
        Self::command(invocation).spawn()
    }
}

/// Builds and runs shell command lines.
#[derive(Clone)]
pub struct ShellCommand {
    executor: Arc<dyn Executor>,
    explicit: bool,
    silent: bool,
}

impl std::fmt::Debug for ShellCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellCommand")
            .field("explicit", &self.explicit)
            .field("silent", &self.silent)
            .finish()
    }
}

impl ShellCommand {
    /// `explicit` echoes every command line to stderr; `silent` discards the
    /// output of commands that would otherwise share the terminal.
    pub fn new(explicit: bool, silent: bool) -> Self {
        Self::with_executor(Arc::new(SystemExecutor), explicit, silent)
    }

    pub fn with_executor(executor: Arc<dyn Executor>, explicit: bool, silent: bool) -> Self {
        Self {
            executor,
            explicit,
            silent,
        }
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn command_string(&self, command: &str, flags: &Flags, args: &[ShellArg]) -> String {
        command_string(command, flags, args)
    }

    fn invocation(&self, line: &str, options: &ExecOptions, default: StdioMode) -> Invocation {
        let requested = options.stdio.unwrap_or(default);
        let stdio = if self.silent && requested == StdioMode::Inherit {
            StdioMode::Ignore
        } else {
            requested
        };
        Invocation {
            command_line: line.to_string(),
            cwd: options.cwd.clone(),
            env: options.env.clone(),
            stdio,
        }
    }

    fn announce(&self, line: &str) {
        debug!(command = %line, "running command");
        if self.explicit && !self.silent {
            eprintln!(" {}", line);
        }
    }

    /// Run synchronously, sharing the terminal unless the options say otherwise.
    pub fn exec(
        &self,
        command: &str,
        flags: &Flags,
        args: &[ShellArg],
        options: &ExecOptions,
    ) -> ValidatedOutput<ProcessOutput> {
        self.exec_line(&command_string(command, flags, args), options)
    }

    /// Run an already rendered command line.
    pub fn exec_line(&self, line: &str, options: &ExecOptions) -> ValidatedOutput<ProcessOutput> {
        let invocation = self.invocation(line, options, StdioMode::Inherit);
        self.announce(line);
        match self.executor.run(&invocation) {
            Ok(output) => {
                let mut result = ValidatedOutput::ok(output);
                if !result.value.is_success() {
                    let stderr = result.value.stderr.trim().to_string();
                    if stderr.is_empty() {
                        result.push_error(errors::command_failed(result.value.status));
                    } else {
                        result.push_error(stderr);
                    }
                }
                result
            }
            Err(e) => ValidatedOutput::failed(errors::spawn_failed(line, &e.to_string())),
        }
    }

    /// Start without waiting. Output is piped so the caller can read it.
    pub fn exec_async(
        &self,
        command: &str,
        flags: &Flags,
        args: &[ShellArg],
        options: &ExecOptions,
    ) -> ValidatedOutput<Option<Child>> {
        let line = command_string(command, flags, args);
        let invocation = self.invocation(&line, options, StdioMode::Pipe);
        self.announce(&line);
        match self.executor.spawn(&invocation) {
            Ok(child) => ValidatedOutput::ok(Some(child)),
            Err(e) => ValidatedOutput::failed(errors::spawn_failed(&line, &e.to_string())),
        }
    }

    /// Run with captured output and return stdout unchanged.
    pub fn output(
        &self,
        command: &str,
        flags: &Flags,
        args: &[ShellArg],
        options: &ExecOptions,
    ) -> ValidatedOutput<String> {
        self.output_line(&command_string(command, flags, args), options)
    }

    /// Captured stdout of an already rendered command line.
    pub fn output_line(&self, line: &str, options: &ExecOptions) -> ValidatedOutput<String> {
        let piped = options.clone().stdio(StdioMode::Pipe);
        let result = self.exec_line(line, &piped);
        if !result.success {
            return result.with_value(String::new());
        }
        result.map(|output| output.stdout)
    }

    pub fn output_trimmed(
        &self,
        command: &str,
        flags: &Flags,
        args: &[ShellArg],
        options: &ExecOptions,
    ) -> ValidatedOutput<String> {
        self.output(command, flags, args, options)
            .map(|s| s.trim().to_string())
    }

    pub fn output_json(
        &self,
        command: &str,
        flags: &Flags,
        args: &[ShellArg],
        options: &ExecOptions,
    ) -> ValidatedOutput<Value> {
        self.output(command, flags, args, options)
            .and_then(|raw| parse_json(&raw))
    }

    pub fn output_line_json(
        &self,
        command: &str,
        flags: &Flags,
        args: &[ShellArg],
        options: &ExecOptions,
    ) -> ValidatedOutput<Vec<Value>> {
        self.output(command, flags, args, options)
            .and_then(|raw| parse_line_json(&raw))
    }
}

/// Parse a whole output as one JSON document.
pub fn parse_json(raw: &str) -> ValidatedOutput<Value> {
    match serde_json::from_str(raw) {
        Ok(value) => ValidatedOutput::ok(value),
        Err(_) => ValidatedOutput::failure(Value::Null, errors::invalid_json(raw.trim())),
    }
}

/// Parse every non-blank line as its own JSON document.
/// A single bad line fails the whole output.
pub fn parse_line_json(raw: &str) -> ValidatedOutput<Vec<Value>> {
    let parsed: Result<Vec<Value>, _> = raw
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str)
        .collect();
    match parsed {
        Ok(values) => ValidatedOutput::ok(values),
        Err(_) => ValidatedOutput::failed(errors::invalid_line_json(raw.trim())),
    }
}
