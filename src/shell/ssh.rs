//! Shell commands run on a remote host over SSH.
//!
//! Connections are multiplexed through a control socket: a master is started
//! with `ssh -M -f -N` and every later `ssh`/`rsync` call reuses it via `-S`.
//! When no master is running ssh falls back to a direct connection.

use std::path::{Path, PathBuf};

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::info;

use super::{
    ExecOptions, Flag, Flags, ProcessOutput, ShellArg, ShellCommand, StdioMode,
    command_string, parse_json, parse_line_json,
};
use crate::ValidatedOutput;
use crate::errors;

/// Tag of the connection used by ordinary remote commands.
pub const DEFAULT_MULTIPLEX_TAG: &str = "default";

/// Tag of the X11-forwarding connection that may outlive a single job.
pub const X11_MULTIPLEX_TAG: &str = "job_jupyter";

/// Login details for one remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub address: String,
    pub username: String,
    /// Path to a private key passed with `-i`.
    pub key: Option<String>,
}

impl SshTarget {
    pub fn user_host(&self) -> String {
        format!("{}@{}", self.username, self.address)
    }
}

/// Per-call SSH options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SshOptions {
    /// Allocate a TTY and share the local terminal.
    pub interactive: bool,
    pub x11: bool,
}

impl SshOptions {
    pub fn interactive() -> Self {
        Self {
            interactive: true,
            x11: false,
        }
    }

    fn tag(&self) -> &'static str {
        if self.x11 {
            X11_MULTIPLEX_TAG
        } else {
            DEFAULT_MULTIPLEX_TAG
        }
    }
}

/// Direction of an rsync transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDirection {
    /// Local to remote.
    Push,
    /// Remote to local.
    Pull,
}

/// Runs command lines on the configured remote host.
#[derive(Debug, Clone)]
pub struct SshShellCommand {
    shell: ShellCommand,
    socket_dir: PathBuf,
    target: Option<SshTarget>,
}

impl SshShellCommand {
    /// `socket_dir` holds the multiplex control sockets.
    pub fn new(shell: ShellCommand, socket_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell,
            socket_dir: socket_dir.into(),
            target: None,
        }
    }

    pub fn shell(&self) -> &ShellCommand {
        &self.shell
    }

    pub fn target(&self) -> Option<&SshTarget> {
        self.target.as_ref()
    }

    /// Select the remote host. Address and username must be non-empty.
    pub fn set_target(&mut self, target: SshTarget) -> ValidatedOutput<()> {
        if target.address.trim().is_empty() || target.username.trim().is_empty() {
            return ValidatedOutput::failed(errors::invalid_resource(
                &target.user_host(),
                "address and username are required",
            ));
        }
        self.target = Some(target);
        ValidatedOutput::ok(())
    }

    /// Control socket for `tag`, short enough for the unix socket path limit.
    pub fn socket_path(&self, tag: &str) -> Option<PathBuf> {
        let target = self.target.as_ref()?;
        let mut hasher = Sha256::new();
        hasher.update(target.user_host().as_bytes());
        hasher.update(b":");
        hasher.update(tag.as_bytes());
        let digest = hasher.finalize();
        let name: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
        Some(self.socket_dir.join(format!("cm-{}", name)))
    }

    fn connection_flags(&self, target: &SshTarget, tag: &str) -> Flags {
        let mut flags = Flags::new();
        if let Some(socket) = self.socket_path(tag) {
            flags.push(Flag::value("S", socket.to_string_lossy()).spaced());
        }
        if let Some(ref key) = target.key {
            flags.push(Flag::value("i", key.as_str()).spaced());
        }
        flags
    }

    fn missing_target<T: Default>(&self) -> ValidatedOutput<T> {
        ValidatedOutput::failed(errors::no_resource_selected())
    }

    /// Run `command flags args` remotely.
    pub fn exec(
        &self,
        command: &str,
        flags: &Flags,
        args: &[ShellArg],
        options: SshOptions,
    ) -> ValidatedOutput<ProcessOutput> {
        self.exec_line(&command_string(command, flags, args), options)
    }

    /// Run a raw remote script, e.g. one using `&&` or `$(...)`.
    pub fn exec_line(&self, remote_line: &str, options: SshOptions) -> ValidatedOutput<ProcessOutput> {
        let Some(target) = self.target.as_ref() else {
            return self.missing_target();
        };
        let mut flags = self.connection_flags(target, options.tag());
        if options.interactive {
            flags.push(Flag::switch("t"));
        }
        if options.x11 {
            flags.push(Flag::switch("X"));
        }
        let line = command_string(
            "ssh",
            &flags,
            &[ShellArg::from(target.user_host()), ShellArg::from(remote_line)],
        );
        let stdio = if options.interactive {
            StdioMode::Inherit
        } else {
            StdioMode::Pipe
        };
        self.shell
            .exec_line(&line, &ExecOptions::new().stdio(stdio))
    }

    /// Captured stdout of a remote command.
    pub fn output(
        &self,
        command: &str,
        flags: &Flags,
        args: &[ShellArg],
        options: SshOptions,
    ) -> ValidatedOutput<String> {
        self.output_line(&command_string(command, flags, args), options)
    }

    pub fn output_line(&self, remote_line: &str, options: SshOptions) -> ValidatedOutput<String> {
        let options = SshOptions {
            interactive: false,
            ..options
        };
        let result = self.exec_line(remote_line, options);
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
        options: SshOptions,
    ) -> ValidatedOutput<String> {
        self.output(command, flags, args, options)
            .map(|s| s.trim().to_string())
    }

    pub fn output_json(
        &self,
        command: &str,
        flags: &Flags,
        args: &[ShellArg],
        options: SshOptions,
    ) -> ValidatedOutput<Value> {
        self.output(command, flags, args, options)
            .and_then(|raw| parse_json(&raw))
    }

    pub fn output_line_json(
        &self,
        command: &str,
        flags: &Flags,
        args: &[ShellArg],
        options: SshOptions,
    ) -> ValidatedOutput<Vec<Value>> {
        self.output(command, flags, args, options)
            .and_then(|raw| parse_line_json(&raw))
    }

    /// True if a master for `tag` is alive.
    pub fn multiplex_exists(&self, tag: &str) -> bool {
        let Some(target) = self.target.as_ref() else {
            return false;
        };
        let flags = self
            .connection_flags(target, tag)
            .with(Flag::value("O", "check").spaced().raw());
        let line = command_string("ssh", &flags, &[ShellArg::from(target.user_host())]);
        self.shell
            .exec_line(&line, &ExecOptions::new().stdio(StdioMode::Pipe))
            .success
    }

    /// Start a master for `tag`. Callers check [`Self::multiplex_exists`]
    /// first; a second master on the same socket fails to bind.
    pub fn multiplex_start(&self, tag: &str, x11: bool) -> ValidatedOutput<()> {
        let Some(target) = self.target.as_ref() else {
            return self.missing_target();
        };
        if let Err(e) = std::fs::create_dir_all(&self.socket_dir) {
            return ValidatedOutput::failed(e.to_string());
        }
        let mut flags = self
            .connection_flags(target, tag)
            .switch("M")
            .switch("f")
            .switch("N")
            .with(Flag::value("o", "ControlPersist=yes").spaced().raw());
        if x11 {
            flags.push(Flag::switch("X"));
        }
        info!(host = %target.user_host(), tag, "starting ssh master");
        let line = command_string("ssh", &flags, &[ShellArg::from(target.user_host())]);
        let result = self
            .shell
            .exec_line(&line, &ExecOptions::new().stdio(StdioMode::Pipe));
        let mut out = ValidatedOutput::ok(());
        if !result.success {
            out.push_error(errors::ssh_connection_failed(&target.user_host()));
            out.absorb(&result);
        }
        out
    }

    /// Stop the master for `tag`.
    pub fn multiplex_stop(&self, tag: &str) -> ValidatedOutput<()> {
        let Some(target) = self.target.as_ref() else {
            return self.missing_target();
        };
        info!(host = %target.user_host(), tag, "stopping ssh master");
        let flags = self
            .connection_flags(target, tag)
            .with(Flag::value("O", "exit").spaced().raw());
        let line = command_string("ssh", &flags, &[ShellArg::from(target.user_host())]);
        self.shell
            .exec_line(&line, &ExecOptions::new().stdio(StdioMode::Pipe))
            .with_value(())
    }

    /// Copy files with rsync through the multiplexed connection.
    pub fn rsync(
        &self,
        local: &Path,
        remote: &str,
        direction: SyncDirection,
        flags: Flags,
    ) -> ValidatedOutput<ProcessOutput> {
        let Some(target) = self.target.as_ref() else {
            return self.missing_target();
        };
        let transport = command_string(
            "ssh",
            &self.connection_flags(target, DEFAULT_MULTIPLEX_TAG),
            &[],
        );
        let mut flags = flags;
        flags.push(Flag::value("e", transport).spaced());
        let local_arg = ShellArg::from(local.to_string_lossy().into_owned());
        let remote_arg = ShellArg::from(format!("{}:{}", target.user_host(), remote));
        let args = match direction {
            SyncDirection::Push => [local_arg, remote_arg],
            SyncDirection::Pull => [remote_arg, local_arg],
        };
        let stdio = if self.shell.is_silent() {
            StdioMode::Ignore
        } else {
            StdioMode::Pipe
        };
        self.shell
            .exec("rsync", &flags, &args, &ExecOptions::new().stdio(stdio))
    }
}
