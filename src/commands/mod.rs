//! Command implementations for the cjr CLI.
//!
//! Each command loads what it needs through a [`Context`], calls into the
//! drivers and returns a `ValidatedOutput` whose value implements [`Output`].
//! Commands are organized by entity type:
//! - `job` - local job lifecycle (`run`, `job ...`)
//! - `jupyter` - Jupyter servers beside local jobs (`job jupyter ...`)
//! - `stack` - image builds and removal
//! - `config` - settings and the resource registry
//! - `remote` - jobs on remote resources (`rjob ...`)

pub mod config;
pub mod job;
pub mod jupyter;
pub mod remote;
pub mod stack;

use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::config::{CliSettings, Paths, Settings};
use crate::drivers::{BuildDriver, DriverOptions, RunDriver, new_drivers};
use crate::jobs::{JobPrompt, RecordStore, TerminalPrompt};
use crate::project::find_project_root;
use crate::remote::OutputOptions;
use crate::shell::ShellCommand;
use crate::{ValidatedOutput, errors};

/// Command results that can be serialized to JSON or formatted for humans.
pub trait Output {
    /// Serialize to JSON string.
    fn to_json(&self) -> String;

    /// Format for human-readable output.
    fn to_human(&self) -> String;
}

/// Commands that only report success print nothing.
impl Output for () {
    fn to_json(&self) -> String {
        String::new()
    }

    fn to_human(&self) -> String {
        String::new()
    }
}

/// Everything a command needs from its environment.
pub struct Context {
    pub paths: Paths,
    /// Values present in `settings.kdl`.
    pub file_settings: CliSettings,
    /// `file_settings` resolved against the defaults.
    pub settings: Settings,
    pub shell: ShellCommand,
    pub output: OutputOptions,
    pub cwd: PathBuf,
    prompt: Option<Box<dyn JobPrompt>>,
}

impl Context {
    pub fn new(
        paths: Paths,
        file_settings: CliSettings,
        shell: ShellCommand,
        output: OutputOptions,
        cwd: PathBuf,
    ) -> Self {
        let settings = Settings::resolve(&file_settings, &paths);
        Self {
            paths,
            file_settings,
            settings,
            shell,
            output,
            cwd,
            prompt: None,
        }
    }

    /// Ask on the terminal for blank job IDs when settings allow it and
    /// stdin is a terminal.
    pub fn with_terminal_prompt(self) -> Self {
        if self.settings.interactive && std::io::stdin().is_terminal() {
            self.with_prompt(Box::new(TerminalPrompt))
        } else {
            self
        }
    }

    pub fn with_prompt(mut self, prompt: Box<dyn JobPrompt>) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn prompt(&self) -> Option<&dyn JobPrompt> {
        self.prompt.as_deref()
    }

    /// Build and run drivers for the configured runtimes.
    pub fn drivers(&self) -> (Box<dyn BuildDriver>, Box<dyn RunDriver>) {
        let options = DriverOptions {
            image_tag: self.settings.image_tag.clone(),
            selinux: self.settings.selinux,
        };
        let (builder, _) = new_drivers(self.settings.build_driver, self.shell.clone(), options.clone());
        let (_, runner) = new_drivers(self.settings.run_driver, self.shell.clone(), options);
        (builder, runner)
    }

    pub fn records(&self) -> RecordStore {
        RecordStore::new(self.paths.records_dir())
    }

    /// Stack path for a stack argument.
    ///
    /// A directory in stacks-dir wins over one relative to the working
    /// directory; anything else is taken as an image reference.
    pub fn resolve_stack(&self, stack: Option<&str>) -> ValidatedOutput<String> {
        let stack = match stack.map(str::trim).filter(|s| !s.is_empty()) {
            Some(stack) => stack,
            None => return ValidatedOutput::failed(errors::missing_stack()),
        };
        for candidate in [self.settings.stacks_dir.join(stack), self.cwd.join(stack)] {
            if candidate.is_dir() {
                let path = fs::canonicalize(&candidate).unwrap_or(candidate);
                return ValidatedOutput::ok(path.to_string_lossy().into_owned());
            }
        }
        ValidatedOutput::ok(stack.to_string())
    }

    /// Project root from a flag, or found upward from the working directory
    /// when auto-project-root is on.
    pub fn project_root(&self, explicit: Option<&Path>) -> Option<PathBuf> {
        match explicit {
            Some(root) => {
                let root = self.cwd.join(root);
                Some(fs::canonicalize(&root).unwrap_or(root))
            }
            None if self.settings.auto_project_root => find_project_root(&self.cwd),
            None => None,
        }
    }

    /// Host directory that picks the container working directory.
    pub fn host_dir(&self, working_directory: Option<&Path>) -> PathBuf {
        match working_directory {
            Some(dir) => self.cwd.join(dir),
            None => self.cwd.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::config::Paths;
    use crate::drivers::{DriverKind, JobInfo};
    use crate::test_utils::{ScriptedExecutor, scripted_shell};

    /// Context on the docker runtime with directories inside `tmp`.
    pub fn context(exec: &Arc<ScriptedExecutor>, tmp: &TempDir) -> Context {
        let paths = Paths {
            config_dir: tmp.path().join("config"),
            data_dir: tmp.path().join("data"),
        };
        let mut file = CliSettings::new();
        file.build_driver = Some(DriverKind::DockerCli);
        file.run_driver = Some(DriverKind::DockerCli);
        let cwd = tmp.path().join("work");
        fs::create_dir_all(&cwd).unwrap();
        Context::new(paths, file, scripted_shell(exec), OutputOptions::default(), cwd)
    }

    /// Prompt that always picks the same row.
    pub struct FixedPrompt(pub Option<usize>);

    impl JobPrompt for FixedPrompt {
        fn select(&self, _jobs: &[JobInfo]) -> crate::Result<Option<usize>> {
            Ok(self.0)
        }
    }

    /// `docker ps` and `docker inspect` output for jobs given as
    /// (id, status, labels json).
    pub fn script_jobs(exec: &ScriptedExecutor, jobs: &[(&str, &str, &str)]) {
        let names: Vec<String> = jobs.iter().map(|(id, _, _)| format!("n-{}", id)).collect();
        let named: Vec<(&str, &str, &str, &str)> = jobs
            .iter()
            .zip(&names)
            .map(|((id, status, labels), name)| (*id, name.as_str(), *status, *labels))
            .collect();
        script_named_jobs(exec, &named);
    }

    /// Like [`script_jobs`] with explicit container names:
    /// (id, name, status, labels json).
    pub fn script_named_jobs(exec: &ScriptedExecutor, jobs: &[(&str, &str, &str, &str)]) {
        let ps: String = jobs
            .iter()
            .map(|(id, name, status, _)| {
                format!(
                    "{{\"ID\":\"{}\",\"Names\":\"{}\",\"Command\":\"\\\"make\\\"\",\"Status\":\"{}\"}}\n",
                    id, name, status
                )
            })
            .collect();
        let inspect: String = jobs
            .iter()
            .map(|(id, _, _, labels)| format!("{{\"ID\":\"{}\",\"Labels\":{}}}\n", id, labels))
            .collect();
        exec.on("docker ps", &ps);
        exec.on("docker inspect", &inspect);
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::test_utils::ScriptedExecutor;
    use tempfile::TempDir;

    #[test]
    fn test_resolve_stack_prefers_stacks_dir() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        fs::create_dir_all(ctx.settings.stacks_dir.join("fedora")).unwrap();
        fs::create_dir_all(ctx.cwd.join("fedora")).unwrap();
        fs::create_dir_all(ctx.cwd.join("local")).unwrap();

        let from_dir = ctx.resolve_stack(Some("fedora")).value;
        assert!(from_dir.ends_with("config/stacks/fedora"), "{}", from_dir);
        let local = ctx.resolve_stack(Some("local")).value;
        assert!(local.ends_with("work/local"), "{}", local);
        assert_eq!(ctx.resolve_stack(Some("ubuntu:22.04")).value, "ubuntu:22.04");
    }

    #[test]
    fn test_resolve_stack_requires_a_name() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let ctx = context(&exec, &tmp);
        assert_eq!(ctx.resolve_stack(None).error, vec![errors::missing_stack()]);
        assert!(!ctx.resolve_stack(Some("  ")).success);
    }

    #[test]
    fn test_project_root_search_follows_setting() {
        let exec = ScriptedExecutor::new();
        let tmp = TempDir::new().unwrap();
        let mut ctx = context(&exec, &tmp);
        fs::create_dir_all(ctx.cwd.join(crate::project::settings_dir_name())).unwrap();
        let nested = ctx.cwd.join("src");
        fs::create_dir_all(&nested).unwrap();
        let root = ctx.cwd.clone();
        ctx.cwd = nested;

        let found = ctx.project_root(None).unwrap();
        assert_eq!(fs::canonicalize(found).unwrap(), fs::canonicalize(&root).unwrap());

        ctx.settings.auto_project_root = false;
        assert_eq!(ctx.project_root(None), None);
    }
}
