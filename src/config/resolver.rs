//! Resolution of settings against their built-in defaults.
//!
//! ## Precedence (highest to lowest)
//!
//! 1. CLI flags (applied by the command layer)
//! 2. `settings.kdl` in the config directory
//! 3. Built-in defaults

use std::path::{Path, PathBuf};

use serde::Serialize;

use super::Paths;
use super::schema::{CliSettings, FileAccess, RunMode, SETTING_KEYS};
use crate::drivers::DriverKind;

pub const DEFAULT_IMAGE_TAG: &str = "cjr";
pub const DEFAULT_JOB_LS_FIELDS: &str = "id, stackName, command, status";
pub const DEFAULT_CONTAINER_SHELL: &str = "bash";
pub const DEFAULT_JUPYTER_COMMAND: &str = "jupyter lab";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueSource {
    /// Value from `settings.kdl`
    File,
    /// Built-in default value
    Default,
}

impl std::fmt::Display for ValueSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueSource::File => write!(f, "file"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// Fully resolved settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Settings {
    pub auto_project_root: bool,
    pub interactive: bool,
    pub stacks_dir: PathBuf,
    pub autocopy_sync_job: bool,
    pub job_default_run_mode: RunMode,
    pub build_driver: DriverKind,
    pub run_driver: DriverKind,
    pub image_tag: String,
    pub job_ls_fields: String,
    pub container_default_shell: String,
    pub selinux: bool,
    pub file_access: FileAccess,
    pub jupyter_command: String,
    /// Open an ssh master before multi-step remote operations.
    pub remote_autoconnect: bool,
    /// Close that master when the operation returns.
    pub remote_autodisconnect: bool,
    /// Replace a running master instead of reusing it.
    pub remote_restart_existing_connection: bool,
}

/// One row of `config ls`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettingEntry {
    pub key: String,
    pub value: String,
    pub source: ValueSource,
}

impl Serialize for DriverKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for DriverKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn default_stacks_dir(config_dir: &Path) -> PathBuf {
    config_dir.join("stacks")
}

impl Settings {
    /// Built-in defaults for a config directory.
    pub fn defaults(paths: &Paths) -> Self {
        Self::resolve(&CliSettings::new(), paths)
    }

    /// Apply `file` on top of the defaults.
    pub fn resolve(file: &CliSettings, paths: &Paths) -> Self {
        let driver = DriverKind::platform_default();
        Self {
            auto_project_root: file.auto_project_root.unwrap_or(true),
            interactive: file.interactive.unwrap_or(true),
            stacks_dir: file
                .stacks_dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(|| default_stacks_dir(&paths.config_dir)),
            autocopy_sync_job: file.autocopy_sync_job.unwrap_or(true),
            job_default_run_mode: file.job_default_run_mode.unwrap_or_default(),
            build_driver: file.build_driver.unwrap_or(driver),
            run_driver: file.run_driver.unwrap_or(driver),
            image_tag: file
                .image_tag
                .clone()
                .unwrap_or_else(|| DEFAULT_IMAGE_TAG.to_string()),
            job_ls_fields: file
                .job_ls_fields
                .clone()
                .unwrap_or_else(|| DEFAULT_JOB_LS_FIELDS.to_string()),
            container_default_shell: file
                .container_default_shell
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTAINER_SHELL.to_string()),
            selinux: file.selinux.unwrap_or(false),
            file_access: file.file_access.unwrap_or_default(),
            jupyter_command: file
                .jupyter_command
                .clone()
                .unwrap_or_else(|| DEFAULT_JUPYTER_COMMAND.to_string()),
            remote_autoconnect: file.remote_autoconnect.unwrap_or(true),
            remote_autodisconnect: file.remote_autodisconnect.unwrap_or(true),
            remote_restart_existing_connection: file.remote_restart_existing_connection.unwrap_or(true),
        }
    }

    /// Resolved value of `key` as text.
    pub fn value_of(&self, key: &str) -> Option<String> {
        let value = match key {
            "auto-project-root" => self.auto_project_root.to_string(),
            "interactive" => self.interactive.to_string(),
            "stacks-dir" => self.stacks_dir.display().to_string(),
            "autocopy-sync-job" => self.autocopy_sync_job.to_string(),
            "job-default-run-mode" => self.job_default_run_mode.as_str().to_string(),
            "build-driver" => self.build_driver.to_string(),
            "run-driver" => self.run_driver.to_string(),
            "image-tag" => self.image_tag.clone(),
            "job-ls-fields" => self.job_ls_fields.clone(),
            "container-default-shell" => self.container_default_shell.clone(),
            "selinux" => self.selinux.to_string(),
            "file-access" => self.file_access.to_string(),
            "jupyter-command" => self.jupyter_command.clone(),
            "remote-autoconnect" => self.remote_autoconnect.to_string(),
            "remote-autodisconnect" => self.remote_autodisconnect.to_string(),
            "remote-restart-existing-connection" => self.remote_restart_existing_connection.to_string(),
            _ => return None,
        };
        Some(value)
    }

    /// Every key with its resolved value and source.
    pub fn entries(&self, file: &CliSettings) -> Vec<SettingEntry> {
        SETTING_KEYS
            .iter()
            .filter_map(|key| {
                let value = self.value_of(key)?;
                let source = if file.get(key).is_some() {
                    ValueSource::File
                } else {
                    ValueSource::Default
                };
                Some(SettingEntry {
                    key: key.to_string(),
                    value,
                    source,
                })
            })
            .collect()
    }

    /// Fields shown by `job ls`, split on commas.
    pub fn job_ls_field_list(&self) -> Vec<String> {
        self.job_ls_fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect()
    }
}
