//! KDL schema for `settings.kdl`.
//!
//! ```kdl
//! interactive #false
//! run-driver "docker-cli"
//! build-driver "docker-cli"
//! stacks-dir "/home/me/stacks"
//! file-access "volume"
//! remote-restart-existing-connection #false
//! ```
//!
//! Every key is optional; unset keys fall back to the defaults in
//! [`super::resolver`]. Values that do not parse are skipped on load and
//! rejected by [`CliSettings::set`].

use kdl::{KdlDocument, KdlEntry, KdlNode, KdlValue};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::drivers::DriverKind;

/// How project files reach a job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAccess {
    /// Bind-mount the project root.
    #[default]
    Bind,
    /// Copy the project into a fresh named volume.
    Volume,
}

impl FileAccess {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bind" => Some(FileAccess::Bind),
            "volume" => Some(FileAccess::Volume),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileAccess::Bind => "bind",
            FileAccess::Volume => "volume",
        }
    }
}

impl std::fmt::Display for FileAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether `run` waits for the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Sync,
    Async,
}

impl RunMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sync" => Some(RunMode::Sync),
            "async" => Some(RunMode::Async),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Sync => "sync",
            RunMode::Async => "async",
        }
    }
}

/// Every key `settings.kdl` understands, in display order.
pub const SETTING_KEYS: &[&str] = &[
    "auto-project-root",
    "interactive",
    "stacks-dir",
    "autocopy-sync-job",
    "job-default-run-mode",
    "build-driver",
    "run-driver",
    "image-tag",
    "job-ls-fields",
    "container-default-shell",
    "selinux",
    "file-access",
    "jupyter-command",
    "remote-autoconnect",
    "remote-autodisconnect",
    "remote-restart-existing-connection",
];

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw {
        "true" | "#true" => Ok(true),
        "false" | "#false" => Ok(false),
        other => Err(format!("expected true or false, got '{}'", other)),
    }
}

fn non_empty(raw: &str) -> Result<String, String> {
    if raw.trim().is_empty() {
        Err("value must not be empty".to_string())
    } else {
        Ok(raw.to_string())
    }
}

/// Values stored in `settings.kdl`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CliSettings {
    pub auto_project_root: Option<bool>,
    pub interactive: Option<bool>,
    pub stacks_dir: Option<String>,
    pub autocopy_sync_job: Option<bool>,
    pub job_default_run_mode: Option<RunMode>,
    pub build_driver: Option<DriverKind>,
    pub run_driver: Option<DriverKind>,
    pub image_tag: Option<String>,
    pub job_ls_fields: Option<String>,
    pub container_default_shell: Option<String>,
    pub selinux: Option<bool>,
    pub file_access: Option<FileAccess>,
    pub jupyter_command: Option<String>,
    pub remote_autoconnect: Option<bool>,
    pub remote_autodisconnect: Option<bool>,
    pub remote_restart_existing_connection: Option<bool>,
}

impl CliSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set one key from its textual form.
    pub fn set(&mut self, key: &str, raw: &str) -> Result<(), String> {
        match key {
            "auto-project-root" => self.auto_project_root = Some(parse_bool(raw)?),
            "interactive" => self.interactive = Some(parse_bool(raw)?),
            "stacks-dir" => self.stacks_dir = Some(non_empty(raw)?),
            "autocopy-sync-job" => self.autocopy_sync_job = Some(parse_bool(raw)?),
            "job-default-run-mode" => {
                self.job_default_run_mode = Some(
                    RunMode::parse(raw).ok_or_else(|| format!("expected sync or async, got '{}'", raw))?,
                )
            }
            "build-driver" => self.build_driver = Some(raw.parse()?),
            "run-driver" => self.run_driver = Some(raw.parse()?),
            "image-tag" => {
                let tag = non_empty(raw)?;
                if !tag
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
                {
                    return Err(format!("'{}' is not a valid image tag", raw));
                }
                self.image_tag = Some(tag);
            }
            "job-ls-fields" => self.job_ls_fields = Some(non_empty(raw)?),
            "container-default-shell" => self.container_default_shell = Some(non_empty(raw)?),
            "selinux" => self.selinux = Some(parse_bool(raw)?),
            "file-access" => {
                self.file_access = Some(
                    FileAccess::parse(raw).ok_or_else(|| format!("expected bind or volume, got '{}'", raw))?,
                )
            }
            "jupyter-command" => {
                let command = non_empty(raw)?;
                if !matches!(command.as_str(), "jupyter lab" | "jupyter notebook") {
                    return Err(format!(
                        "expected 'jupyter lab' or 'jupyter notebook', got '{}'",
                        raw
                    ));
                }
                self.jupyter_command = Some(command);
            }
            "remote-autoconnect" => self.remote_autoconnect = Some(parse_bool(raw)?),
            "remote-autodisconnect" => self.remote_autodisconnect = Some(parse_bool(raw)?),
            "remote-restart-existing-connection" => {
                self.remote_restart_existing_connection = Some(parse_bool(raw)?)
            }
            other => return Err(format!("unknown setting '{}'", other)),
        }
        Ok(())
    }

    /// Stored value of `key`, if set.
    pub fn get(&self, key: &str) -> Option<KdlValue> {
        let text = |v: &Option<String>| v.clone().map(KdlValue::String);
        match key {
            "auto-project-root" => self.auto_project_root.map(KdlValue::Bool),
            "interactive" => self.interactive.map(KdlValue::Bool),
            "stacks-dir" => text(&self.stacks_dir),
            "autocopy-sync-job" => self.autocopy_sync_job.map(KdlValue::Bool),
            "job-default-run-mode" => self
                .job_default_run_mode
                .map(|m| KdlValue::String(m.as_str().to_string())),
            "build-driver" => self.build_driver.map(|d| KdlValue::String(d.as_str().to_string())),
            "run-driver" => self.run_driver.map(|d| KdlValue::String(d.as_str().to_string())),
            "image-tag" => text(&self.image_tag),
            "job-ls-fields" => text(&self.job_ls_fields),
            "container-default-shell" => text(&self.container_default_shell),
            "selinux" => self.selinux.map(KdlValue::Bool),
            "file-access" => self
                .file_access
                .map(|f| KdlValue::String(f.as_str().to_string())),
            "jupyter-command" => text(&self.jupyter_command),
            "remote-autoconnect" => self.remote_autoconnect.map(KdlValue::Bool),
            "remote-autodisconnect" => self.remote_autodisconnect.map(KdlValue::Bool),
            "remote-restart-existing-connection" => {
                self.remote_restart_existing_connection.map(KdlValue::Bool)
            }
            _ => None,
        }
    }

    /// Parse settings from a KDL document. Unknown keys and bad values are
    /// skipped with a warning.
    pub fn from_kdl(doc: &KdlDocument) -> Self {
        let mut settings = Self::new();
        for node in doc.nodes() {
            let key = node.name().value();
            let Some(entry) = node.entries().first() else {
                continue;
            };
            let raw = match entry.value() {
                KdlValue::String(s) => s.clone(),
                KdlValue::Bool(b) => b.to_string(),
                KdlValue::Integer(i) => i.to_string(),
                other => other.to_string(),
            };
            if let Err(e) = settings.set(key, &raw) {
                warn!(key = %key, error = %e, "ignoring setting");
            }
        }
        settings
    }

    /// Convert to a KDL document, one node per set key.
    pub fn to_kdl(&self) -> KdlDocument {
        let mut doc = KdlDocument::new();
        for key in SETTING_KEYS {
            if let Some(value) = self.get(key) {
                let mut node = KdlNode::new(*key);
                node.push(KdlEntry::new(value));
                doc.nodes_mut().push(node);
            }
        }
        doc
    }

    /// Values from `other` override values in `self` if they are set.
    pub fn merge(&mut self, other: &CliSettings) {
        for key in SETTING_KEYS {
            if let Some(value) = other.get(key) {
                let raw = match value {
                    KdlValue::String(s) => s,
                    KdlValue::Bool(b) => b.to_string(),
                    other => other.to_string(),
                };
                // Values read back from a valid CliSettings always parse.
                let _ = self.set(key, &raw);
            }
        }
    }
}
