//! Configuration and local state locations.
//!
//! ## settings.kdl - User preferences
//!
//! Located at `~/.config/cjr/settings.kdl` (override the directory with
//! `CJR_CONFIG_DIR`). See [`schema`] for the keys.
//!
//! ## resources.json - Remote resources
//!
//! Lives next to `settings.kdl`; see [`crate::remote::resource`].
//!
//! ## Data directory
//!
//! `~/.local/share/cjr/` (override with `CJR_DATA_DIR`) holds job records,
//! ssh control sockets and scratch space for stack bundles and copies.
//!
//! ## Precedence
//!
//! CLI flag > settings.kdl > defaults. Use the [`resolver`] module for the
//! last two; the command layer applies flags.

pub mod resolver;
pub mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use kdl::KdlDocument;
use tracing::debug;

use crate::{CLI_NAME, Error, Result, ValidatedOutput, errors};

pub use resolver::{SettingEntry, Settings, ValueSource};
pub use schema::{CliSettings, FileAccess, RunMode, SETTING_KEYS};

pub const CONFIG_DIR_ENV: &str = "CJR_CONFIG_DIR";
pub const DATA_DIR_ENV: &str = "CJR_DATA_DIR";
pub const SETTINGS_FILENAME: &str = "settings.kdl";

/// Where configuration and local state live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

fn dir_from_env(var: &str) -> Option<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

impl Paths {
    /// Directories from the environment, falling back to the platform ones.
    pub fn resolve() -> Result<Self> {
        let config_dir = match dir_from_env(CONFIG_DIR_ENV) {
            Some(dir) => dir,
            None => dirs::config_dir()
                .map(|d| d.join(CLI_NAME))
                .ok_or_else(|| Error::Other("Could not determine config directory".to_string()))?,
        };
        let data_dir = match dir_from_env(DATA_DIR_ENV) {
            Some(dir) => dir,
            None => dirs::data_local_dir()
                .map(|d| d.join(CLI_NAME))
                .ok_or_else(|| Error::Other("Could not determine data directory".to_string()))?,
        };
        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    pub fn settings_file(&self) -> PathBuf {
        self.config_dir.join(SETTINGS_FILENAME)
    }

    pub fn resources_file(&self) -> PathBuf {
        self.config_dir.join(crate::remote::resource::RESOURCES_FILENAME)
    }

    /// Scratch space for stack bundles sent to remote resources.
    pub fn bundle_dir(&self) -> PathBuf {
        self.data_dir.join("bundle")
    }

    /// Scratch space for files copied out of jobs.
    pub fn job_copy_dir(&self) -> PathBuf {
        self.data_dir.join("job-copy")
    }

    /// ssh multiplex control sockets.
    pub fn ssh_dir(&self) -> PathBuf {
        self.data_dir.join("ssh")
    }

    pub fn records_dir(&self) -> PathBuf {
        self.data_dir.join(crate::jobs::record::RECORDS_DIR)
    }
}

/// Read `settings.kdl`. A missing file yields empty settings.
pub fn load_settings(paths: &Paths) -> ValidatedOutput<CliSettings> {
    let path = paths.settings_file();
    let text = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file");
            return ValidatedOutput::ok(CliSettings::new());
        }
        Err(e) => return ValidatedOutput::from_error(e.into()),
    };
    match text.parse::<KdlDocument>() {
        Ok(doc) => ValidatedOutput::ok(CliSettings::from_kdl(&doc)),
        Err(e) => ValidatedOutput::failed(errors::invalid_setting(
            &path.display().to_string(),
            &e.to_string(),
        )),
    }
}

/// Write `settings.kdl`, creating the config directory if needed.
pub fn save_settings(paths: &Paths, settings: &CliSettings) -> Result<()> {
    write_file(&paths.settings_file(), &settings.to_kdl().to_string())
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)?;
    Ok(())
}
