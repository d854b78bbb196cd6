//! Registry of named remote resources, stored as `resources.json`.
//!
//! ```json
//! {
//!   "gpu-box": {
//!     "type": "cjr",
//!     "address": "10.0.0.5",
//!     "username": "ops",
//!     "key": "/home/me/.ssh/id_ed25519",
//!     "storage-dir": "/scratch/ops",
//!     "enabled": true
//!   }
//! }
//! ```
//!
//! The whole file is validated when it is read, so a malformed registry fails
//! on the first command that touches it rather than when a bad entry is used.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::shell::ssh::SshTarget;
use crate::{ValidatedOutput, errors};

pub const RESOURCES_FILENAME: &str = "resources.json";

/// Kind of remote host. Only hosts running this tool are supported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    #[default]
    Cjr,
}

fn enabled_default() -> bool {
    true
}

/// One remote target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Resource {
    #[serde(rename = "type")]
    pub kind: ResourceType,
    pub address: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub storage_dir: String,
    #[serde(default = "enabled_default")]
    pub enabled: bool,
}

/// Fields that `resource set` may change.
pub const RESOURCE_FIELDS: &[&str] = &["address", "username", "key", "storage-dir", "enabled"];

impl Resource {
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        storage_dir: impl Into<String>,
    ) -> Self {
        Self {
            kind: ResourceType::Cjr,
            address: address.into(),
            username: username.into(),
            key: None,
            storage_dir: storage_dir.into(),
            enabled: true,
        }
    }

    pub fn ssh_target(&self) -> SshTarget {
        SshTarget {
            address: self.address.clone(),
            username: self.username.clone(),
            key: self.key.clone(),
        }
    }

    /// Required fields must be non-blank.
    pub fn check(&self) -> Result<(), String> {
        let required = [
            ("address", &self.address),
            ("username", &self.username),
            ("storage-dir", &self.storage_dir),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("missing required fields: {}", missing.join(", ")))
        }
    }

    /// Change one field from its textual form.
    pub fn set_field(&mut self, field: &str, value: &str) -> Result<(), String> {
        match field {
            "address" => self.address = value.to_string(),
            "username" => self.username = value.to_string(),
            "storage-dir" => self.storage_dir = value.to_string(),
            "key" => {
                self.key = (!value.is_empty()).then(|| value.to_string());
            }
            "enabled" => {
                self.enabled = match value {
                    "true" => true,
                    "false" => false,
                    other => return Err(format!("expected true or false, got '{}'", other)),
                }
            }
            other => return Err(format!("unknown field '{}'", other)),
        }
        self.check()
    }
}

/// All configured resources, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceRegistry {
    path: PathBuf,
    resources: BTreeMap<String, Resource>,
}

impl ResourceRegistry {
    /// Empty registry that will be written to `config_dir/resources.json`.
    pub fn empty(config_dir: &Path) -> Self {
        Self {
            path: config_dir.join(RESOURCES_FILENAME),
            resources: BTreeMap::new(),
        }
    }

    /// Read and validate the registry. A missing file is an empty registry.
    pub fn load(config_dir: &Path) -> ValidatedOutput<Self> {
        let mut registry = Self::empty(config_dir);
        let shown = registry.path.display().to_string();
        let text = match fs::read_to_string(&registry.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ValidatedOutput::ok(registry);
            }
            Err(e) => {
                return ValidatedOutput::failure(registry, errors::invalid_resource_file(&shown, &e.to_string()));
            }
        };
        let parsed: BTreeMap<String, Resource> = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                return ValidatedOutput::failure(registry, errors::invalid_resource_file(&shown, &e.to_string()));
            }
        };
        for (name, resource) in &parsed {
            if let Err(details) = resource.check() {
                return ValidatedOutput::failure(
                    registry,
                    errors::invalid_resource_file(&shown, &format!("{}: {}", name, details)),
                );
            }
        }
        registry.resources = parsed;
        ValidatedOutput::ok(registry)
    }

    pub fn save(&self) -> ValidatedOutput<()> {
        let write = || -> crate::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&self.path, serde_json::to_string_pretty(&self.resources)?)?;
            Ok(())
        };
        write().into()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    /// A copy of the named resource; changing it does not change the registry.
    pub fn get(&self, name: &str) -> Option<Resource> {
        self.resources.get(name).cloned()
    }

    /// The named resource, or an error naming it.
    pub fn require(&self, name: &str) -> ValidatedOutput<Resource> {
        match self.get(name) {
            Some(resource) => ValidatedOutput::ok(resource),
            None => ValidatedOutput::failure(
                Resource::new("", "", ""),
                errors::unknown_resource(name),
            ),
        }
    }

    pub fn set(&mut self, name: &str, resource: Resource) -> ValidatedOutput<()> {
        if let Err(details) = resource.check() {
            return ValidatedOutput::failed(errors::invalid_resource(name, &details));
        }
        self.resources.insert(name.to_string(), resource);
        ValidatedOutput::ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Resource> {
        self.resources.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Resource)> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, text: &str) {
        fs::write(dir.join(RESOURCES_FILENAME), text).unwrap();
    }

    #[test]
    fn test_missing_file_is_empty_registry() {
        let tmp = TempDir::new().unwrap();
        let out = ResourceRegistry::load(tmp.path());
        assert!(out.success);
        assert!(out.value.is_empty());
    }

    #[test]
    fn test_load_and_get_returns_copy() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            r#"{"gpu": {"type": "cjr", "address": "10.0.0.5", "username": "ops", "storage-dir": "/scratch"}}"#,
        );
        let registry = ResourceRegistry::load(tmp.path()).value;
        let mut copy = registry.get("gpu").unwrap();
        assert!(copy.enabled);
        assert_eq!(copy.key, None);
        copy.address = "changed".into();
        assert_eq!(registry.get("gpu").unwrap().address, "10.0.0.5");
    }

    #[test]
    fn test_unknown_field_fails_on_load() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path(),
            r#"{"gpu": {"type": "cjr", "address": "a", "username": "u", "storage-dir": "/s", "port": 22}}"#,
        );
        let out = ResourceRegistry::load(tmp.path());
        assert!(!out.success);
        assert!(out.error[0].contains("Invalid resource file"));
    }

    #[test]
    fn test_missing_required_field_fails_on_load() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path(), r#"{"gpu": {"type": "cjr", "address": "a", "username": "u"}}"#);
        assert!(!ResourceRegistry::load(tmp.path()).success);

        write(
            tmp.path(),
            r#"{"gpu": {"type": "ssh", "address": "a", "username": "u", "storage-dir": "/s"}}"#,
        );
        assert!(!ResourceRegistry::load(tmp.path()).success);
    }

    #[test]
    fn test_set_save_reload() {
        let tmp = TempDir::new().unwrap();
        let mut registry = ResourceRegistry::empty(tmp.path());
        assert!(!registry.set("bad", Resource::new("", "u", "/s")).success);
        assert!(registry.set("gpu", Resource::new("10.0.0.5", "ops", "/scratch")).success);
        assert!(registry.save().success);

        let reloaded = ResourceRegistry::load(tmp.path()).value;
        assert_eq!(reloaded.len(), 1);
        let text = fs::read_to_string(reloaded.path()).unwrap();
        assert!(text.contains("\"storage-dir\": \"/scratch\""));
        assert!(text.contains("\"type\": \"cjr\""));
    }

    #[test]
    fn test_set_field_validates() {
        let mut r = Resource::new("a", "u", "/s");
        assert!(r.set_field("enabled", "false").is_ok());
        assert!(!r.enabled);
        assert!(r.set_field("enabled", "nope").is_err());
        assert!(r.set_field("key", "/k").is_ok());
        assert_eq!(r.key.as_deref(), Some("/k"));
        assert!(r.set_field("address", "").is_err());
        assert!(r.set_field("colour", "x").is_err());
    }

    #[test]
    fn test_require_unknown() {
        let tmp = TempDir::new().unwrap();
        let registry = ResourceRegistry::empty(tmp.path());
        let out = registry.require("nope");
        assert_eq!(out.error, vec![errors::unknown_resource("nope")]);
    }
}
