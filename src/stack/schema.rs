//! Serde schema for stack `config.yml` files.
//!
//! # Example
//!
//! ```yaml
//! build:
//!   args: {PYTHON_VERSION: "3.12"}
//! mounts:
//!   - {type: bind, hostPath: data, containerPath: /data, readonly: true}
//! ports:
//!   - {hostPort: 8888, containerPort: 8888}
//! files:
//!   container-root: /root
//! ```
//!
//! Every field is optional. [`StackConfigFile::merge`] layers files on top of
//! each other: a field set in the later file replaces the earlier value
//! wholesale, unset fields fall through.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One `config.yml` document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct StackConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildSection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mounts: Option<Vec<Mount>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<Vec<PortMapping>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Resources>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<RunFlags>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<FilesSection>,
}

/// How the image is produced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct BuildSection {
    /// Image reference pulled for config-only stacks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dockerfile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_cache: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull: Option<bool>,
}

/// A filesystem mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Mount {
    Bind {
        host_path: String,
        container_path: String,
        #[serde(default)]
        readonly: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        consistency: Option<String>,
        /// Relabel the host path for SELinux (rendered as `--volume ...:z`).
        #[serde(default)]
        selinux: bool,
    },
    Volume {
        volume_name: String,
        container_path: String,
        #[serde(default)]
        readonly: bool,
    },
    Tmpfs {
        container_path: String,
    },
}

impl Mount {
    pub fn bind(host_path: impl Into<String>, container_path: impl Into<String>) -> Self {
        Mount::Bind {
            host_path: host_path.into(),
            container_path: container_path.into(),
            readonly: false,
            consistency: None,
            selinux: false,
        }
    }

    pub fn volume(volume_name: impl Into<String>, container_path: impl Into<String>) -> Self {
        Mount::Volume {
            volume_name: volume_name.into(),
            container_path: container_path.into(),
            readonly: false,
        }
    }

    pub fn container_path(&self) -> &str {
        match self {
            Mount::Bind { container_path, .. }
            | Mount::Volume { container_path, .. }
            | Mount::Tmpfs { container_path } => container_path,
        }
    }
}

/// Host to container port binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Resource limits passed straight to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Resources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swap_memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<String>,
}

/// Extra runtime flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RunFlags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    /// Podman user namespace mode: `host` or `keep-id`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub userns: Option<String>,
}

/// Project file handling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct FilesSection {
    /// Directory inside the container that receives the project root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsync: Option<RsyncFiles>,
}

/// rsync include/exclude rule files used when syncing project files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct RsyncFiles {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_include: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_exclude: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_include: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_exclude: Option<String>,
}

/// Replace `target` when `source` is set.
fn take<T: Clone>(target: &mut Option<T>, source: &Option<T>) {
    if source.is_some() {
        target.clone_from(source);
    }
}

impl StackConfigFile {
    pub fn from_yaml(text: &str) -> crate::Result<Self> {
        // An empty file is a valid, empty configuration.
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn to_yaml(&self) -> crate::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Merge another file into this one. Values from `other` win.
    pub fn merge(&mut self, other: &StackConfigFile) {
        match (&mut self.build, &other.build) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => self.build = Some(theirs.clone()),
            _ => {}
        }
        take(&mut self.entrypoint, &other.entrypoint);
        take(&mut self.environment, &other.environment);
        take(&mut self.mounts, &other.mounts);
        take(&mut self.ports, &other.ports);
        match (&mut self.resources, &other.resources) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => self.resources = Some(theirs.clone()),
            _ => {}
        }
        take(&mut self.working_directory, &other.working_directory);
        match (&mut self.flags, &other.flags) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => self.flags = Some(theirs.clone()),
            _ => {}
        }
        match (&mut self.files, &other.files) {
            (Some(mine), Some(theirs)) => mine.merge(theirs),
            (None, Some(theirs)) => self.files = Some(theirs.clone()),
            _ => {}
        }
    }
}

impl BuildSection {
    pub fn merge(&mut self, other: &BuildSection) {
        take(&mut self.image, &other.image);
        take(&mut self.dockerfile, &other.dockerfile);
        take(&mut self.context, &other.context);
        take(&mut self.args, &other.args);
        take(&mut self.labels, &other.labels);
        take(&mut self.no_cache, &other.no_cache);
        take(&mut self.pull, &other.pull);
    }
}

impl Resources {
    pub fn merge(&mut self, other: &Resources) {
        take(&mut self.cpus, &other.cpus);
        take(&mut self.memory, &other.memory);
        take(&mut self.swap_memory, &other.swap_memory);
        take(&mut self.gpu, &other.gpu);
    }
}

impl RunFlags {
    pub fn merge(&mut self, other: &RunFlags) {
        take(&mut self.network, &other.network);
        take(&mut self.mac_address, &other.mac_address);
        take(&mut self.userns, &other.userns);
    }
}

impl FilesSection {
    pub fn merge(&mut self, other: &FilesSection) {
        take(&mut self.container_root, &other.container_root);
        match (&mut self.rsync, &other.rsync) {
            (Some(mine), Some(theirs)) => {
                take(&mut mine.upload_include, &theirs.upload_include);
                take(&mut mine.upload_exclude, &theirs.upload_exclude);
                take(&mut mine.download_include, &theirs.download_include);
                take(&mut mine.download_exclude, &theirs.download_exclude);
            }
            (None, Some(theirs)) => self.rsync = Some(theirs.clone()),
            _ => {}
        }
    }
}

impl PortMapping {
    /// Parse `host:container` or `address:host:container`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let invalid = || format!("invalid port '{}' (expected [address:]host:container)", spec);
        let (address, ports) = match spec.rsplitn(3, ':').collect::<Vec<_>>().as_slice() {
            [container, host] => (None, (*host, *container)),
            [container, host, address] => (Some(address.to_string()), (*host, *container)),
            _ => return Err(invalid()),
        };
        let host_port = ports.0.parse().map_err(|_| invalid())?;
        let container_port = ports.1.parse().map_err(|_| invalid())?;
        Ok(Self {
            host_port,
            container_port,
            address,
        })
    }
}

impl std::fmt::Display for PortMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.address {
            Some(ref address) => write!(f, "{}:{}:{}", address, self.host_port, self.container_port),
            None => write!(f, "{}:{}", self.host_port, self.container_port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port(p: u16) -> PortMapping {
        PortMapping {
            host_port: p,
            container_port: p,
            address: None,
        }
    }

    #[test]
    fn test_merge_is_right_biased_and_wholesale() {
        let mut base = StackConfigFile {
            mounts: Some(vec![Mount::bind("/a", "/a")]),
            ports: Some(vec![port(80)]),
            ..Default::default()
        };
        let over = StackConfigFile {
            ports: Some(vec![port(443)]),
            ..Default::default()
        };
        base.merge(&over);
        assert_eq!(base.mounts, Some(vec![Mount::bind("/a", "/a")]));
        assert_eq!(base.ports, Some(vec![port(443)]));
    }

    #[test]
    fn test_merge_nested_sections_field_by_field() {
        let mut base = StackConfigFile::from_yaml(
            "build:\n  no-cache: true\n  args: {A: '1'}\nresources:\n  cpus: '2'\n",
        )
        .unwrap();
        let over =
            StackConfigFile::from_yaml("build:\n  args: {B: '2'}\nresources:\n  memory: 4g\n")
                .unwrap();
        base.merge(&over);
        let build = base.build.unwrap();
        assert_eq!(build.no_cache, Some(true));
        let args = build.args.unwrap();
        assert_eq!(args.len(), 1);
        assert_eq!(args["B"], "2");
        let resources = base.resources.unwrap();
        assert_eq!(resources.cpus.as_deref(), Some("2"));
        assert_eq!(resources.memory.as_deref(), Some("4g"));
    }

    #[test]
    fn test_parse_mount_variants() {
        let file = StackConfigFile::from_yaml(
            r#"
mounts:
  - {type: bind, hostPath: /data, containerPath: /data, readonly: true, consistency: cached}
  - {type: volume, volumeName: scratch, containerPath: /scratch}
  - {type: tmpfs, containerPath: /tmp}
"#,
        )
        .unwrap();
        let mounts = file.mounts.unwrap();
        assert_eq!(mounts.len(), 3);
        assert!(matches!(
            &mounts[0],
            Mount::Bind { readonly: true, consistency: Some(c), .. } if c == "cached"
        ));
        assert_eq!(mounts[1].container_path(), "/scratch");
        assert!(matches!(&mounts[2], Mount::Tmpfs { .. }));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(StackConfigFile::from_yaml("bogus: 1\n").is_err());
    }

    #[test]
    fn test_empty_file_is_default() {
        assert_eq!(StackConfigFile::from_yaml("\n").unwrap(), StackConfigFile::default());
    }

    #[test]
    fn test_yaml_round_trip_preserves_fields() {
        let text = "ports:\n- hostPort: 8080\n  containerPort: 80\n  address: 127.0.0.1\nworking-directory: /root\n";
        let file = StackConfigFile::from_yaml(text).unwrap();
        let again = StackConfigFile::from_yaml(&file.to_yaml().unwrap()).unwrap();
        assert_eq!(file, again);
    }

    #[test]
    fn test_port_spec() {
        assert_eq!(PortMapping::parse("8888:80").unwrap(), PortMapping {
            host_port: 8888,
            container_port: 80,
            address: None,
        });
        let bound = PortMapping::parse("127.0.0.1:8888:80").unwrap();
        assert_eq!(bound.address.as_deref(), Some("127.0.0.1"));
        assert_eq!(bound.to_string(), "127.0.0.1:8888:80");
        assert!(PortMapping::parse("8888").is_err());
        assert!(PortMapping::parse("a:b").is_err());
    }
}
