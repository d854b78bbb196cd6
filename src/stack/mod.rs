//! Stack configuration model.
//!
//! A stack is a directory holding a `Dockerfile`, an image archive
//! (`image.tar` / `image.tar.gz`) or only a `config.yml` naming an image. A
//! stack path that is not a local directory is treated as a remote image
//! reference. The configuration is the base `config.yml` with any override
//! files merged on top, later files winning.

pub mod schema;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

pub use schema::{
    BuildSection, FilesSection, Mount, PortMapping, Resources, RsyncFiles, RunFlags,
    StackConfigFile,
};

use crate::ValidatedOutput;
use crate::errors;

/// Configuration file inside every stack directory.
pub const CONFIG_FILENAME: &str = "config.yml";
/// Basename of image archives (`image.tar`, `image.tar.gz`).
pub const ARCHIVE_BASENAME: &str = "image";
pub const DOCKERFILE: &str = "Dockerfile";
pub const DEFAULT_CONTAINER_ROOT: &str = "/";

/// Fixed names of the rsync rule files inside a stack bundle.
pub mod bundle_files {
    pub const UPLOAD_INCLUDE: &str = "upload-include";
    pub const UPLOAD_EXCLUDE: &str = "upload-exclude";
    pub const DOWNLOAD_INCLUDE: &str = "download-include";
    pub const DOWNLOAD_EXCLUDE: &str = "download-exclude";
}

/// How a stack produces its image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StackType {
    Dockerfile,
    Tar,
    #[serde(rename = "tar.gz")]
    TarGz,
    RemoteImage,
    Config,
}

impl StackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StackType::Dockerfile => "dockerfile",
            StackType::Tar => "tar",
            StackType::TarGz => "tar.gz",
            StackType::RemoteImage => "remote-image",
            StackType::Config => "config",
        }
    }

    /// True for stacks backed by a local directory.
    pub fn is_local(&self) -> bool {
        !matches!(self, StackType::RemoteImage)
    }

    /// Inspect a local stack directory. `None` if it has nothing to build from.
    pub fn detect(dir: &Path, config: &StackConfigFile) -> Option<StackType> {
        if dir.join(DOCKERFILE).is_file() {
            Some(StackType::Dockerfile)
        } else if dir.join(format!("{}.tar.gz", ARCHIVE_BASENAME)).is_file() {
            Some(StackType::TarGz)
        } else if dir.join(format!("{}.tar", ARCHIVE_BASENAME)).is_file() {
            Some(StackType::Tar)
        } else if config.build.as_ref().and_then(|b| b.image.as_ref()).is_some() {
            Some(StackType::Config)
        } else {
            None
        }
    }
}

impl std::fmt::Display for StackType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Last path component of a stack path.
pub fn stack_basename(stack_path: &str) -> String {
    let trimmed = stack_path.trim_end_matches('/');
    trimmed
        .rsplit('/')
        .next()
        .unwrap_or(trimmed)
        .to_string()
}

/// A loaded stack: where it lives, what type it is and its merged configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackConfiguration {
    stack_path: String,
    stack_type: StackType,
    tag: String,
    pub config: StackConfigFile,
}

impl StackConfiguration {
    pub fn new(stack_path: impl Into<String>, stack_type: StackType, tag: impl Into<String>) -> Self {
        Self {
            stack_path: stack_path.into(),
            stack_type,
            tag: tag.into(),
            config: StackConfigFile::default(),
        }
    }

    /// Read a configuration file. Relative paths inside it resolve against
    /// the file's directory. A missing file yields `None`.
    pub fn read_config_file(path: &Path) -> ValidatedOutput<Option<StackConfigFile>> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return ValidatedOutput::ok(None);
            }
            Err(e) => {
                return ValidatedOutput::failed(errors::invalid_stack_config(
                    &path.display().to_string(),
                    &e.to_string(),
                ));
            }
        };
        match StackConfigFile::from_yaml(&text) {
            Ok(mut file) => {
                if let Some(dir) = path.parent() {
                    resolve_relative_paths(&mut file, dir);
                }
                ValidatedOutput::ok(Some(file))
            }
            Err(e) => ValidatedOutput::failed(errors::invalid_stack_config(
                &path.display().to_string(),
                &e.to_string(),
            )),
        }
    }

    /// Load the base config (local stacks only) and merge each override on top.
    /// Missing files are skipped.
    pub fn load(
        stack_path: &str,
        stack_type: StackType,
        overrides: &[PathBuf],
        tag: &str,
    ) -> ValidatedOutput<StackConfiguration> {
        let mut result = ValidatedOutput::ok(StackConfiguration::new(stack_path, stack_type, tag));
        let mut files = Vec::new();
        if stack_type.is_local() {
            files.push(Path::new(stack_path).join(CONFIG_FILENAME));
        }
        files.extend(overrides.iter().cloned());

        for file in &files {
            let read = Self::read_config_file(file);
            result.absorb(&read);
            if let Some(layer) = read.value {
                result.value.config.merge(&layer);
            }
        }
        result
    }

    /// Load a stack without touching the runtime: a local directory gets its
    /// type detected from its contents, anything else is a remote image.
    pub fn open(stack_path: &str, overrides: &[PathBuf], tag: &str) -> ValidatedOutput<StackConfiguration> {
        let dir = Path::new(stack_path);
        if !dir.is_dir() {
            return Self::load(stack_path, StackType::RemoteImage, overrides, tag);
        }
        let mut result = Self::load(stack_path, StackType::Config, overrides, tag);
        if !result.success {
            return result;
        }
        match StackType::detect(dir, &result.value.config) {
            Some(stack_type) => result.value.set_stack_type(stack_type),
            None => {
                result.push_error(errors::missing_dockerfile_or_image(stack_path));
            }
        }
        result
    }

    pub fn stack_path(&self) -> &str {
        &self.stack_path
    }

    pub fn stack_type(&self) -> StackType {
        self.stack_type
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn set_stack_type(&mut self, stack_type: StackType) {
        self.stack_type = stack_type;
    }

    /// Local directory of the stack, if it has one.
    pub fn stack_dir(&self) -> Option<&Path> {
        self.stack_type
            .is_local()
            .then(|| Path::new(self.stack_path.as_str()))
    }

    pub fn stack_name(&self) -> String {
        stack_basename(&self.stack_path)
    }

    /// Stack name usable as a directory name on a remote host.
    pub fn safe_stack_name(&self) -> String {
        self.stack_name()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '-'
                }
            })
            .collect()
    }

    /// Name of the image this stack runs.
    pub fn image_name(&self) -> String {
        match self.stack_type {
            StackType::RemoteImage => self.stack_path.clone(),
            StackType::Config => self
                .build()
                .and_then(|b| b.image.clone())
                .unwrap_or_default(),
            _ => format!("{}:{}", self.stack_name(), self.tag).to_lowercase(),
        }
    }

    fn build(&self) -> Option<&BuildSection> {
        self.config.build.as_ref()
    }

    pub fn dockerfile(&self) -> String {
        self.build()
            .and_then(|b| b.dockerfile.clone())
            .unwrap_or_else(|| DOCKERFILE.to_string())
    }

    pub fn build_context(&self) -> String {
        self.build()
            .and_then(|b| b.context.clone())
            .unwrap_or_else(|| ".".to_string())
    }

    pub fn build_args(&self) -> Vec<(String, String)> {
        self.build()
            .and_then(|b| b.args.clone())
            .map(|args| args.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn build_labels(&self) -> Vec<(String, String)> {
        self.build()
            .and_then(|b| b.labels.clone())
            .map(|labels| labels.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn no_cache(&self) -> bool {
        self.build().and_then(|b| b.no_cache).unwrap_or(false)
    }

    pub fn pull(&self) -> bool {
        self.build().and_then(|b| b.pull).unwrap_or(false)
    }

    pub fn container_root(&self) -> String {
        self.config
            .files
            .as_ref()
            .and_then(|f| f.container_root.clone())
            .unwrap_or_else(|| DEFAULT_CONTAINER_ROOT.to_string())
    }

    pub fn rsync_files(&self) -> RsyncFiles {
        self.config
            .files
            .as_ref()
            .and_then(|f| f.rsync.clone())
            .unwrap_or_default()
    }

    pub fn mounts(&self) -> &[Mount] {
        self.config.mounts.as_deref().unwrap_or(&[])
    }

    pub fn ports(&self) -> &[PortMapping] {
        self.config.ports.as_deref().unwrap_or(&[])
    }

    pub fn add_mount(&mut self, mount: Mount) {
        self.config.mounts.get_or_insert_with(Vec::new).push(mount);
    }

    pub fn add_bind(&mut self, host_path: impl Into<String>, container_path: impl Into<String>) {
        self.add_mount(Mount::bind(host_path, container_path));
    }

    pub fn add_port(&mut self, port: PortMapping) {
        self.config.ports.get_or_insert_with(Vec::new).push(port);
    }

    pub fn add_env(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.config
            .environment
            .get_or_insert_with(Default::default)
            .insert(key.into(), value.into());
    }

    pub fn set_working_dir(&mut self, dir: impl Into<String>) {
        self.config.working_directory = Some(dir.into());
    }

    /// Write the configuration needed to rebuild this stack elsewhere into `dest`.
    ///
    /// Only `config.yml` and the rsync rule files are written; the stack's own
    /// files are transferred separately. Bind mounts inside the stack become
    /// relative, binds outside it are dropped with a warning. Remote image
    /// stacks become config stacks naming the image.
    pub fn write_bundle(&self, dest: &Path) -> ValidatedOutput<()> {
        let mut result = ValidatedOutput::ok(());
        let mut config = self.config.clone();

        if self.stack_type == StackType::RemoteImage {
            config.build.get_or_insert_with(Default::default).image = Some(self.stack_path.clone());
        }

        if let Some(mounts) = config.mounts.take() {
            let mut kept = Vec::new();
            for mount in mounts {
                match mount {
                    Mount::Bind {
                        host_path,
                        container_path,
                        readonly,
                        consistency,
                        selinux,
                    } => {
                        let relative = self
                            .stack_dir()
                            .and_then(|dir| Path::new(&host_path).strip_prefix(dir).ok())
                            .map(|rel| rel.to_string_lossy().into_owned());
                        match relative {
                            Some(rel) => kept.push(Mount::Bind {
                                host_path: if rel.is_empty() { ".".into() } else { rel },
                                container_path,
                                readonly,
                                consistency,
                                selinux,
                            }),
                            None => {
                                result.push_warning(errors::bind_outside_stack(&host_path));
                            }
                        }
                    }
                    other => kept.push(other),
                }
            }
            config.mounts = Some(kept);
        }

        if let Err(e) = fs::create_dir_all(dest) {
            result.push_error(e.to_string());
            return result;
        }

        let source = self.rsync_files();
        let mut bundled = RsyncFiles::default();
        let copies = [
            (&source.upload_include, &mut bundled.upload_include, bundle_files::UPLOAD_INCLUDE),
            (&source.upload_exclude, &mut bundled.upload_exclude, bundle_files::UPLOAD_EXCLUDE),
            (&source.download_include, &mut bundled.download_include, bundle_files::DOWNLOAD_INCLUDE),
            (&source.download_exclude, &mut bundled.download_exclude, bundle_files::DOWNLOAD_EXCLUDE),
        ];
        for (from, to, name) in copies {
            let Some(from) = from else { continue };
            if !Path::new(from).is_file() {
                continue;
            }
            match fs::copy(from, dest.join(name)) {
                Ok(_) => *to = Some(name.to_string()),
                Err(e) => {
                    result.push_error(e.to_string());
                }
            }
        }
        if let Some(files) = config.files.as_mut() {
            files.rsync = Some(bundled);
        }

        match config.to_yaml() {
            Ok(text) => {
                if let Err(e) = fs::write(dest.join(CONFIG_FILENAME), text) {
                    result.push_error(e.to_string());
                }
            }
            Err(e) => {
                result.push_error(e.to_string());
            }
        }
        result
    }
}

/// Make bind host paths and rsync rule files absolute against `base`.
fn resolve_relative_paths(file: &mut StackConfigFile, base: &Path) {
    let absolute = |p: &str| -> String {
        if Path::new(p).is_absolute() {
            p.to_string()
        } else {
            base.join(p).to_string_lossy().into_owned()
        }
    };
    if let Some(mounts) = file.mounts.as_mut() {
        for mount in mounts.iter_mut() {
            if let Mount::Bind { host_path, .. } = mount {
                *host_path = absolute(host_path);
            }
        }
    }
    if let Some(rsync) = file.files.as_mut().and_then(|f| f.rsync.as_mut()) {
        for path in [
            &mut rsync.upload_include,
            &mut rsync.upload_exclude,
            &mut rsync.download_include,
            &mut rsync.download_exclude,
        ]
        .into_iter()
        .flatten()
        {
            *path = absolute(path);
        }
    }
}
