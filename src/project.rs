//! Project roots and project identity.
//!
//! A project root is the host directory exposed to a job. A directory is
//! marked as a project root by a `.cjr/` folder, which also holds the
//! `project-id.json` file used to correlate local and remote job data.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{CLI_NAME, Result};

/// Project settings folder name (`.cjr`).
pub fn settings_dir_name() -> String {
    format!(".{}", CLI_NAME)
}

pub const PROJECT_ID_FILE: &str = "project-id.json";

/// Project id used for remote operations without a local project root.
pub const EMPTY_PROJECT_ID: &str = "EMPTY";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ProjectIdFile {
    id: String,
}

pub fn project_id_path(project_root: &Path) -> PathBuf {
    project_root
        .join(settings_dir_name())
        .join(PROJECT_ID_FILE)
}

/// Read the project id, if one has been assigned.
pub fn get_project_id(project_root: &Path) -> Option<String> {
    let text = fs::read_to_string(project_id_path(project_root)).ok()?;
    let file: ProjectIdFile = serde_json::from_str(&text).ok()?;
    (!file.id.is_empty()).then_some(file.id)
}

/// Read the project id, creating it on first use.
///
/// New ids are a sha256 over the canonical root path and a random v4 UUID, so
/// two checkouts of the same tree never collide while one checkout keeps its id.
pub fn ensure_project_id(project_root: &Path) -> Result<String> {
    if let Some(id) = get_project_id(project_root) {
        return Ok(id);
    }
    let canonical = fs::canonicalize(project_root)?;
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    let id: String = hasher
        .finalize()
        .iter()
        .take(16)
        .map(|b| format!("{:02x}", b))
        .collect();

    let path = project_id_path(project_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(&path, serde_json::to_string(&ProjectIdFile { id: id.clone() })?)?;
    Ok(id)
}

/// Walk up from `start` to the first directory containing a `.cjr` folder.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let marker = settings_dir_name();
    start
        .ancestors()
        .find(|dir| dir.join(&marker).is_dir())
        .map(Path::to_path_buf)
}

/// Components of `child` below `parent`, or `None` if it is not inside it.
fn relative_components(parent: &Path, child: &Path) -> Option<Vec<String>> {
    let normal = |p: &Path| -> Vec<String> {
        p.components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect()
    };
    let parent = normal(parent);
    let child = normal(child);
    if child.len() < parent.len() || child[..parent.len()] != parent[..] {
        return None;
    }
    Some(child[parent.len()..].to_vec())
}

/// Working directory inside the container for a host `cwd`.
///
/// If `cwd` lies under `host_root`, the result is the container root (without
/// trailing slash), then the basename of the host root, then the relative path
/// from the host root to `cwd`, joined by `/`. Otherwise `None`.
///
/// # Example
/// ```
/// use std::path::Path;
/// use cjr::project::container_working_dir;
/// let wd = container_working_dir(
///     Path::new("/home/me/proj/src/lib"),
///     Path::new("/home/me/proj"),
///     "/root/",
/// );
/// assert_eq!(wd.as_deref(), Some("/root/proj/src/lib"));
/// ```
pub fn container_working_dir(cwd: &Path, host_root: &Path, container_root: &str) -> Option<String> {
    let rel = relative_components(host_root, cwd)?;
    let basename = host_root.file_name()?.to_string_lossy().into_owned();
    let mut parts = vec![container_root.trim_end_matches('/').to_string(), basename];
    parts.extend(rel);
    Some(parts.join("/"))
}

/// Parent directory of a posix path, as used for remote paths.
pub fn posix_dirname(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None => ".".to_string(),
    }
}

/// Join posix path segments with a single `/`.
pub fn posix_join(base: &str, rest: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        rest.trim_start_matches('/')
    )
}

/// Lexically normalize a posix path: collapse `//`, drop `.`, resolve `..`.
pub fn posix_normalize(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if path.starts_with('/') {
        format!("/{}", joined)
    } else {
        joined
    }
}
