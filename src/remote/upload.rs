//! Where job data lives on a remote resource.
//!
//! Everything is stored below `<storage-dir>/cjr-storage/`:
//!
//! ```text
//! uncached:  <root>/tmp.XXXX/files/<project>     fresh per invocation
//!            <root>/tmp.XXXX/<stack>
//!            <job>/.exec-stacks/tmp.XXXX/<stack>      exec/shell from <job>
//! cached:    <root>/<project-id>/files/<project> reused per project
//!            <root>/<project-id>/<stack>
//! ```
//!
//! Directories are created by a single remote script whose last line echoes
//! the directory it allocated; the functions here build those scripts and turn
//! the echoed directory into the job's paths.

use std::str::FromStr;

use crate::project::{posix_join, posix_normalize};

/// Directory below a resource's storage dir that holds all job data.
pub const STORAGE_BASENAME: &str = "cjr-storage";

/// Per-job subdirectory that receives project files.
pub const FILES_DIR: &str = "files";

/// Subdirectory of a parent job dir holding stacks uploaded for exec/shell.
pub const EXEC_STACKS_DIR: &str = ".exec-stacks";

/// Whether remote storage is reused across invocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UploadMode {
    /// Reuse a directory keyed by project id.
    Cached,
    /// Allocate a fresh directory each time.
    #[default]
    Uncached,
}

impl UploadMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadMode::Cached => "cached",
            UploadMode::Uncached => "uncached",
        }
    }
}

impl FromStr for UploadMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cached" => Ok(UploadMode::Cached),
            "uncached" => Ok(UploadMode::Uncached),
            other => Err(format!("invalid upload mode '{}' (expected cached or uncached)", other)),
        }
    }
}

impl std::fmt::Display for UploadMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage root on a resource.
pub fn storage_root(storage_dir: &str) -> String {
    posix_join(storage_dir, STORAGE_BASENAME)
}

/// True if `job_dir` is a directory strictly inside the storage root of
/// `storage_dir`.
///
/// Storage dirs may use shell variables (`$HOME/jobs`), which the remote shell
/// expands before the directory is recorded. For those only the part after the
/// last variable is compared, as whole path components.
pub fn is_within_storage(job_dir: &str, storage_dir: &str) -> bool {
    let job_dir = posix_normalize(job_dir);
    let root = storage_root(storage_dir);
    let literal = match root.rfind(['$', '~']) {
        None => posix_normalize(&root),
        Some(idx) => match root[idx..].find('/') {
            Some(slash) => posix_normalize(&root[idx + slash..]),
            None => return false,
        },
    };
    let expanded_prefix = root.contains(['$', '~']);
    let components: Vec<&str> = job_dir.split('/').filter(|c| !c.is_empty()).collect();
    let root_components: Vec<&str> = literal.split('/').filter(|c| !c.is_empty()).collect();
    if root_components.is_empty() || components.len() <= root_components.len() {
        return false;
    }
    if expanded_prefix {
        components
            .windows(root_components.len())
            .enumerate()
            .any(|(i, window)| window == root_components.as_slice() && i + window.len() < components.len())
    } else {
        job_dir.starts_with('/') && components[..root_components.len()] == root_components[..]
    }
}

/// Quote a remote directory in double quotes so `$VARS` still expand.
pub fn double_quote(path: &str) -> String {
    let mut quoted = String::with_capacity(path.len() + 2);
    quoted.push('"');
    for c in path.chars() {
        if matches!(c, '"' | '\\' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// A remote directory to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirRequest {
    /// A fresh `mktemp` directory inside `parent`, with `subdirs` created in it.
    Temp { parent: String, subdirs: Vec<String> },
    /// `parent` itself, with `subdirs` created in it.
    Fixed { parent: String, subdirs: Vec<String> },
}

impl DirRequest {
    /// Remote script that creates the directories and echoes the allocated one.
    pub fn script(&self) -> String {
        match self {
            DirRequest::Temp { parent, subdirs } => {
                let parent = double_quote(parent);
                let mut commands = vec![
                    format!("mkdir -p {}", parent),
                    format!("JOBDIR=$(mktemp --tmpdir={} --directory)", parent),
                ];
                commands.extend(
                    subdirs
                        .iter()
                        .map(|s| format!("mkdir -p \"$JOBDIR\"/{}", crate::shell::bash_escape(s))),
                );
                commands.push("echo \"$JOBDIR\"".to_string());
                commands.join(" && ")
            }
            DirRequest::Fixed { parent, subdirs } => {
                let parent = double_quote(parent);
                let mut commands: Vec<String> = subdirs
                    .iter()
                    .map(|s| format!("mkdir -p {}/{}", parent, crate::shell::bash_escape(s)))
                    .collect();
                if commands.is_empty() {
                    commands.push(format!("mkdir -p {}", parent));
                }
                commands.push(format!("echo {}", parent));
                commands.join(" && ")
            }
        }
    }
}

/// Directory request for a job's project files.
pub fn file_dir_request(mode: UploadMode, storage_dir: &str, project_id: &str) -> DirRequest {
    let parent = storage_root(storage_dir);
    match mode {
        UploadMode::Uncached => DirRequest::Temp {
            parent,
            subdirs: vec![FILES_DIR.to_string()],
        },
        UploadMode::Cached => DirRequest::Fixed {
            parent,
            subdirs: vec![format!("{}/{}", project_id, FILES_DIR)],
        },
    }
}

/// Job directory and remote project root from the echoed directory.
///
/// `project_name` is the basename of the local project root; without one the
/// job has no remote project root.
pub fn file_dirs(
    mode: UploadMode,
    echoed: &str,
    project_id: &str,
    project_name: Option<&str>,
) -> (String, Option<String>) {
    let echoed = echoed.trim();
    let job_dir = match mode {
        UploadMode::Uncached => echoed.to_string(),
        UploadMode::Cached => posix_join(echoed, project_id),
    };
    let project_root =
        project_name.map(|name| posix_join(&posix_join(&job_dir, FILES_DIR), name));
    (job_dir, project_root)
}

/// Directory request for a stack upload.
///
/// Uncached exec and shell jobs place their stack inside the job they were
/// started from.
pub fn stack_dir_request(
    mode: UploadMode,
    storage_dir: &str,
    project_id: &str,
    parent_job_dir: Option<&str>,
) -> DirRequest {
    match mode {
        UploadMode::Cached => DirRequest::Fixed {
            parent: storage_root(storage_dir),
            subdirs: vec![project_id.to_string()],
        },
        UploadMode::Uncached => match parent_job_dir {
            Some(parent) => DirRequest::Temp {
                parent: posix_join(parent, EXEC_STACKS_DIR),
                subdirs: Vec::new(),
            },
            None => DirRequest::Temp {
                parent: storage_root(storage_dir),
                subdirs: Vec::new(),
            },
        },
    }
}

/// Remote stack path from the echoed directory.
pub fn stack_path(mode: UploadMode, echoed: &str, project_id: &str, stack_name: &str) -> String {
    let echoed = echoed.trim();
    match mode {
        UploadMode::Cached => posix_join(&posix_join(echoed, project_id), stack_name),
        UploadMode::Uncached => posix_join(echoed, stack_name),
    }
}
