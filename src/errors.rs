//! Standardized error and warning messages.
//!
//! Every message follows the format:
//! ```text
//! <category>: <brief>
//!
//!   <details>
//! ```
//!
//! The CLI prefixes `cjr: error: ` or `cjr: warning: ` when printing. Drivers
//! push these strings into a `ValidatedOutput`, so tests can compare against
//! the catalog functions directly.

use std::fmt::Write;

/// Message category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Job selection and lifecycle
    Job,
    /// Stack validation and configuration
    Stack,
    /// Image builds
    Build,
    /// Container runtime commands
    Run,
    /// Shell command execution and output parsing
    Shell,
    /// Remote hosts and SSH
    Remote,
    /// Resource registry
    Resource,
    /// CLI settings
    Config,
    /// X11 forwarding
    X11,
    /// Jupyter servers
    Jupyter,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Job => write!(f, "job"),
            Self::Stack => write!(f, "stack"),
            Self::Build => write!(f, "build"),
            Self::Run => write!(f, "run"),
            Self::Shell => write!(f, "shell"),
            Self::Remote => write!(f, "remote"),
            Self::Resource => write!(f, "resource"),
            Self::Config => write!(f, "config"),
            Self::X11 => write!(f, "x11"),
            Self::Jupyter => write!(f, "jupyter"),
        }
    }
}

/// Format a message with an optional indented details block.
pub fn format_message(category: ErrorCategory, brief: &str, details: Option<&str>) -> String {
    let mut msg = format!("{}: {}", category, brief);

    if let Some(details) = details {
        msg.push_str("\n\n");
        for line in details.lines() {
            let _ = writeln!(msg, "  {}", line);
        }
        if msg.ends_with('\n') {
            msg.pop();
        }
    }

    msg
}

// ============================================================================
// Job identity
// ============================================================================

/// INVALID_ID: blank ID that cannot be disambiguated.
pub fn invalid_id() -> String {
    format_message(
        ErrorCategory::Job,
        "Invalid ID - ID string must be at least 1 character long.",
        None,
    )
}

/// NO_MATCHING_ID: typed prefix matched nothing.
pub fn no_matching_id() -> String {
    format_message(ErrorCategory::Job, "No Matching Job ID", None)
}

/// EMPTY_ID: operation called without any job IDs.
pub fn empty_id() -> String {
    format_message(ErrorCategory::Job, "No job IDs were specified.", None)
}

/// INVALID_JOB: run object failed schema validation.
pub fn invalid_job(details: &str) -> String {
    format_message(ErrorCategory::Job, "Invalid job configuration.", Some(details))
}

pub fn missing_job_record(id: &str) -> String {
    format_message(
        ErrorCategory::Job,
        &format!("No job record exists for job {}.", id),
        None,
    )
}

pub fn missing_project_root(id: &str) -> String {
    format_message(
        ErrorCategory::Job,
        &format!("Job {} has no project root to copy into; skipped.", id),
        Some("Use --copy-path to choose a destination."),
    )
}

// ============================================================================
// Stacks and builds
// ============================================================================

/// INVALID_NAME: stack directory name outside the allowed charset.
pub fn invalid_stack_name(path: &str) -> String {
    format_message(
        ErrorCategory::Stack,
        "Invalid stack name.",
        Some(&format!(
            "Stack '{}' may only contain letters, digits, '-', '_' and '.'.",
            path
        )),
    )
}

/// MISSING_DOCKERFILE_OR_IMAGE
pub fn missing_dockerfile_or_image(path: &str) -> String {
    format_message(
        ErrorCategory::Stack,
        "Stack has no Dockerfile, image archive or image reference.",
        Some(&format!("Stack directory: {}", path)),
    )
}

pub fn missing_stack() -> String {
    format_message(
        ErrorCategory::Stack,
        "No stack was specified.",
        Some("Pass --stack or set CJR_STACK."),
    )
}

/// MISSING_STACKDIR
pub fn missing_stack_dir(path: &str) -> String {
    format_message(
        ErrorCategory::Stack,
        &format!("Stack '{}' does not exist and could not be pulled.", path),
        None,
    )
}

pub fn invalid_stack_config(path: &str, details: &str) -> String {
    format_message(
        ErrorCategory::Stack,
        &format!("Invalid stack configuration file {}.", path),
        Some(details),
    )
}

/// FAILED_TO_BUILD
pub fn failed_to_build(path: &str) -> String {
    format_message(
        ErrorCategory::Build,
        &format!("Failed to build stack {}.", path),
        None,
    )
}

/// FAILED_TO_EXTRACT_IMAGE_NAME
pub fn failed_to_extract_image_name(archive: &str) -> String {
    format_message(
        ErrorCategory::Build,
        &format!("Unable to determine the image name loaded from {}.", archive),
        None,
    )
}

pub fn no_such_image(image: &str) -> String {
    format_message(
        ErrorCategory::Build,
        &format!("There is no image named {}.", image),
        None,
    )
}

pub fn invalid_build_mode(mode: &str) -> String {
    format_message(
        ErrorCategory::Build,
        &format!("Invalid build mode '{}'.", mode),
        Some("Valid modes are reuse-image, cached and no-cache, optionally followed by ',pull'."),
    )
}

pub fn bind_outside_stack(host_path: &str) -> String {
    format_message(
        ErrorCategory::Stack,
        &format!("Bind mount {} lies outside the stack directory and was not uploaded.", host_path),
        None,
    )
}

// ============================================================================
// Runtime
// ============================================================================

/// EMPTY_CREATE_ID
pub fn empty_create_id() -> String {
    format_message(ErrorCategory::Run, "Unable to create container.", None)
}

/// FAILED_CREATE_VOLUME
pub fn failed_create_volume() -> String {
    format_message(ErrorCategory::Run, "Unable to create volume.", None)
}

pub fn command_failed(status: Option<i32>) -> String {
    let brief = match status {
        Some(code) => format!("Command exited with status {}.", code),
        None => "Command was terminated by a signal.".to_string(),
    };
    format_message(ErrorCategory::Shell, &brief, None)
}

pub fn spawn_failed(command: &str, err: &str) -> String {
    format_message(
        ErrorCategory::Shell,
        "Unable to start command.",
        Some(&format!("{}\n{}", command, err)),
    )
}

/// INVALID_JSON
pub fn invalid_json(raw: &str) -> String {
    format_message(ErrorCategory::Shell, "Command output is not valid JSON.", Some(raw))
}

/// INVALID_LINEJSON
pub fn invalid_line_json(raw: &str) -> String {
    format_message(
        ErrorCategory::Shell,
        "Command output is not valid line-delimited JSON.",
        Some(raw),
    )
}

// ============================================================================
// Remote
// ============================================================================

/// NO_MATCHING_REMOTEJOBS
pub fn no_matching_remote_jobs() -> String {
    format_message(
        ErrorCategory::Remote,
        "No matching remote jobs were found in this tool's storage directory.",
        None,
    )
}

/// EMPTY_LOCAL_HOSTROOT
pub fn empty_local_host_root() -> String {
    format_message(
        ErrorCategory::Remote,
        "No local project root was specified for the copy.",
        None,
    )
}

/// DIFFERING_PROJECT_ID
pub fn differing_project_id(id: &str) -> String {
    format_message(
        ErrorCategory::Remote,
        &format!("Job {} belongs to a different project; skipped.", id),
        Some("Use --force to copy the job files anyway."),
    )
}

pub fn remote_job_outside_storage(id: &str) -> String {
    format_message(
        ErrorCategory::Remote,
        &format!("Job {} was not started in the resource's storage directory; not deleted.", id),
        None,
    )
}

pub fn missing_remote_project_root(id: &str) -> String {
    format_message(
        ErrorCategory::Remote,
        &format!("Job {} has no remote project root; skipped.", id),
        None,
    )
}

pub fn ssh_connection_failed(target: &str) -> String {
    format_message(
        ErrorCategory::Remote,
        &format!("Unable to open an SSH connection to {}.", target),
        None,
    )
}

pub fn no_resource_selected() -> String {
    format_message(
        ErrorCategory::Remote,
        "No remote resource is configured for this operation.",
        None,
    )
}

pub fn remote_temp_dir_failed() -> String {
    format_message(
        ErrorCategory::Remote,
        "Unable to create a directory on the remote resource.",
        None,
    )
}

// ============================================================================
// Resources and settings
// ============================================================================

pub fn unknown_resource(name: &str) -> String {
    format_message(
        ErrorCategory::Resource,
        &format!("No resource named '{}'.", name),
        None,
    )
}

pub fn invalid_resource_file(path: &str, details: &str) -> String {
    format_message(
        ErrorCategory::Resource,
        &format!("Invalid resource file {}.", path),
        Some(details),
    )
}

pub fn invalid_resource(name: &str, details: &str) -> String {
    format_message(
        ErrorCategory::Resource,
        &format!("Invalid resource '{}'.", name),
        Some(details),
    )
}

pub fn resource_disabled(name: &str) -> String {
    format_message(
        ErrorCategory::Resource,
        &format!("Resource '{}' is disabled.", name),
        Some("Enable it with `cjr resource set <name> enabled true`."),
    )
}

/// INVALID_FIELD
pub fn invalid_setting(key: &str, details: &str) -> String {
    format_message(
        ErrorCategory::Config,
        &format!("Invalid setting '{}'.", key),
        Some(details),
    )
}

// ============================================================================
// X11
// ============================================================================

pub fn x11_missing_dir(dir: &str) -> String {
    format_message(
        ErrorCategory::X11,
        &format!("X11 socket directory {} does not exist.", dir),
        None,
    )
}

pub fn x11_missing_socket(dir: &str) -> String {
    format_message(
        ErrorCategory::X11,
        &format!("No X11 sockets were found in {}.", dir),
        None,
    )
}

pub fn x11_unavailable() -> String {
    format_message(
        ErrorCategory::X11,
        "X11 forwarding is not supported on this platform.",
        None,
    )
}

// ============================================================================
// Jupyter
// ============================================================================

pub fn jupyter_running(id: &str) -> String {
    format_message(
        ErrorCategory::Jupyter,
        &format!("A Jupyter server is already running for job {}.", id),
        None,
    )
}

pub fn jupyter_not_running(id: &str) -> String {
    format_message(
        ErrorCategory::Jupyter,
        &format!("No Jupyter server is running for job {}.", id),
        None,
    )
}

pub fn jupyter_url_missing(id: &str) -> String {
    format_message(
        ErrorCategory::Jupyter,
        &format!("The Jupyter server of job {} did not report a url.", id),
        Some("The server may still be starting; try again in a few seconds."),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_message_without_details() {
        assert_eq!(
            format_message(ErrorCategory::Job, "No Matching Job ID", None),
            "job: No Matching Job ID"
        );
    }

    #[test]
    fn test_format_message_indents_details() {
        let msg = format_message(ErrorCategory::Stack, "bad", Some("line one\nline two"));
        assert_eq!(msg, "stack: bad\n\n  line one\n  line two");
    }

    #[test]
    fn test_invalid_id_text() {
        assert!(invalid_id().contains("at least 1 character"));
    }
}
