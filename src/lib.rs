//! cjr - run shell commands as container jobs.
//!
//! This library provides the core functionality for the `cjr` CLI tool:
//! building stack images, starting and tracking jobs through a container
//! runtime (Docker or Podman), and mirroring the same job lifecycle onto
//! remote hosts over a multiplexed SSH connection.

pub mod cli;
pub mod commands;
pub mod config;
pub mod drivers;
pub mod errors;
pub mod jobs;
pub mod project;
pub mod remote;
pub mod shell;
pub mod stack;
pub mod validated;

pub use validated::ValidatedOutput;

/// Name of the tool; stamped on every container and used for remote invocations.
pub const CLI_NAME: &str = "cjr";


/// Library-level error type for local infrastructure failures.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("KDL error: {0}")]
    Kdl(#[from] kdl::KdlError),

    #[error("Prompt error: {0}")]
    Prompt(#[from] dialoguer::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("{0}")]
    Other(String),
}

/// Result type alias for cjr operations.
pub type Result<T> = std::result::Result<T, Error>;
