//! Common test utilities for cjr integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't touch the
//! user's `~/.config/cjr/` or `~/.local/share/cjr/` directories.

#![allow(dead_code)]

use std::path::Path;

use assert_cmd::Command;
pub use tempfile::TempDir;

/// A test environment with isolated settings and data.
///
/// - `project_dir`: working directory for commands
/// - `config_dir`: settings and resources (via `CJR_CONFIG_DIR`)
/// - `data_dir`: job records and ssh sockets (via `CJR_DATA_DIR`)
///
/// Environment is set per command, so tests stay parallel-safe.
pub struct TestEnv {
    pub project_dir: TempDir,
    pub config_dir: TempDir,
    pub data_dir: TempDir,
}

impl TestEnv {
    pub fn new() -> Self {
        let env = Self {
            project_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
            data_dir: TempDir::new().unwrap(),
        };
        std::fs::write(env.config_dir.path().join("settings.kdl"), "interactive #false\n").unwrap();
        env
    }

    /// Command for the cjr binary, isolated from the caller's environment.
    pub fn cjr(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_cjr"));
        cmd.current_dir(self.project_dir.path());
        cmd.env("CJR_CONFIG_DIR", self.config_dir.path());
        cmd.env("CJR_DATA_DIR", self.data_dir.path());
        cmd.env_remove("CJR_STACK");
        cmd.env_remove("CJR_RESOURCE");
        cmd.env_remove("CJR_LOG");
        cmd
    }

    pub fn project_path(&self) -> &Path {
        self.project_dir.path()
    }

    pub fn config_path(&self) -> &Path {
        self.config_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}
