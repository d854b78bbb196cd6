//! Build script to inject build-time information into the binary.
//!
//! Sets environment variables read at compile time:
//! - `CJR_BUILD_TIMESTAMP`: ISO 8601 timestamp when the binary was built
//! - `CJR_GIT_COMMIT`: Short git commit hash (or "unknown" outside a git checkout)

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");

    let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    println!("cargo:rustc-env=CJR_BUILD_TIMESTAMP={}", timestamp);

    let commit = git_commit().unwrap_or_else(|| "unknown".to_string());
    println!("cargo:rustc-env=CJR_GIT_COMMIT={}", commit);
}

fn git_commit() -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }
    let hash = String::from_utf8(output.stdout).ok()?;
    Some(hash.trim().to_string())
}
