//! Helpers for rsync command lines.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use super::{Flag, Flags};

/// A scratch directory removed on drop.
pub fn scratch_dir(parent: &Path, prefix: &str) -> crate::Result<TempDir> {
    fs::create_dir_all(parent)?;
    Ok(tempfile::Builder::new().prefix(prefix).tempdir_in(parent)?)
}

/// rsync copies the contents of a directory only when it ends in `/`.
pub fn contents_of(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}/", path.to_string_lossy().trim_end_matches('/')))
}

/// Add `--include-from`/`--exclude-from` for rule files that exist.
pub fn rule_flags(mut flags: Flags, include: Option<&Path>, exclude: Option<&Path>) -> Flags {
    if let Some(include) = include.filter(|p| p.is_file()) {
        flags.push(Flag::value("include-from", include.to_string_lossy()));
    }
    if let Some(exclude) = exclude.filter(|p| p.is_file()) {
        flags.push(Flag::value("exclude-from", exclude.to_string_lossy()));
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::command_string;

    #[test]
    fn test_contents_of_adds_one_slash() {
        assert_eq!(contents_of(Path::new("/a/b")), PathBuf::from("/a/b/"));
        assert_eq!(contents_of(Path::new("/a/b//")), PathBuf::from("/a/b/"));
    }

    #[test]
    fn test_rule_flags_skip_missing_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        let include = tmp.path().join("include");
        fs::write(&include, "*.txt\n").unwrap();
        let missing = tmp.path().join("missing");
        let flags = rule_flags(Flags::new().switch("a"), Some(&include), Some(&missing));
        assert_eq!(
            command_string("rsync", &flags, &[]),
            format!("rsync -a --include-from='{}'", include.display())
        );
    }

    #[test]
    fn test_scratch_dir_is_removed_on_drop() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = {
            let scratch = scratch_dir(&tmp.path().join("copies"), "job-").unwrap();
            assert!(scratch.path().is_dir());
            scratch.path().to_path_buf()
        };
        assert!(!path.exists());
    }
}
