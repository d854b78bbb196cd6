//! Podman CLI runtime.
//!
//! Podman lists as a single JSON array and its `reference` filter also
//! matches partial names, so image lookups are narrowed to an exact name here.

use regex::Regex;
use serde_json::Value;

use super::cli::{ContainerCli, Runtime};
use crate::ValidatedOutput;
use crate::shell::{Flag, Flags, parse_json};
use crate::stack::StackConfiguration;

/// `podman`: list commands emit one JSON array.
#[derive(Debug, Clone, Copy)]
pub struct Podman;

pub type PodmanDriver = ContainerCli<Podman>;

impl Runtime for Podman {
    const COMMAND: &'static str = "podman";
    const MOUNT_CONSISTENCY: bool = false;

    fn json_format() -> Flag {
        Flag::value("format", "json")
    }

    fn parse_list(raw: &str) -> ValidatedOutput<Vec<Value>> {
        if raw.trim().is_empty() {
            return ValidatedOutput::ok(Vec::new());
        }
        parse_json(raw).map(|value| match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        })
    }

    /// Names containing a registry or namespace are trusted as given; bare
    /// names must match the end of a fully qualified `Names` entry.
    fn image_listed(image: &str, entries: &[Value]) -> bool {
        if image.contains('/') {
            return !entries.is_empty();
        }
        let Ok(pattern) = Regex::new(&format!("/{}$", regex::escape(image))) else {
            return false;
        };
        entries.iter().any(|entry| {
            ["Names", "names"]
                .iter()
                .filter_map(|key| entry.get(*key)?.as_array())
                .flatten()
                .filter_map(Value::as_str)
                .any(|name| pattern.is_match(name))
        })
    }

    fn runtime_flags(configuration: &StackConfiguration) -> Flags {
        let userns = configuration
            .config
            .flags
            .as_ref()
            .and_then(|f| f.userns.clone());
        Flags::new().value_opt("userns", userns)
    }
}
