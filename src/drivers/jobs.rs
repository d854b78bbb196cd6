//! Job listing model and runtime output normalization.
//!
//! `ps` output differs between runtimes: Docker emits one JSON object per line
//! with `ID`, comma-joined `Names` and a quoted `Command` string, Podman emits a
//! JSON array with `Id`, a `Names` array, an argv `Command` array and often an
//! empty `Status` next to a lowercase `State`. Everything here folds both
//! shapes into [`JobInfo`].

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::labels;

/// Lifecycle state of a job container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Created,
    Running,
    Exited,
    Unknown,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "created",
            JobState::Running => "running",
            JobState::Exited => "exited",
            JobState::Unknown => "unknown",
        }
    }

    /// Classify a runtime status string by its prefix.
    pub fn from_status(status: &str) -> Self {
        if status.starts_with("Exited") {
            JobState::Exited
        } else if status.starts_with("Created") {
            JobState::Created
        } else if status.starts_with("Up") {
            JobState::Running
        } else {
            JobState::Unknown
        }
    }

    /// Value for `ps --filter status=...`; unknown jobs cannot be filtered.
    pub fn filter_value(&self) -> Option<&'static str> {
        match self {
            JobState::Unknown => None,
            other => Some(other.as_str()),
        }
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(JobState::Created),
            "running" => Ok(JobState::Running),
            "exited" => Ok(JobState::Exited),
            "unknown" => Ok(JobState::Unknown),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One job as reported by the run driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub id: String,
    pub names: Vec<String>,
    pub command: String,
    pub status: JobState,
    pub status_string: String,
    /// Stack path from the job's labels.
    pub stack: String,
    pub stack_name: String,
    pub labels: BTreeMap<String, String>,
    pub host_port_bindings: Vec<u16>,
}

impl JobInfo {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// The runtime-independent part of a `ps` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PsEntry {
    pub id: String,
    pub names: Vec<String>,
    pub command: String,
    pub status_string: String,
}

/// Port bindings and labels from `inspect`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct InspectEntry {
    pub host_ports: Vec<u16>,
    pub labels: BTreeMap<String, String>,
}

/// Go template producing one `{"ID":..,"PortBindings":..,"Labels":..}` line
/// per container.
pub(crate) const INSPECT_FORMAT: &str =
    r#"{"ID":{{json .Id}},"PortBindings":{{json .HostConfig.PortBindings}},"Labels":{{json .Config.Labels}}}"#;

fn str_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| value.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn command_text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => {
            let s = s.trim();
            s.strip_prefix('"')
                .and_then(|inner| inner.strip_suffix('"'))
                .unwrap_or(s)
                .to_string()
        }
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" "),
        _ => String::new(),
    }
}

fn status_from_state(state: &str) -> String {
    match state.to_ascii_lowercase().as_str() {
        "running" => "Up".to_string(),
        "exited" | "stopped" => "Exited".to_string(),
        "created" | "configured" => "Created".to_string(),
        _ => state.to_string(),
    }
}

/// Normalize one `ps` entry from either runtime. Entries without an id are
/// dropped.
pub(crate) fn normalize_ps_entry(value: &Value) -> Option<PsEntry> {
    let id = str_field(value, &["ID", "Id"])?.to_string();
    let status_string = match str_field(value, &["Status"]) {
        Some(status) => status.to_string(),
        None => str_field(value, &["State"])
            .map(status_from_state)
            .unwrap_or_default(),
    };
    Some(PsEntry {
        id,
        names: string_list(value.get("Names")),
        command: command_text(value.get("Command")),
        status_string,
    })
}

/// Host ports of a `PortBindings` object. For every container port only the
/// last binding counts; unparseable host ports are skipped.
fn host_ports(bindings: Option<&Value>) -> Vec<u16> {
    let Some(Value::Object(map)) = bindings else {
        return Vec::new();
    };
    map.values()
        .filter_map(|list| list.as_array()?.last())
        .filter_map(|binding| binding.get("HostPort")?.as_str()?.parse().ok())
        .collect()
}

pub(crate) fn parse_inspect(values: &[Value]) -> HashMap<String, InspectEntry> {
    values
        .iter()
        .filter_map(|value| {
            let id = value.get("ID")?.as_str()?.to_string();
            let labels = match value.get("Labels") {
                Some(Value::Object(map)) => map
                    .iter()
                    .filter_map(|(k, v)| Some((k.clone(), v.as_str()?.to_string())))
                    .collect(),
                _ => BTreeMap::new(),
            };
            Some((
                id,
                InspectEntry {
                    host_ports: host_ports(value.get("PortBindings")),
                    labels,
                },
            ))
        })
        .collect()
}

/// Join `ps` entries with their inspect data. Duplicate ids keep the first
/// occurrence.
pub(crate) fn assemble(entries: Vec<PsEntry>, mut inspected: HashMap<String, InspectEntry>) -> Vec<JobInfo> {
    let mut seen = std::collections::HashSet::new();
    entries
        .into_iter()
        .filter(|entry| seen.insert(entry.id.clone()))
        .map(|entry| {
            let detail = inspected.remove(&entry.id).unwrap_or_default();
            let stack = detail
                .labels
                .get(labels::STACK_PATH)
                .cloned()
                .unwrap_or_default();
            JobInfo {
                status: JobState::from_status(&entry.status_string),
                stack_name: crate::stack::stack_basename(&stack),
                stack,
                id: entry.id,
                names: entry.names,
                command: entry.command,
                status_string: entry.status_string,
                labels: detail.labels,
                host_port_bindings: detail.host_ports,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_from_status_prefix() {
        assert_eq!(JobState::from_status("Up 3 minutes"), JobState::Running);
        assert_eq!(JobState::from_status("Exited (0) 1 hour ago"), JobState::Exited);
        assert_eq!(JobState::from_status("Created"), JobState::Created);
        assert_eq!(JobState::from_status("Paused"), JobState::Unknown);
        assert_eq!(JobState::from_status(""), JobState::Unknown);
    }

    #[test]
    fn test_normalize_docker_entry() {
        let entry = normalize_ps_entry(&json!({
            "ID": "abc123",
            "Names": "quirky_name",
            "Command": "\"sleep 100\"",
            "Status": "Up 2 seconds",
        }))
        .unwrap();
        assert_eq!(entry.id, "abc123");
        assert_eq!(entry.names, vec!["quirky_name"]);
        assert_eq!(entry.command, "sleep 100");
        assert_eq!(entry.status_string, "Up 2 seconds");
    }

    #[test]
    fn test_normalize_podman_entry_falls_back_to_state() {
        let entry = normalize_ps_entry(&json!({
            "Id": "def456",
            "Names": ["a", "b"],
            "Command": ["bash", "-c", "make"],
            "Status": "",
            "State": "exited",
        }))
        .unwrap();
        assert_eq!(entry.id, "def456");
        assert_eq!(entry.names, vec!["a", "b"]);
        assert_eq!(entry.command, "bash -c make");
        assert_eq!(entry.status_string, "Exited");
        assert!(normalize_ps_entry(&json!({"Names": "x"})).is_none());
    }

    #[test]
    fn test_inspect_keeps_last_binding_and_skips_bad_ports() {
        let parsed = parse_inspect(&[json!({
            "ID": "abc",
            "PortBindings": {
                "80/tcp": [{"HostIp": "", "HostPort": "8000"}, {"HostIp": "", "HostPort": "8080"}],
                "90/tcp": [{"HostIp": "", "HostPort": "not-a-port"}],
            },
            "Labels": {"stack-path": "/stacks/fedora", "runner": "cjr"},
        })]);
        let entry = &parsed["abc"];
        assert_eq!(entry.host_ports, vec![8080]);
        assert_eq!(entry.labels["stack-path"], "/stacks/fedora");
    }

    #[test]
    fn test_assemble_joins_and_dedupes() {
        let entries = vec![
            normalize_ps_entry(&json!({"ID": "abc", "Status": "Up 1 second"})).unwrap(),
            normalize_ps_entry(&json!({"ID": "abc", "Status": "Up 1 second"})).unwrap(),
            normalize_ps_entry(&json!({"ID": "xyz", "Status": "Created"})).unwrap(),
        ];
        let inspected = parse_inspect(&[json!({
            "ID": "abc",
            "PortBindings": null,
            "Labels": {"stack-path": "/stacks/fedora"},
        })]);
        let jobs = assemble(entries, inspected);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].status, JobState::Running);
        assert_eq!(jobs[0].stack_name, "fedora");
        assert!(jobs[0].host_port_bindings.is_empty());
        assert_eq!(jobs[1].status, JobState::Created);
        assert!(jobs[1].labels.is_empty());
    }

    #[test]
    fn test_job_info_serializes_camel_case() {
        let job = JobInfo {
            id: "abc".into(),
            names: vec![],
            command: "ls".into(),
            status: JobState::Exited,
            status_string: "Exited (0)".into(),
            stack: "/s/fedora".into(),
            stack_name: "fedora".into(),
            labels: BTreeMap::new(),
            host_port_bindings: vec![8080],
        };
        let value = serde_json::to_value(&job).unwrap();
        assert_eq!(value["statusString"], "Exited (0)");
        assert_eq!(value["status"], "exited");
        assert_eq!(value["hostPortBindings"], json!([8080]));
    }
}
