//! Per-job JSON records kept under `<data-dir>/job-records/`.
//!
//! The runtime stays the source of truth for which jobs exist; a record only
//! remembers how a job was launched so `job info` can show it later.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

pub const RECORDS_DIR: &str = "job-records";

/// How a job was launched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub stack_path: String,
    pub image: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_root: Option<String>,
    pub container_root: String,
    pub file_access: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub synchronous: bool,
    pub created_at: DateTime<Utc>,
}

/// Directory of job records.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn write(&self, record: &JobRecord) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(record)?;
        fs::write(self.path(&record.id), json)?;
        Ok(())
    }

    /// `None` if the job has no record.
    pub fn read(&self, id: &str) -> Result<Option<JobRecord>> {
        match fs::read_to_string(self.path(id)) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a record; missing records are ignored.
    pub fn remove(&self, id: &str) -> Result<()> {
        match fs::remove_file(self.path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(id: &str) -> JobRecord {
        JobRecord {
            id: id.into(),
            stack_path: "/s/fedora".into(),
            image: "fedora:cjr".into(),
            command: "make".into(),
            project_root: Some("/home/me/proj".into()),
            container_root: "/".into(),
            file_access: "bind".into(),
            file_volume: None,
            message: None,
            synchronous: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_write_read_remove() {
        let tmp = TempDir::new().unwrap();
        let store = RecordStore::new(tmp.path().join(RECORDS_DIR));
        assert_eq!(store.read("abc").unwrap(), None);

        let rec = record("abc");
        store.write(&rec).unwrap();
        assert_eq!(store.read("abc").unwrap(), Some(rec));

        store.remove("abc").unwrap();
        store.remove("abc").unwrap();
        assert!(!store.path("abc").exists());
    }

    #[test]
    fn test_record_json_is_camel_case() {
        let value = serde_json::to_value(record("x")).unwrap();
        assert!(value.get("stackPath").is_some());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("fileVolume").is_none());
    }
}
