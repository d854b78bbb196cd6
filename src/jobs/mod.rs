//! Job identity: resolving typed IDs against the jobs the runtime knows.
//!
//! Matching is by prefix. A blank ID is only acceptable when the user can be
//! asked to pick a job interactively; a prefix that matches nothing is an
//! error rather than an empty success so mistyped IDs never silently no-op.

pub mod jupyter;
pub mod record;

use std::str::FromStr;

use dialoguer::Select;
use dialoguer::theme::ColorfulTheme;

use crate::drivers::{JobInfo, JobState};
use crate::shell::{Flag, Flags};
use crate::{Result, ValidatedOutput, errors};

pub use record::{JobRecord, RecordStore};

/// How copied job files treat files already at the destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CopyMode {
    /// Skip files that are newer at the destination.
    #[default]
    Update,
    /// Copy everything, delete nothing.
    Overwrite,
    /// Make the destination an exact copy, deleting extra files.
    Mirror,
}

impl CopyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CopyMode::Update => "update",
            CopyMode::Overwrite => "overwrite",
            CopyMode::Mirror => "mirror",
        }
    }

    /// rsync flags implementing the mode.
    pub fn rsync_flags(&self) -> Flags {
        match self {
            CopyMode::Update => Flags::new().with(Flag::switch("update")),
            CopyMode::Overwrite => Flags::new(),
            CopyMode::Mirror => Flags::new().with(Flag::switch("delete")),
        }
    }
}

impl FromStr for CopyMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "update" => Ok(CopyMode::Update),
            "overwrite" => Ok(CopyMode::Overwrite),
            "mirror" => Ok(CopyMode::Mirror),
            other => Err(format!(
                "invalid copy mode '{}' (expected update, overwrite or mirror)",
                other
            )),
        }
    }
}

impl std::fmt::Display for CopyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Asks the user to choose one job.
pub trait JobPrompt {
    /// Index into `jobs`, or `None` if the user backed out.
    fn select(&self, jobs: &[JobInfo]) -> Result<Option<usize>>;
}

/// One prompt row: short id, short command and status.
pub fn prompt_label(job: &JobInfo) -> String {
    let id: String = job.id.chars().take(12).collect();
    let command = if job.command.chars().count() > 10 {
        format!("{}...", job.command.chars().take(10).collect::<String>())
    } else {
        job.command.clone()
    };
    format!("ID: {} COMMAND: {} STATUS: {}", id, command, job.status_string)
}

/// Terminal picker built on `dialoguer`.
#[derive(Debug, Default)]
pub struct TerminalPrompt;

impl JobPrompt for TerminalPrompt {
    fn select(&self, jobs: &[JobInfo]) -> Result<Option<usize>> {
        let mut items: Vec<String> = jobs.iter().map(prompt_label).collect();
        items.push("Exit".to_string());
        let choice = Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select a job")
            .items(&items)
            .default(0)
            .interact_opt()?;
        Ok(choice.filter(|&i| i < jobs.len()))
    }
}

/// Jobs in any of `states`; empty `states` keeps everything.
pub fn filter_by_state<'a>(jobs: &'a [JobInfo], states: &[JobState]) -> Vec<&'a JobInfo> {
    jobs.iter()
        .filter(|job| states.is_empty() || states.contains(&job.status))
        .collect()
}

/// Resolve one typed ID.
///
/// `all` returns every known ID. A blank ID opens `prompt` when one is given
/// and jobs exist; choosing "Exit" yields an empty, successful selection.
pub fn match_id(
    typed: &str,
    jobs: &[JobInfo],
    all: bool,
    prompt: Option<&dyn JobPrompt>,
) -> ValidatedOutput<Vec<String>> {
    if all {
        return ValidatedOutput::ok(jobs.iter().map(|j| j.id.clone()).collect());
    }
    let typed = typed.trim();
    if typed.is_empty() {
        return match prompt {
            Some(prompt) if !jobs.is_empty() => match prompt.select(jobs) {
                Ok(Some(index)) => ValidatedOutput::ok(vec![jobs[index].id.clone()]),
                Ok(None) => ValidatedOutput::ok(Vec::new()),
                Err(e) => ValidatedOutput::from_error(e),
            },
            _ => ValidatedOutput::failed(errors::invalid_id()),
        };
    }
    let matches: Vec<String> = jobs
        .iter()
        .filter(|job| job.id.starts_with(typed))
        .map(|job| job.id.clone())
        .collect();
    if matches.is_empty() {
        ValidatedOutput::failed(errors::no_matching_id())
    } else {
        ValidatedOutput::ok(matches)
    }
}

/// Resolve several typed IDs; an empty list behaves like one blank ID.
/// Duplicates are removed, first occurrence wins.
pub fn match_ids(
    typed: &[String],
    jobs: &[JobInfo],
    all: bool,
    prompt: Option<&dyn JobPrompt>,
) -> ValidatedOutput<Vec<String>> {
    if all || typed.is_empty() {
        return match_id("", jobs, all, prompt);
    }
    let mut result = ValidatedOutput::ok(Vec::<String>::new());
    for id in typed {
        let matched = match_id(id, jobs, false, prompt);
        result.absorb(&matched);
        for m in matched.value {
            if !result.value.contains(&m) {
                result.value.push(m);
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::BTreeMap;

    fn job(id: &str, command: &str, status: &str) -> JobInfo {
        JobInfo {
            id: id.into(),
            names: vec![],
            command: command.into(),
            status: JobState::from_status(status),
            status_string: status.into(),
            stack: "/s/fedora".into(),
            stack_name: "fedora".into(),
            labels: BTreeMap::new(),
            host_port_bindings: vec![],
        }
    }

    struct Scripted {
        answer: Option<usize>,
        asked: Cell<usize>,
    }

    impl JobPrompt for Scripted {
        fn select(&self, _jobs: &[JobInfo]) -> Result<Option<usize>> {
            self.asked.set(self.asked.get() + 1);
            Ok(self.answer)
        }
    }

    fn jobs() -> Vec<JobInfo> {
        vec![
            job("abc123", "sleep 10", "Up 1 second"),
            job("abd456", "make", "Exited (0)"),
            job("ffff00", "ls", "Created"),
        ]
    }

    #[test]
    fn test_prefix_matching() {
        let out = match_id("ab", &jobs(), false, None);
        assert_eq!(out.value, vec!["abc123", "abd456"]);
        let out = match_id("abc", &jobs(), false, None);
        assert_eq!(out.value, vec!["abc123"]);
    }

    #[test]
    fn test_no_match_is_an_error() {
        let out = match_id("zz", &jobs(), false, None);
        assert!(!out.success);
        assert_eq!(out.error, vec![errors::no_matching_id()]);
    }

    #[test]
    fn test_blank_id_without_prompt_is_invalid() {
        let out = match_id("", &jobs(), false, None);
        assert_eq!(out.error, vec![errors::invalid_id()]);

        let prompt = Scripted { answer: Some(0), asked: Cell::new(0) };
        let out = match_id(" ", &[], false, Some(&prompt));
        assert_eq!(out.error, vec![errors::invalid_id()]);
        assert_eq!(prompt.asked.get(), 0);
    }

    #[test]
    fn test_blank_id_prompts_and_exit_cancels() {
        let pick = Scripted { answer: Some(2), asked: Cell::new(0) };
        assert_eq!(match_id("", &jobs(), false, Some(&pick)).value, vec!["ffff00"]);

        let exit = Scripted { answer: None, asked: Cell::new(0) };
        let out = match_id("", &jobs(), false, Some(&exit));
        assert!(out.success);
        assert!(out.value.is_empty());
        assert_eq!(exit.asked.get(), 1);
    }

    #[test]
    fn test_all_returns_everything() {
        let out = match_ids(&["zz".to_string()], &jobs(), true, None);
        assert_eq!(out.value.len(), 3);
    }

    #[test]
    fn test_match_ids_dedupes_and_reports_misses() {
        let typed = vec!["ab".to_string(), "abc".to_string(), "nope".to_string()];
        let out = match_ids(&typed, &jobs(), false, None);
        assert!(!out.success);
        assert_eq!(out.value, vec!["abc123", "abd456"]);
        assert_eq!(out.error, vec![errors::no_matching_id()]);
    }

    #[test]
    fn test_prompt_label_truncates() {
        let j = job("0123456789abcdef", "python train.py --epochs 10", "Up 2 hours");
        assert_eq!(
            prompt_label(&j),
            "ID: 0123456789ab COMMAND: python tra... STATUS: Up 2 hours"
        );
    }

    #[test]
    fn test_copy_mode_flags() {
        assert_eq!("mirror".parse::<CopyMode>(), Ok(CopyMode::Mirror));
        assert!("merge".parse::<CopyMode>().is_err());
        assert!(CopyMode::Update.rsync_flags().contains("update"));
        assert!(CopyMode::Overwrite.rsync_flags().is_empty());
        assert!(CopyMode::Mirror.rsync_flags().contains("delete"));
    }

    #[test]
    fn test_filter_by_state() {
        let all = jobs();
        let running = filter_by_state(&all, &[JobState::Running]);
        assert_eq!(running.len(), 1);
        assert_eq!(filter_by_state(&all, &[]).len(), 3);
    }
}
