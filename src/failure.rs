// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Failure recording.
//!
//! Every failed operation leaves a [`FailureLogEntry`] behind, so the user can
//! find out what went wrong without rerunning anything. Entries are kept in a
//! small append-only log on disk.
//!
//! # Failure Log Layout
//!
//! The failure log is a JSON array of entry objects, oldest first. It never
//! holds more than [`MAX_ENTRIES`] entries: recording a new entry into a full
//! log evicts the oldest one. A missing log file is the same thing as an empty
//! log. Entries older than the display window stay on disk until evicted, but
//! are hidden from [`FailureLog::list_recent`].
//!
//! # Never Fail Twice
//!
//! Recording happens because something already failed. A failure to record
//! must not turn into a second failure of the whole run, so
//! [`FailureLog::record`] swallows its own errors into warnings.

pub mod advisor;

use crate::component::ProviderKind;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, VecDeque},
    fs::{read_to_string, write},
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Maximum number of entries kept in the failure log.
pub const MAX_ENTRIES: usize = 50;

/// Default display window in days.
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

/// Maximum length of captured output in characters.
pub const MAX_OUTPUT_CHARS: usize = 2000;

/// Exit code recorded for workers killed by their timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// Durable record of one failed operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureLogEntry {
    pub timestamp: DateTime<Utc>,
    pub component_name: String,
    pub provider_kind: ProviderKind,
    pub operation_description: String,
    pub error_message: String,
    pub full_output: String,
    pub exit_code: Option<i32>,
    pub is_privileged: bool,
}

impl FailureLogEntry {
    /// Construct new entry stamped with current time.
    ///
    /// Captured output is truncated to [`MAX_OUTPUT_CHARS`].
    pub fn new(
        component_name: impl Into<String>,
        provider_kind: ProviderKind,
        operation_description: impl Into<String>,
        error_message: impl Into<String>,
        full_output: impl AsRef<str>,
        exit_code: Option<i32>,
        is_privileged: bool,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            component_name: component_name.into(),
            provider_kind,
            operation_description: operation_description.into(),
            error_message: error_message.into(),
            full_output: truncate(full_output.as_ref(), MAX_OUTPUT_CHARS),
            exit_code,
            is_privileged,
        }
    }

    /// Replace timestamp of entry.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}... [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

/// Most recent failure of one component within a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureGroup {
    pub component_name: String,

    /// Latest entry of the component.
    pub latest: FailureLogEntry,

    /// How many times the component failed within the window.
    pub count: usize,
}

/// Sink for failure entries.
pub trait Recorder {
    /// Record failure entry. Must not fail.
    fn record(&mut self, entry: FailureLogEntry);
}

/// In-memory failure log with FIFO eviction.
///
/// # Invariant
///
/// - Never holds more than [`MAX_ENTRIES`] entries.
/// - Entries stay in recording order, oldest first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FailureHistory {
    entries: VecDeque<FailureLogEntry>,
}

impl FailureHistory {
    /// Construct new empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append entry, evicting oldest entries beyond capacity.
    pub fn push(&mut self, entry: FailureLogEntry) {
        self.entries.push_back(entry);
        while self.entries.len() > MAX_ENTRIES {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries, oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &FailureLogEntry> {
        self.entries.iter()
    }

    /// Entries newer than `now - window`, oldest first.
    ///
    /// A window reaching past the earliest representable time has no lower
    /// bound.
    pub fn recent(&self, window: TimeDelta, now: DateTime<Utc>) -> Vec<FailureLogEntry> {
        let cutoff = now.checked_sub_signed(window);
        self.entries
            .iter()
            .filter(|entry| cutoff.is_none_or(|cutoff| entry.timestamp > cutoff))
            .cloned()
            .collect()
    }

    /// Group entries newer than `now - window` by component.
    ///
    /// Each group carries its latest entry and failure count. Groups are
    /// ordered by latest failure, most recent first.
    pub fn grouped(&self, window: TimeDelta, now: DateTime<Utc>) -> Vec<FailureGroup> {
        let mut groups: HashMap<String, FailureGroup> = HashMap::new();
        for entry in self.recent(window, now) {
            groups
                .entry(entry.component_name.clone())
                .and_modify(|group| {
                    group.count += 1;
                    if entry.timestamp >= group.latest.timestamp {
                        group.latest = entry.clone();
                    }
                })
                .or_insert_with(|| FailureGroup {
                    component_name: entry.component_name.clone(),
                    latest: entry.clone(),
                    count: 1,
                });
        }

        let mut groups = groups.into_values().collect::<Vec<_>>();
        groups.sort_by(|a, b| {
            b.latest
                .timestamp
                .cmp(&a.latest.timestamp)
                .then_with(|| a.component_name.cmp(&b.component_name))
        });
        groups
    }

    /// Remove every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Recorder for FailureHistory {
    fn record(&mut self, entry: FailureLogEntry) {
        self.push(entry);
    }
}

impl From<Vec<FailureLogEntry>> for FailureHistory {
    fn from(entries: Vec<FailureLogEntry>) -> Self {
        let mut history = Self::new();
        for entry in entries {
            history.push(entry);
        }
        history
    }
}

/// File-backed failure log.
#[derive(Debug, Clone)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    /// Construct new failure log at target path.
    ///
    /// Does not touch the file system.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load failure history from disk.
    ///
    /// # Errors
    ///
    /// - Return [`FailureLogError::Read`] if log exists but cannot be read.
    /// - Return [`FailureLogError::Parse`] if log is not a valid entry array.
    pub fn load(&self) -> Result<FailureHistory> {
        let content = match read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(FailureHistory::new()),
            Err(err) => {
                return Err(FailureLogError::Read {
                    source: err,
                    path: self.path.clone(),
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(FailureHistory::new());
        }

        let entries: Vec<FailureLogEntry> =
            serde_json::from_str(&content).map_err(|err| FailureLogError::Parse {
                source: err,
                path: self.path.clone(),
            })?;

        Ok(FailureHistory::from(entries))
    }

    /// Write failure history to disk, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// - Return [`FailureLogError::Write`] if log cannot be written.
    pub fn save(&self, history: &FailureHistory) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            mkdirp::mkdirp(parent).map_err(|err| FailureLogError::Write {
                source: err,
                path: self.path.clone(),
            })?;
        }

        let entries = history.entries().collect::<Vec<_>>();
        let content = serde_json::to_string_pretty(&entries).map_err(|err| FailureLogError::Parse {
            source: err,
            path: self.path.clone(),
        })?;

        write(&self.path, content.as_bytes()).map_err(|err| FailureLogError::Write {
            source: err,
            path: self.path.clone(),
        })
    }

    /// Load failure history, treating a corrupt log as empty.
    fn load_or_empty(&self) -> Result<FailureHistory> {
        match self.load() {
            Err(FailureLogError::Parse { source, .. }) => {
                warn!("failure log {:?} is corrupt, treating it as empty: {source}", self.path.display());
                Ok(FailureHistory::new())
            }
            loaded => loaded,
        }
    }

    /// Append entry to log on disk.
    ///
    /// A corrupt log is replaced by a fresh one holding only the new entry.
    ///
    /// # Errors
    ///
    /// - Return [`FailureLogError::Read`] or [`FailureLogError::Write`] on I/O failure.
    pub fn try_record(&self, entry: FailureLogEntry) -> Result<()> {
        let mut history = self.load_or_empty()?;
        history.push(entry);
        self.save(&history)
    }

    /// Entries within the last `window_days`, oldest first.
    ///
    /// A corrupt log reads as empty.
    ///
    /// # Errors
    ///
    /// - Return [`FailureLogError::Read`] if log exists but cannot be read.
    pub fn list_recent(&self, window_days: u32) -> Result<Vec<FailureLogEntry>> {
        Ok(self.load_or_empty()?.recent(window(window_days), Utc::now()))
    }

    /// Entries within the last `window_days`, grouped by component.
    ///
    /// A corrupt log reads as empty.
    ///
    /// # Errors
    ///
    /// - Return [`FailureLogError::Read`] if log exists but cannot be read.
    pub fn grouped(&self, window_days: u32) -> Result<Vec<FailureGroup>> {
        Ok(self.load_or_empty()?.grouped(window(window_days), Utc::now()))
    }

    /// Truncate log to empty.
    ///
    /// # Errors
    ///
    /// - Return [`FailureLogError::Write`] if log cannot be written.
    pub fn clear(&self) -> Result<()> {
        self.save(&FailureHistory::new())
    }
}

fn window(days: u32) -> TimeDelta {
    TimeDelta::try_days(days.into()).unwrap_or(TimeDelta::MAX)
}

impl Recorder for FailureLog {
    fn record(&mut self, entry: FailureLogEntry) {
        let component = entry.component_name.clone();
        match self.try_record(entry) {
            Ok(()) => debug!("recorded failure of {component} to {:?}", self.path.display()),
            Err(err) => warn!("cannot record failure of {component}: {err}"),
        }
    }
}

/// Failure log error types.
#[derive(Debug, thiserror::Error)]
pub enum FailureLogError {
    /// Log cannot be read.
    #[error("failed to read failure log at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Log cannot be written.
    #[error("failed to write failure log at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Log content is not an entry array.
    #[error("failed to parse failure log at {:?}", path.display())]
    Parse {
        #[source]
        source: serde_json::Error,
        path: PathBuf,
    },
}

/// Friendly result alias :3
pub type Result<T, E = FailureLogError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use sealed_test::prelude::*;

    fn entry(component: &str, minutes_ago: i64) -> FailureLogEntry {
        FailureLogEntry::new(
            component,
            ProviderKind::NativePackage,
            format!("winget install --id {component}"),
            "installer exited with 1",
            "stdout: nope",
            Some(1),
            false,
        )
        .at(Utc::now() - TimeDelta::minutes(minutes_ago))
    }

    #[test]
    fn history_keeps_most_recent_fifty() {
        let mut history = FailureHistory::new();
        for minutes_ago in (0..60).rev() {
            history.push(entry("oh-my-posh", minutes_ago));
        }

        assert_eq!(history.len(), MAX_ENTRIES);
        let timestamps = history.entries().map(|e| e.timestamp).collect::<Vec<_>>();
        let mut sorted = timestamps.clone();
        sorted.sort();
        assert_eq!(timestamps, sorted);

        // Oldest ten evicted, i.e., 59..=50 minutes ago are gone.
        let oldest = history.entries().next().map(|e| e.timestamp);
        let now = Utc::now();
        assert!(oldest.is_some_and(|t| now - t < TimeDelta::minutes(50)));
    }

    #[test]
    fn grouped_counts_failures_per_component() {
        let mut history = FailureHistory::new();
        let mut newest = None;
        for minutes_ago in (0..60).rev() {
            let entry = entry("oh-my-posh", minutes_ago);
            newest = Some(entry.clone());
            history.push(entry);
        }

        let groups = history.grouped(TimeDelta::days(7), Utc::now());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].component_name, "oh-my-posh");
        assert_eq!(groups[0].count, 50);
        assert_eq!(Some(groups[0].latest.clone()), newest);
    }

    #[test]
    fn recent_excludes_entries_outside_window() {
        let mut history = FailureHistory::new();
        history.push(entry("fzf", 60 * 24 * 8));
        history.push(entry("yazi", 60 * 24 * 2));
        history.push(entry("fzf", 5));

        let recent = history.recent(TimeDelta::days(7), Utc::now());
        assert_eq!(recent.len(), 2);
        assert_eq!(history.len(), 3);

        let groups = history.grouped(TimeDelta::days(7), Utc::now());
        let summary = groups
            .iter()
            .map(|group| (group.component_name.as_str(), group.count))
            .collect::<Vec<_>>();
        assert_eq!(summary, vec![("fzf", 1), ("yazi", 1)]);
    }

    #[test]
    fn entry_output_is_truncated() {
        let output = "x".repeat(MAX_OUTPUT_CHARS + 10);
        let entry = FailureLogEntry::new("blah", ProviderKind::Custom, "", "", output, None, false);
        assert!(entry.full_output.starts_with(&"x".repeat(MAX_OUTPUT_CHARS)));
        assert!(entry.full_output.ends_with("[truncated]"));
    }

    #[sealed_test]
    fn missing_log_is_empty() -> anyhow::Result<()> {
        let log = FailureLog::new("state/failures.json");
        assert!(log.load()?.is_empty());
        assert!(log.list_recent(DEFAULT_WINDOW_DAYS)?.is_empty());

        Ok(())
    }

    #[sealed_test]
    fn record_persists_and_caps_entries() -> anyhow::Result<()> {
        let mut log = FailureLog::new("state/failures.json");
        for minutes_ago in (0..55).rev() {
            log.record(entry("psfzf", minutes_ago));
        }

        let entries = log.list_recent(DEFAULT_WINDOW_DAYS)?;
        assert_eq!(entries.len(), MAX_ENTRIES);
        let content = std::fs::read_to_string("state/failures.json")?;
        assert!(content.trim_start().starts_with('['));
        assert!(content.contains("\"componentName\": \"psfzf\""));

        Ok(())
    }

    #[sealed_test]
    fn clear_truncates_log() -> anyhow::Result<()> {
        let mut log = FailureLog::new("failures.json");
        log.record(entry("zoxide", 1));
        log.record(entry("fzf", 0));
        assert_eq!(log.list_recent(DEFAULT_WINDOW_DAYS)?.len(), 2);

        log.clear()?;
        assert!(log.list_recent(DEFAULT_WINDOW_DAYS)?.is_empty());

        Ok(())
    }

    #[test]
    fn widest_window_has_no_lower_bound() {
        let mut history = FailureHistory::new();
        history.push(entry("fzf", 60 * 24 * 365 * 30));
        history.push(entry("yazi", 5));

        assert_eq!(history.recent(window(u32::MAX), Utc::now()).len(), 2);
        assert_eq!(history.recent(TimeDelta::MAX, Utc::now()).len(), 2);
        assert_eq!(history.grouped(window(u32::MAX), Utc::now()).len(), 2);
    }

    #[sealed_test]
    fn list_recent_accepts_any_window() -> anyhow::Result<()> {
        let mut log = FailureLog::new("failures.json");
        log.record(entry("fzf", 0));
        assert_eq!(log.list_recent(u32::MAX)?.len(), 1);
        assert_eq!(log.grouped(u32::MAX)?.len(), 1);
        assert!(log.list_recent(0)?.is_empty());

        Ok(())
    }

    #[sealed_test]
    fn corrupt_log_is_replaced_on_record() -> anyhow::Result<()> {
        std::fs::write("failures.json", "{ not json")?;
        let mut log = FailureLog::new("failures.json");
        assert!(matches!(log.load(), Err(FailureLogError::Parse { .. })));
        assert!(log.list_recent(DEFAULT_WINDOW_DAYS)?.is_empty());
        assert!(log.grouped(DEFAULT_WINDOW_DAYS)?.is_empty());

        log.record(entry("fzf", 0));
        assert_eq!(log.load()?.len(), 1);

        Ok(())
    }

    #[sealed_test]
    fn record_never_panics_on_unwritable_path() {
        std::fs::write("blocker", "i am a file").unwrap();
        let mut log = FailureLog::new("blocker/failures.json");
        log.record(entry("fzf", 0));
        assert!(log.load().is_err());
    }
}
