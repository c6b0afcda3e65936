//! Per-repository log file with live tailing.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub group: String,
    pub name: String,
    pub message: String,
}

impl JournalEntry {
    fn line(&self) -> String {
        format!(
            "{} {:<5} gitops {}/{}: {}\n",
            self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            self.level,
            self.group,
            self.name,
            self.message
        )
    }
}

/// Appends transitions and errors of one repository to
/// `<data_dir>/logs/gitops.<group>.<name>.log`.
pub struct RepositoryJournal {
    group: String,
    name: String,
    path: PathBuf,
    sender: broadcast::Sender<JournalEntry>,
}

impl RepositoryJournal {
    pub fn new(data_dir: &Path, group: &str, name: &str) -> Self {
        let (sender, _) = broadcast::channel(100);
        Self {
            group: group.to_string(),
            name: name.to_string(),
            path: Self::path_for(data_dir, group, name),
            sender,
        }
    }

    /// Location of the log file.
    pub fn path_for(data_dir: &Path, group: &str, name: &str) -> PathBuf {
        data_dir
            .join("logs")
            .join(format!("gitops.{}.{}.log", group, name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JournalEntry> {
        self.sender.subscribe()
    }

    pub fn info(&self, message: &str) {
        self.record("INFO", message);
    }

    pub fn warn(&self, message: &str) {
        self.record("WARN", message);
    }

    pub fn error(&self, message: &str) {
        self.record("ERROR", message);
    }

    fn record(&self, level: &str, message: &str) {
        let entry = JournalEntry {
            timestamp: Utc::now(),
            level: level.to_string(),
            group: self.group.clone(),
            name: self.name.clone(),
            message: message.to_string(),
        };

        if let Err(e) = self.append(&entry) {
            log::warn!(
                "Failed to write journal {}: {}",
                self.path.display(),
                e
            );
        }

        // No active receivers is fine
        let _ = self.sender.send(entry);
    }

    fn append(&self, entry: &JournalEntry) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(entry.line().as_bytes())
    }
}
