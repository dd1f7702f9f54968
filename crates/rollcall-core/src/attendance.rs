//! Append-only attendance log, one JSON object per line.

use crate::schedule::ScheduleSlot;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

/// Period label used when no slot is active.
pub const MANUAL_CHECK_LABEL: &str = "Manual Check";

#[derive(Error, Debug)]
pub enum LogError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Outcome of one attendance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Present,
    Absent,
    Error,
}

/// What triggered a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckMode {
    Manual,
    Auto,
}

impl std::fmt::Display for CheckMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckMode::Manual => f.write_str("manual"),
            CheckMode::Auto => f.write_str("auto"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceLogEntry {
    pub timestamp: DateTime<Local>,
    pub status: Verdict,
    pub name: String,
    /// Similarity of the match; 0 when there was none.
    pub confidence: f32,
    pub period_label: String,
    pub mode: CheckMode,
}

impl AttendanceLogEntry {
    /// Entry stamped with the current local time.
    pub fn now(
        status: Verdict,
        name: impl Into<String>,
        confidence: f32,
        slot: Option<&ScheduleSlot>,
        mode: CheckMode,
    ) -> Self {
        Self {
            timestamp: Local::now(),
            status,
            name: name.into(),
            confidence,
            period_label: period_label(slot),
            mode,
        }
    }
}

/// `"Period <n>"` for an active slot, `"Manual Check"` otherwise.
pub fn period_label(slot: Option<&ScheduleSlot>) -> String {
    slot.map_or_else(|| MANUAL_CHECK_LABEL.to_string(), ScheduleSlot::label)
}

/// File-backed log. Appends from threads sharing one instance are serialized.
#[derive(Debug)]
pub struct AttendanceLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl AttendanceLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, entry: &AttendanceLogEntry) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;

        tracing::debug!(
            status = ?entry.status,
            name = %entry.name,
            period = %entry.period_label,
            mode = %entry.mode,
            "attendance entry appended"
        );
        Ok(())
    }

    /// All entries in append order. Unparsable lines are skipped.
    pub fn read_all(&self) -> Result<Vec<AttendanceLogEntry>, LogError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), line = lineno + 1, error = %e, "skipping unreadable log line");
                }
            }
        }
        Ok(entries)
    }

    /// Truncate the whole log.
    pub fn clear(&self) -> Result<(), LogError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::File::create(&self.path)?;
        tracing::info!(path = %self.path.display(), "attendance log cleared");
        Ok(())
    }
}
