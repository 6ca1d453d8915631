#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON logging and persisted interaction history for Rafiq.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Log severity level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Debug information.
    Debug,
    /// Informational events.
    Info,
    /// Warning indicator.
    Warn,
    /// Error indicator.
    Error,
}

/// Structured log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Timestamp in ISO8601.
    pub timestamp: DateTime<Utc>,
    /// Component emitting the log.
    pub component: String,
    /// Severity.
    pub level: LogLevel,
    /// Human-readable message.
    pub message: String,
    /// Arbitrary JSON payload for structured fields.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl LogRecord {
    /// Creates a record with the provided info.
    #[must_use]
    pub fn new(component: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            component: component.into(),
            level,
            message: message.into(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Attaches a structured metadata payload.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = metadata {
            self.metadata = map;
        }
        self
    }
}

/// Thread-safe JSON logger with append-only semantics.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    writer: Mutex<File>,
}

impl JsonLogger {
    /// Creates or opens a logger at the desired path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Writes a log record as a JSON line.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Returns the underlying file path (useful for tests).
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Per-step summary persisted alongside each interaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    /// Operation that ran (or was skipped).
    pub operation: String,
    /// Terminal status label (`succeeded`, `failed`, `skipped`).
    pub status: String,
}

/// Persisted record of one instruction/plan exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Instruction identifier.
    pub instruction_id: Uuid,
    /// Raw instruction text.
    pub text: String,
    /// Language code ("en", "ar", ...).
    pub language: String,
    /// Identifier of the plan that ran.
    pub plan_id: String,
    /// Where the plan came from (`cache`, `model`, `fallback`).
    pub plan_origin: String,
    /// Whether every non-skipped step succeeded.
    pub success: bool,
    /// One summary per plan step, in order.
    pub steps: Vec<StepSummary>,
    /// Timestamp when the entry was recorded.
    pub recorded_at: DateTime<Utc>,
}

/// Append-only JSONL history of executed instructions.
#[derive(Debug)]
pub struct HistoryLog {
    logger: JsonLogger,
}

impl HistoryLog {
    /// Creates or opens the history file.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            logger: JsonLogger::new(path)?,
        })
    }

    /// Appends an entry to the history.
    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        let mut writer = self.logger.writer.lock();
        serde_json::to_writer(&mut *writer, entry)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Reads up to `limit` most recent entries, oldest first.
    pub fn read_recent(&self, limit: usize) -> Result<Vec<HistoryEntry>> {
        let content = fs::read_to_string(self.logger.path())?;
        let mut entries: Vec<HistoryEntry> = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        if entries.len() > limit {
            entries.drain(..entries.len() - limit);
        }
        Ok(entries)
    }

    /// Returns the underlying file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.logger.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_json_lines() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("rafiq.log")).unwrap();
        logger
            .log(&LogRecord::new("planner", LogLevel::Info, "hello"))
            .unwrap();
        let content = fs::read_to_string(logger.path()).unwrap();
        assert!(content.contains("\"message\":\"hello\""));
    }

    #[test]
    fn history_round_trips_and_bounds_reads() {
        let dir = tempdir().unwrap();
        let history = HistoryLog::new(dir.path().join("history.jsonl")).unwrap();
        for idx in 0..5 {
            history
                .append(&HistoryEntry {
                    instruction_id: Uuid::new_v4(),
                    text: format!("instruction {idx}"),
                    language: "en".into(),
                    plan_id: format!("plan-{idx}"),
                    plan_origin: "model".into(),
                    success: idx % 2 == 0,
                    steps: vec![StepSummary {
                        operation: "echo".into(),
                        status: "succeeded".into(),
                    }],
                    recorded_at: Utc::now(),
                })
                .unwrap();
        }
        let entries = history.read_recent(3).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].text, "instruction 2");
        assert_eq!(entries[2].plan_id, "plan-4");
    }
}
