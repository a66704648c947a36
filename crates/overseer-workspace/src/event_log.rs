//! Append-only JSONL event logs
//!
//! Each control-plane component writes its state transitions to a log file,
//! one JSON record per line:
//!
//!   { "timestamp": "2026-08-01T12:00:00.000Z", "type": "agent_create", "data": { ... } }
//!
//! On startup the previous file is rotated aside to `<stem>.<timestamp>.log`
//! and the fresh log opens with a `@log_init` record. External monitors
//! tailing the file reset their in-memory model whenever they see the
//! marker. Appends go through one mutex so record order matches the
//! wall-clock order of the operations that produced them.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use overseer_core::{Error, Result};

/// Marker record type written as the first line of every fresh log.
pub const LOG_INIT: &str = "@log_init";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: serde_json::Value,
}

impl EventRecord {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            kind: kind.into(),
            data,
        }
    }

    pub fn is_init(&self) -> bool {
        self.kind == LOG_INIT
    }
}

pub struct EventLog {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl EventLog {
    /// Open a log at `path`, rotating any existing file aside and writing
    /// the `@log_init` marker.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if path.exists() {
            let rotated = rotated_path(&path);
            std::fs::rename(&path, &rotated)?;
        }

        let file = OpenOptions::new().create_new(true).append(true).open(&path)?;
        let log = Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        };
        log.append(LOG_INIT, serde_json::json!({}))?;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record and flush so tailing monitors see it immediately.
    pub fn append(&self, kind: &str, data: serde_json::Value) -> Result<()> {
        let record = EventRecord::new(kind, data);
        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut writer = self.writer.lock().expect("event log writer poisoned");
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    /// Append, logging instead of failing. The event log is an observer
    /// channel; a write error must not fail the state transition it traces.
    pub fn emit(&self, kind: &str, data: serde_json::Value) {
        if let Err(e) = self.append(kind, data) {
            warn!(path = %self.path.display(), kind, error = %e, "event log append failed");
        }
    }
}

fn rotated_path(path: &Path) -> PathBuf {
    let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true).replace(':', "-");
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "events".to_string());
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "log".to_string());
    path.with_file_name(format!("{stem}.{stamp}.{ext}"))
}

/// Parse a full event log. An unparsable line is a hard error.
pub fn read_log(path: impl AsRef<Path>) -> Result<Vec<EventRecord>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut records = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: EventRecord = serde_json::from_str(&line).map_err(|e| Error::RestoreFailed {
            path: path.display().to_string(),
            line: idx + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Monitor-side view: only the records after the last `@log_init` marker,
/// i.e. the state a consumer would hold after honoring every reset.
pub fn replay(path: impl AsRef<Path>) -> Result<Vec<EventRecord>> {
    let records = read_log(path)?;
    let cut = records
        .iter()
        .rposition(EventRecord::is_init)
        .map(|i| i + 1)
        .unwrap_or(0);
    Ok(records[cut..].to_vec())
}
