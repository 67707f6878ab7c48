//! Call-log rescan
//!
//! The device call history is read through [`CallLogSource`]. Rescanning it
//! is safe at any time: record ids are derived from number and start time,
//! so calls already in the queue are ignored.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::queue::SyncQueue;
use crate::types::{CallDirection, CallRecord};

/// Read-only access to the device call history.
pub trait CallLogSource {
    /// All entries, newest first
    fn query(&self) -> Result<Vec<CallLogEntry>>;
}

/// Call type as exported: either a name or the platform's integer code
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CallLogType {
    Code(i64),
    Name(String),
}

impl CallLogType {
    /// Map to a direction; rejected and blocked calls count as missed.
    pub fn direction(&self) -> Option<CallDirection> {
        match self {
            CallLogType::Code(1) => Some(CallDirection::Incoming),
            CallLogType::Code(2) => Some(CallDirection::Outgoing),
            CallLogType::Code(3 | 5 | 6) => Some(CallDirection::Missed),
            CallLogType::Code(_) => None,
            CallLogType::Name(name) => name.trim().to_ascii_uppercase().parse().ok(),
        }
    }
}

/// One row of the call history
#[derive(Debug, Clone, Deserialize)]
pub struct CallLogEntry {
    pub number: String,
    #[serde(default)]
    pub cached_name: Option<String>,
    #[serde(rename = "type")]
    pub call_type: CallLogType,
    /// Call start, epoch milliseconds
    pub date: i64,
    /// Seconds
    #[serde(default)]
    pub duration: u32,
}

impl CallLogEntry {
    /// Convert to a pending record, or None for unsupported call types.
    pub fn to_record(&self) -> Option<CallRecord> {
        let direction = self.call_type.direction()?;
        Some(CallRecord::new(
            self.number.clone(),
            self.cached_name.clone(),
            direction,
            self.date,
            self.duration,
        ))
    }
}

/// Call history exported as a JSON array of entries.
pub struct JsonCallLog {
    path: PathBuf,
}

impl JsonCallLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CallLogSource for JsonCallLog {
    fn query(&self) -> Result<Vec<CallLogEntry>> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied(self.path.display().to_string())
            }
            _ => Error::CallLog(format!("failed to read {}: {}", self.path.display(), e)),
        })?;

        let mut entries: Vec<CallLogEntry> = serde_json::from_str(&content)?;
        entries.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(entries)
    }
}

/// Counts from one rescan
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    /// Entries read from the source
    pub scanned: usize,
    /// New records admitted to the queue
    pub admitted: usize,
    /// Entries already in the queue
    pub duplicates: usize,
    /// Entries with an unsupported call type
    pub skipped: usize,
}

/// Enqueue every call-log entry not already known.
pub fn import_call_log(source: &dyn CallLogSource, queue: &SyncQueue) -> Result<ImportSummary> {
    let entries = source.query()?;
    let mut summary = ImportSummary {
        scanned: entries.len(),
        ..Default::default()
    };

    for entry in &entries {
        let Some(record) = entry.to_record() else {
            tracing::warn!(
                number = %entry.number,
                date = entry.date,
                call_type = ?entry.call_type,
                "Skipping call-log entry with unsupported type"
            );
            summary.skipped += 1;
            continue;
        };

        if queue.enqueue(&record)? {
            summary.admitted += 1;
        } else {
            summary.duplicates += 1;
        }
    }

    tracing::info!(
        scanned = summary.scanned,
        admitted = summary.admitted,
        duplicates = summary.duplicates,
        skipped = summary.skipped,
        "Call log rescan complete"
    );
    Ok(summary)
}
