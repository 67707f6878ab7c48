//! Read-only views over the queue for display
//!
//! The list shows every record newest first with its sync status. Filtering
//! is a case-insensitive substring match on the display name (contact name,
//! or number when no name is known) and keeps the list order.

use std::collections::HashMap;

use crate::db::Database;
use crate::error::Result;
use crate::types::{CallRecord, SyncStatus};

/// Snapshot of all records, newest first
#[derive(Debug, Clone, Default)]
pub struct CallLogView {
    records: Vec<CallRecord>,
}

impl CallLogView {
    pub fn load(db: &Database) -> Result<Self> {
        Ok(Self::from_records(db.list_records()?))
    }

    pub fn from_records(mut records: Vec<CallRecord>) -> Self {
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
        Self { records }
    }

    pub fn records(&self) -> &[CallRecord] {
        &self.records
    }

    /// Records whose display name contains `text`, ignoring case.
    ///
    /// An empty filter matches everything.
    pub fn filter(&self, text: &str) -> Vec<&CallRecord> {
        let needle = text.to_lowercase();
        self.records
            .iter()
            .filter(|record| needle.is_empty() || record.display_name().to_lowercase().contains(&needle))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Record counts per sync status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncSummary {
    counts: HashMap<SyncStatus, i64>,
}

impl SyncSummary {
    pub fn load(db: &Database) -> Result<Self> {
        Ok(Self {
            counts: db.count_records_by_status()?,
        })
    }

    pub fn count(&self, status: SyncStatus) -> i64 {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn total(&self) -> i64 {
        self.counts.values().sum()
    }
}
