//! Database repository layer
//!
//! Provides the row-level operations behind the sync queue and the settings
//! store. Every state transition is a single guarded `UPDATE` (or, for claims,
//! one immediate transaction) so records move atomically.

use crate::error::{Error, Result};
use crate::types::*;
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Outcome of a guarded status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The record was in flight and has moved to its new status
    Applied,
    /// No record with this id exists
    NotFound,
    /// The record exists but was not in flight
    Rejected(SyncStatus),
}

/// Database handle (single connection guarded by a mutex)
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Call record operations
    // ============================================

    /// Insert a record unless one with the same id already exists.
    ///
    /// Returns true if the record was admitted.
    pub fn insert_record_if_absent(&self, record: &CallRecord) -> Result<bool> {
        let conn = self.connection();
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO call_records (
                id, contact_name, phone_number, direction, timestamp, duration_sec,
                sync_status, attempt_count, next_attempt_at, last_error,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, 0, NULL, ?7, ?7)
            "#,
            params![
                record.id,
                record.contact_name,
                record.phone_number,
                record.direction.as_str(),
                record.timestamp,
                record.duration_sec,
                record.updated_at,
            ],
        )?;
        Ok(inserted == 1)
    }

    /// Claim the oldest eligible pending record, marking it in flight.
    ///
    /// Returns None while another record is in flight or when nothing pending
    /// has a backoff gate at or before `now_ms`.
    pub fn claim_next_record(&self, now_ms: i64) -> Result<Option<CallRecord>> {
        let mut conn = self.connection();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let in_flight: i64 = tx.query_row(
            "SELECT COUNT(*) FROM call_records WHERE sync_status = 'in_flight'",
            [],
            |row| row.get(0),
        )?;
        if in_flight > 0 {
            return Ok(None);
        }

        let candidate = tx
            .query_row(
                r#"
                SELECT * FROM call_records
                WHERE sync_status = 'pending' AND next_attempt_at <= ?1
                ORDER BY timestamp ASC, id ASC
                LIMIT 1
                "#,
                [now_ms],
                Self::row_to_record,
            )
            .optional()?;

        let Some(mut record) = candidate else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE call_records SET sync_status = 'in_flight', updated_at = ?2 WHERE id = ?1",
            params![record.id, now_ms],
        )?;
        tx.commit()?;

        record.sync_status = SyncStatus::InFlight;
        record.updated_at = now_ms;
        Ok(Some(record))
    }

    /// In flight → synced
    pub fn mark_synced(&self, id: &str, now_ms: i64) -> Result<Transition> {
        self.transition_in_flight(
            id,
            r#"
            UPDATE call_records
            SET sync_status = 'synced', last_error = NULL, updated_at = ?2
            WHERE id = ?1 AND sync_status = 'in_flight'
            "#,
            params![id, now_ms],
        )
    }

    /// In flight → pending, counting the attempt and gating the next claim
    pub fn mark_pending_retry(
        &self,
        id: &str,
        next_attempt_at: i64,
        error: &str,
        now_ms: i64,
    ) -> Result<Transition> {
        self.transition_in_flight(
            id,
            r#"
            UPDATE call_records
            SET sync_status = 'pending',
                attempt_count = attempt_count + 1,
                next_attempt_at = ?2,
                last_error = ?3,
                updated_at = ?4
            WHERE id = ?1 AND sync_status = 'in_flight'
            "#,
            params![id, next_attempt_at, error, now_ms],
        )
    }

    /// In flight → failed permanently
    pub fn mark_failed(&self, id: &str, error: &str, now_ms: i64) -> Result<Transition> {
        self.transition_in_flight(
            id,
            r#"
            UPDATE call_records
            SET sync_status = 'failed_permanent', last_error = ?2, updated_at = ?3
            WHERE id = ?1 AND sync_status = 'in_flight'
            "#,
            params![id, error, now_ms],
        )
    }

    /// In flight → pending, leaving `attempt_count` and the backoff gate alone
    pub fn release_in_flight(&self, id: &str, now_ms: i64) -> Result<Transition> {
        self.transition_in_flight(
            id,
            r#"
            UPDATE call_records
            SET sync_status = 'pending', updated_at = ?2
            WHERE id = ?1 AND sync_status = 'in_flight'
            "#,
            params![id, now_ms],
        )
    }

    fn transition_in_flight(
        &self,
        id: &str,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Transition> {
        let conn = self.connection();
        if conn.execute(sql, params)? == 1 {
            return Ok(Transition::Applied);
        }

        let status: Option<String> = conn
            .query_row(
                "SELECT sync_status FROM call_records WHERE id = ?",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        match status {
            None => Ok(Transition::NotFound),
            Some(s) => s
                .parse::<SyncStatus>()
                .map(Transition::Rejected)
                .map_err(|e| Error::from(conversion_error("sync_status", e))),
        }
    }

    /// Revert every in-flight record to pending without counting an attempt.
    ///
    /// Returns the number of records recovered.
    pub fn reset_in_flight(&self, now_ms: i64) -> Result<usize> {
        let conn = self.connection();
        let reset = conn.execute(
            r#"
            UPDATE call_records
            SET sync_status = 'pending', updated_at = ?1
            WHERE sync_status = 'in_flight'
            "#,
            [now_ms],
        )?;
        Ok(reset)
    }

    /// Get a record by id
    pub fn get_record(&self, id: &str) -> Result<Option<CallRecord>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM call_records WHERE id = ?",
            [id],
            Self::row_to_record,
        )
        .optional()
        .map_err(Error::from)
    }

    /// All records, newest call first
    pub fn list_records(&self) -> Result<Vec<CallRecord>> {
        let conn = self.connection();
        let mut stmt =
            conn.prepare("SELECT * FROM call_records ORDER BY timestamp DESC, id ASC")?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Record counts keyed by status
    pub fn count_records_by_status(&self) -> Result<HashMap<SyncStatus, i64>> {
        let conn = self.connection();
        let mut stmt = conn
            .prepare("SELECT sync_status, COUNT(*) FROM call_records GROUP BY sync_status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            match status.parse::<SyncStatus>() {
                Ok(status) => {
                    counts.insert(status, count);
                }
                Err(e) => tracing::warn!(error = %e, "Skipping unknown status in counts"),
            }
        }
        Ok(counts)
    }

    /// Earliest backoff gate among pending records
    pub fn next_pending_attempt_at(&self) -> Result<Option<i64>> {
        let conn = self.connection();
        let next: Option<i64> = conn.query_row(
            "SELECT MIN(next_attempt_at) FROM call_records WHERE sync_status = 'pending'",
            [],
            |row| row.get(0),
        )?;
        Ok(next)
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<CallRecord> {
        let direction: String = row.get("direction")?;
        let status: String = row.get("sync_status")?;

        Ok(CallRecord {
            id: row.get("id")?,
            contact_name: row.get("contact_name")?,
            phone_number: row.get("phone_number")?,
            direction: direction
                .parse()
                .map_err(|e: String| conversion_error("direction", e))?,
            timestamp: row.get("timestamp")?,
            duration_sec: row.get("duration_sec")?,
            sync_status: status
                .parse()
                .map_err(|e: String| conversion_error("sync_status", e))?,
            attempt_count: row.get("attempt_count")?,
            next_attempt_at: row.get("next_attempt_at")?,
            last_error: row.get("last_error")?,
            updated_at: row.get("updated_at")?,
        })
    }

    // ============================================
    // Settings operations
    // ============================================

    /// Get a setting value by key
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.connection();
        conn.query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()
        .map_err(Error::from)
    }

    /// Insert or replace a setting value
    pub fn set_setting(&self, key: &str, value: &str, now_ms: i64) -> Result<()> {
        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value, now_ms],
        )?;
        Ok(())
    }
}

fn conversion_error(column: &str, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        Type::Text,
        format!("{}: {}", column, message).into(),
    )
}
