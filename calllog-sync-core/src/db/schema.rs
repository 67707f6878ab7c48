//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: durable call queue and settings
    r#"
    CREATE TABLE IF NOT EXISTS call_records (
        id               TEXT PRIMARY KEY,
        contact_name     TEXT,
        phone_number     TEXT NOT NULL,
        direction        TEXT NOT NULL,
        timestamp        INTEGER NOT NULL,
        duration_sec     INTEGER NOT NULL CHECK (duration_sec >= 0),

        -- Delivery state
        sync_status      TEXT NOT NULL DEFAULT 'pending',
        attempt_count    INTEGER NOT NULL DEFAULT 0,
        next_attempt_at  INTEGER NOT NULL DEFAULT 0,
        last_error       TEXT,

        created_at       INTEGER NOT NULL,
        updated_at       INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS settings (
        key              TEXT PRIMARY KEY,
        value            TEXT NOT NULL,
        updated_at       INTEGER NOT NULL
    );

    -- Claim order: oldest pending first, id breaks ties
    CREATE INDEX IF NOT EXISTS idx_call_records_claim
        ON call_records(sync_status, timestamp, id);
    CREATE INDEX IF NOT EXISTS idx_call_records_timestamp
        ON call_records(timestamp DESC);

    -- At most one record in flight
    CREATE UNIQUE INDEX IF NOT EXISTS idx_call_records_single_in_flight
        ON call_records(sync_status) WHERE sync_status = 'in_flight';
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
