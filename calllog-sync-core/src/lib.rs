//! # calllog-sync-core
//!
//! Core library for calllog-sync - reliable delivery of phone call events to
//! an HTTP endpoint.
//!
//! This library provides:
//! - Domain types for call records and call-state transitions
//! - A durable SQLite-backed delivery queue
//! - The delivery worker (HTTP POST with exponential backoff)
//! - Call event sources (live call-state signal and call-log rescan)
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! ```text
//! EventSource / call-log rescan → SyncQueue (SQLite) → DeliveryWorker → endpoint
//!                                        ↑
//!                                 Settings (endpoint URL)
//! ```
//!
//! Every call is persisted before any network attempt. A record leaves the
//! queue only as `synced` or `failed_permanent`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use calllog_sync_core::{Config, Database, Settings, SyncQueue};
//!
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! db.migrate().expect("failed to run migrations");
//! let db = Arc::new(db);
//!
//! let queue = SyncQueue::open(db.clone()).expect("failed to open queue");
//! let settings = Settings::new(db);
//! settings.set_endpoint_url("https://example.com/calls").expect("invalid URL");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use delivery::{CycleOutcome, DeliveryWorker, WorkerStats};
pub use error::{Error, Result};
pub use queue::SyncQueue;
pub use settings::Settings;
pub use source::{import_call_log, spawn_ingest, EventSource, JsonCallLog};
pub use types::*;
pub use view::{CallLogView, SyncSummary};

// Public modules
pub mod config;
pub mod db;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod queue;
pub mod settings;
pub mod source;
pub mod types;
pub mod view;
