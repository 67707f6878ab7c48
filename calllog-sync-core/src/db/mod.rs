//! Database layer for calllog-sync
//!
//! This module provides the storage layer using SQLite with:
//! - Schema migrations
//! - Guarded status transitions for the durable queue
//! - A small key-value settings table

pub mod repo;
pub mod schema;

pub use repo::{Database, Transition};
