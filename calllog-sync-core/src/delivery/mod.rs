//! Endpoint delivery
//!
//! This module turns queued call records into HTTP POSTs against the
//! configured endpoint.
//!
//! ## Architecture
//!
//! Delivery is "local-first":
//! - Records are always written to the local SQLite queue first
//! - The worker delivers asynchronously, one record at a time
//! - Network failures are recorded on the record and never block ingestion
//!
//! ## Retry policy
//!
//! | Response | Action |
//! |----------|--------|
//! | 2xx | ack, record becomes `synced` |
//! | 4xx | fail, record becomes `failed_permanent` |
//! | 5xx, timeout, connection error | requeue behind `min(base * 2^n, max)`, or fail once `max_retries` requeues are used |

mod backoff;
mod client;
mod payload;
mod worker;

pub use backoff::BackoffPolicy;
pub use client::{classify_status, DeliveryClient, DeliveryOutcome, StatusClass};
pub use payload::DeliveryPayload;
pub use worker::{CycleOutcome, DeliveryWorker, WorkerStats};
