//! Durable, ordered queue of call records awaiting delivery
//!
//! The queue wraps the [`Database`] and adds the coordination the delivery
//! worker needs:
//! - a [`Notify`] that wakes the worker when a new record is admitted
//! - a single worker lease, so only one worker drains a queue at a time
//! - recovery of records left in flight by an interrupted process
//!
//! Every operation here is a fast, local, synchronous write. Nothing in this
//! module touches the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Notify;

use crate::db::{Database, Transition};
use crate::error::{Error, Result};
use crate::types::CallRecord;

/// Shared handle to the durable queue.
#[derive(Clone)]
pub struct SyncQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    db: Arc<Database>,
    wake: Notify,
    worker_active: AtomicBool,
}

/// Held by the one delivery worker allowed to drain a queue.
///
/// Dropping the lease lets another worker start.
pub struct WorkerLease {
    queue: SyncQueue,
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        self.queue.inner.worker_active.store(false, Ordering::Release);
    }
}

impl SyncQueue {
    /// Wrap a migrated database, recovering any interrupted delivery.
    pub fn open(db: Arc<Database>) -> Result<Self> {
        let queue = Self::attach(db);
        queue.recover_in_flight()?;
        Ok(queue)
    }

    /// Wrap a database that a worker in another process may be draining.
    ///
    /// In-flight records are left alone; use this for producers only.
    pub fn attach(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                db,
                wake: Notify::new(),
                worker_active: AtomicBool::new(false),
            }),
        }
    }

    /// Revert records left in flight by an interrupted process to pending.
    ///
    /// `attempt_count` is untouched. Returns the number of records reverted.
    pub fn recover_in_flight(&self) -> Result<usize> {
        let recovered = self.inner.db.reset_in_flight(now_ms())?;
        if recovered > 0 {
            tracing::warn!(recovered, "Reverted interrupted in-flight records to pending");
        }
        Ok(recovered)
    }

    /// Access the underlying database (settings, listings)
    pub fn database(&self) -> &Database {
        &self.inner.db
    }

    /// Take the worker lease, failing if another worker holds it.
    pub fn acquire_worker(&self) -> Result<WorkerLease> {
        if self
            .inner
            .worker_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::WorkerBusy);
        }
        Ok(WorkerLease {
            queue: self.clone(),
        })
    }

    /// Admit a record unless its id is already known.
    ///
    /// Returns true if a new record was admitted.
    pub fn enqueue(&self, record: &CallRecord) -> Result<bool> {
        let admitted = self.inner.db.insert_record_if_absent(record)?;
        if admitted {
            tracing::debug!(
                id = %record.id,
                direction = %record.direction,
                timestamp = record.timestamp,
                "Enqueued call record"
            );
            self.inner.wake.notify_one();
        } else {
            tracing::trace!(id = %record.id, "Duplicate call record ignored");
        }
        Ok(admitted)
    }

    /// Claim the oldest pending record whose backoff has expired.
    pub fn claim_next(&self) -> Result<Option<CallRecord>> {
        self.claim_next_at(now_ms())
    }

    /// [`claim_next`](Self::claim_next) against an explicit clock.
    pub fn claim_next_at(&self, now_ms: i64) -> Result<Option<CallRecord>> {
        let claimed = self.inner.db.claim_next_record(now_ms)?;
        if let Some(record) = &claimed {
            tracing::debug!(id = %record.id, attempt_count = record.attempt_count, "Claimed record");
        }
        Ok(claimed)
    }

    /// Mark an in-flight record as delivered.
    pub fn ack(&self, id: &str) -> Result<bool> {
        let transition = self.inner.db.mark_synced(id, now_ms())?;
        Ok(log_transition(id, "ack", transition))
    }

    /// Return an in-flight record to pending, counting the attempt.
    ///
    /// The record becomes claimable again once `delay` has elapsed.
    pub fn requeue(&self, id: &str, delay: Duration, reason: &str) -> Result<bool> {
        let now = now_ms();
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let next_attempt_at = now.saturating_add(delay_ms);
        let transition = self
            .inner
            .db
            .mark_pending_retry(id, next_attempt_at, reason, now)?;
        Ok(log_transition(id, "requeue", transition))
    }

    /// Mark an in-flight record as permanently failed.
    pub fn fail(&self, id: &str, reason: &str) -> Result<bool> {
        let transition = self.inner.db.mark_failed(id, reason, now_ms())?;
        Ok(log_transition(id, "fail", transition))
    }

    /// Return a claimed record to pending without counting an attempt.
    pub fn release(&self, id: &str) -> Result<bool> {
        let transition = self.inner.db.release_in_flight(id, now_ms())?;
        Ok(log_transition(id, "release", transition))
    }

    /// Get a record by id
    pub fn record(&self, id: &str) -> Result<Option<CallRecord>> {
        self.inner.db.get_record(id)
    }

    /// How long until the earliest backoff gate opens, if anything is pending.
    ///
    /// Returns `Duration::ZERO` when a pending record is already claimable.
    pub fn next_wakeup(&self) -> Result<Option<Duration>> {
        let now = now_ms();
        Ok(self.inner.db.next_pending_attempt_at()?.map(|at| {
            let wait = at.saturating_sub(now).max(0);
            Duration::from_millis(wait as u64)
        }))
    }

    /// Wait until a new record is admitted.
    pub async fn notified(&self) {
        self.inner.wake.notified().await;
    }
}

fn log_transition(id: &str, op: &str, transition: Transition) -> bool {
    match transition {
        Transition::Applied => true,
        Transition::NotFound => {
            tracing::warn!(id, op, "Unknown call record; ignoring");
            false
        }
        Transition::Rejected(status) => {
            tracing::warn!(id, op, status = %status, "Record is not in flight; ignoring");
            false
        }
    }
}

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
