//! Call event sources
//!
//! Two ways records reach the queue:
//!
//! - **Live**: [`EventSource`] turns raw call-state transitions into
//!   [`CallEnded`] facts on a channel; [`spawn_ingest`] drains that channel
//!   into the [`SyncQueue`].
//! - **Rescan**: [`import_call_log`] reads the device call history and
//!   enqueues anything not already known.
//!
//! Direction always comes from the observed state history, never from the
//! intent of whoever placed the call.

mod call_log;
mod tracker;

pub use call_log::{
    import_call_log, CallLogEntry, CallLogSource, CallLogType, ImportSummary, JsonCallLog,
};
pub use tracker::CallStateTracker;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::queue::SyncQueue;
use crate::types::{CallEnded, CallRecord, CallStateChange};

/// Adapter from the telephony call-state signal to call-ended events.
pub struct EventSource {
    tracker: CallStateTracker,
    tx: mpsc::UnboundedSender<CallEnded>,
}

impl EventSource {
    /// Create a source and the receiver its events are delivered to.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<CallEnded>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = Self {
            tracker: CallStateTracker::new(),
            tx,
        };
        (source, rx)
    }

    /// Feed one state transition. Returns true if it completed a call.
    pub fn on_state_change(&mut self, change: CallStateChange) -> bool {
        tracing::trace!(state = ?change.state, at_ms = change.at_ms, "Call state change");

        let Some(ended) = self.tracker.observe(&change) else {
            return false;
        };

        tracing::info!(
            direction = %ended.direction,
            timestamp_ms = ended.timestamp_ms,
            duration_sec = ended.duration_sec,
            "Call ended"
        );
        if self.tx.send(ended).is_err() {
            tracing::warn!("Call-ended receiver closed; event dropped");
            return false;
        }
        true
    }
}

/// Counts from an ingest task
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestStats {
    /// Call-ended events received
    pub received: usize,
    /// Records newly admitted to the queue
    pub admitted: usize,
    /// Events whose record was already queued
    pub duplicates: usize,
    /// Events lost to a storage error
    pub errors: usize,
}

/// Enqueue every call-ended event until the sending side is dropped.
pub fn spawn_ingest(
    mut rx: mpsc::UnboundedReceiver<CallEnded>,
    queue: SyncQueue,
) -> JoinHandle<IngestStats> {
    tokio::spawn(async move {
        let mut stats = IngestStats::default();
        while let Some(ended) = rx.recv().await {
            stats.received += 1;
            let record = CallRecord::from_call_ended(&ended);
            match queue.enqueue(&record) {
                Ok(true) => stats.admitted += 1,
                Ok(false) => stats.duplicates += 1,
                Err(e) => {
                    stats.errors += 1;
                    tracing::error!(id = %record.id, error = %e, "Failed to enqueue call record");
                }
            }
        }
        tracing::debug!(
            received = stats.received,
            admitted = stats.admitted,
            "Call event ingest finished"
        );
        stats
    })
}
