//! Delivery worker
//!
//! Drains the [`SyncQueue`] one record per cycle:
//!
//! ```text
//! read endpoint → claim → POST → 2xx  → ack
//!                              → 4xx  → fail
//!                              → 5xx / timeout / connect
//!                                     → requeue with backoff, or fail at the cap
//! ```
//!
//! The loop is level-triggered. Between cycles it sleeps until the first of:
//! a new record being enqueued, the earliest backoff gate opening, the
//! periodic sweep, or shutdown.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::config::DeliveryConfig;
use crate::error::Result;
use crate::queue::{SyncQueue, WorkerLease};
use crate::settings::{validate_endpoint, Settings};

use super::backoff::BackoffPolicy;
use super::client::{DeliveryClient, DeliveryOutcome};
use super::payload::DeliveryPayload;

/// Floor on idle waits, so a claimable-but-blocked queue cannot spin
const MIN_IDLE_WAIT: Duration = Duration::from_millis(10);

/// What a single worker cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing claimable
    Idle,
    /// No usable endpoint configured; nothing was claimed
    NoEndpoint,
    /// Record delivered and acked
    Synced { id: String },
    /// Transient failure; record requeued behind `delay`
    Retrying {
        id: String,
        attempt_count: u32,
        delay: Duration,
    },
    /// Record marked permanently failed
    Failed { id: String, reason: String },
}

/// Delivery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerStats {
    /// Records acked
    pub synced: usize,
    /// Transient failures requeued
    pub retried: usize,
    /// Records failed permanently
    pub failed: usize,
    /// Cycles that hit a local (database) error
    pub errors: usize,
}

/// The single consumer of a [`SyncQueue`].
pub struct DeliveryWorker {
    queue: SyncQueue,
    settings: Settings,
    client: DeliveryClient,
    backoff: BackoffPolicy,
    max_retries: u32,
    sweep_interval: Duration,
    /// Claim whose result and release both failed to persist
    stranded: Mutex<Option<String>>,
    _lease: WorkerLease,
}

impl DeliveryWorker {
    /// Create the worker, taking the queue's worker lease.
    pub fn new(queue: SyncQueue, settings: Settings, config: &DeliveryConfig) -> Result<Self> {
        config.validate()?;
        let lease = queue.acquire_worker()?;
        let client = DeliveryClient::new(config.timeout())?;

        Ok(Self {
            queue,
            settings,
            client,
            backoff: BackoffPolicy::from_config(config),
            max_retries: config.max_retries,
            sweep_interval: config.sweep_interval(),
            stranded: Mutex::new(None),
            _lease: lease,
        })
    }

    /// Run one claim/deliver/resolve cycle.
    ///
    /// Delivery failures are recorded on the record; only local storage
    /// errors are returned. If the result cannot be recorded, the claim is
    /// released so the queue keeps moving.
    pub async fn run_once(&self) -> Result<CycleOutcome> {
        self.release_stranded()?;

        // Reread every cycle so a new endpoint applies to the next attempt
        let endpoint = match self.settings.endpoint_url()? {
            Some(raw) => match validate_endpoint(&raw) {
                Ok(url) => url,
                Err(e) => {
                    tracing::warn!(error = %e, "Stored endpoint is unusable; not delivering");
                    return Ok(CycleOutcome::NoEndpoint);
                }
            },
            None => return Ok(CycleOutcome::NoEndpoint),
        };

        let Some(record) = self.queue.claim_next()? else {
            return Ok(CycleOutcome::Idle);
        };

        let payload = DeliveryPayload::from_record(&record);
        let outcome = self.client.send(&endpoint, &payload).await;

        self.resolve(record.id.clone(), record.attempt_count, outcome)
            .inspect_err(|e| {
                tracing::error!(id = %record.id, error = %e, "Failed to record delivery result");
                self.release_claim(&record.id);
            })
    }

    fn resolve(&self, id: String, attempt_count: u32, outcome: DeliveryOutcome) -> Result<CycleOutcome> {
        match outcome {
            DeliveryOutcome::Delivered(status) => {
                self.queue.ack(&id)?;
                tracing::info!(id = %id, status = %status, "Delivered call record");
                Ok(CycleOutcome::Synced { id })
            }
            DeliveryOutcome::Rejected(reason) => {
                self.queue.fail(&id, &reason)?;
                tracing::warn!(id = %id, error = %reason, "Endpoint rejected call record");
                Ok(CycleOutcome::Failed { id, reason })
            }
            DeliveryOutcome::Transient(reason) if attempt_count >= self.max_retries => {
                let reason = format!(
                    "retries exhausted after {} attempts: {}",
                    attempt_count + 1,
                    reason
                );
                self.queue.fail(&id, &reason)?;
                tracing::warn!(id = %id, error = %reason, "Giving up on call record");
                Ok(CycleOutcome::Failed { id, reason })
            }
            DeliveryOutcome::Transient(reason) => {
                let attempt_count = attempt_count + 1;
                let delay = self.backoff.delay_for(attempt_count);
                self.queue.requeue(&id, delay, &reason)?;
                tracing::debug!(
                    id = %id,
                    attempt_count,
                    delay_ms = delay.as_millis() as u64,
                    error = %reason,
                    "Transient delivery failure; requeued"
                );
                Ok(CycleOutcome::Retrying {
                    id,
                    attempt_count,
                    delay,
                })
            }
        }
    }

    /// Put a claimed record back to pending, or remember it for the next cycle.
    fn release_claim(&self, id: &str) {
        match self.queue.release(id) {
            Ok(_) => tracing::warn!(id, "Released claim; record will be delivered again"),
            Err(e) => {
                tracing::error!(id, error = %e, "Failed to release claim; retrying next cycle");
                *self.stranded_claim() = Some(id.to_string());
            }
        }
    }

    /// Retry releasing a claim an earlier cycle could not resolve.
    fn release_stranded(&self) -> Result<()> {
        let mut stranded = self.stranded_claim();
        if let Some(id) = stranded.as_deref() {
            self.queue.release(id)?;
            tracing::info!(id, "Released stranded claim");
            *stranded = None;
        }
        Ok(())
    }

    fn stranded_claim(&self) -> MutexGuard<'_, Option<String>> {
        self.stranded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run until `shutdown` becomes true or its sender is dropped.
    ///
    /// Shutdown is observed between cycles; a delivery already in progress
    /// finishes and is resolved first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> WorkerStats {
        let mut stats = WorkerStats::default();
        tracing::info!("Delivery worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = match self.run_once().await {
                Ok(CycleOutcome::Synced { .. }) => {
                    stats.synced += 1;
                    continue;
                }
                Ok(CycleOutcome::Retrying { .. }) => {
                    stats.retried += 1;
                    continue;
                }
                Ok(CycleOutcome::Failed { .. }) => {
                    stats.failed += 1;
                    continue;
                }
                Ok(CycleOutcome::Idle) => self.idle_wait(),
                Ok(CycleOutcome::NoEndpoint) => {
                    tracing::debug!("No endpoint configured; waiting");
                    self.sweep_interval
                }
                Err(e) => {
                    stats.errors += 1;
                    tracing::error!(error = %e, "Delivery cycle failed");
                    self.sweep_interval
                }
            };

            tokio::select! {
                _ = self.queue.notified() => {}
                _ = tokio::time::sleep(wait) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(
            synced = stats.synced,
            retried = stats.retried,
            failed = stats.failed,
            "Delivery worker stopped"
        );
        stats
    }

    fn idle_wait(&self) -> Duration {
        match self.queue.next_wakeup() {
            Ok(Some(wait)) => wait.clamp(MIN_IDLE_WAIT, self.sweep_interval.max(MIN_IDLE_WAIT)),
            Ok(None) => self.sweep_interval,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read next backoff gate");
                self.sweep_interval
            }
        }
    }
}
