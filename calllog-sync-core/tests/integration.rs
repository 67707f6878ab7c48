//! Integration tests for the queue → worker → endpoint delivery flow
//!
//! These tests run the delivery worker against a local axum server that
//! records request bodies and answers with a scripted sequence of statuses.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::Router;

use calllog_sync_core::config::DeliveryConfig;
use calllog_sync_core::{
    spawn_ingest, CallDirection, CallRecord, CallState, CallStateChange, CycleOutcome, Database,
    DeliveryWorker, EventSource, Settings, SyncQueue, SyncStatus,
};

// ============================================
// Mock endpoint
// ============================================

#[derive(Default)]
struct MockEndpoint {
    /// Statuses to answer with, in order; 200 once exhausted
    script: Mutex<VecDeque<u16>>,
    /// Request bodies received, in order
    bodies: Mutex<Vec<String>>,
    /// Held before answering each request
    delay: Duration,
}

impl MockEndpoint {
    fn bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

async fn record_call(State(endpoint): State<Arc<MockEndpoint>>, body: String) -> (StatusCode, String) {
    endpoint.bodies.lock().unwrap().push(body);
    tokio::time::sleep(endpoint.delay).await;
    let code = endpoint.script.lock().unwrap().pop_front().unwrap_or(200);
    let status = StatusCode::from_u16(code).unwrap();
    (status, format!("status {code}"))
}

/// Spawn a mock endpoint on an ephemeral port.
/// Returns its URL, the shared state, and a shutdown handle.
async fn spawn_endpoint(
    script: &[u16],
) -> (String, Arc<MockEndpoint>, tokio::sync::oneshot::Sender<()>) {
    spawn_slow_endpoint(script, Duration::ZERO).await
}

/// Like [`spawn_endpoint`], but every response is held for `delay`.
async fn spawn_slow_endpoint(
    script: &[u16],
    delay: Duration,
) -> (String, Arc<MockEndpoint>, tokio::sync::oneshot::Sender<()>) {
    let state = Arc::new(MockEndpoint {
        script: Mutex::new(script.iter().copied().collect()),
        delay,
        ..Default::default()
    });
    let app = Router::new()
        .route("/calls", post(record_call))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = rx.await;
            })
            .await
            .unwrap();
    });
    (format!("http://127.0.0.1:{port}/calls"), state, tx)
}

// ============================================
// Fixtures
// ============================================

fn test_parts() -> (SyncQueue, Settings) {
    calllog_sync_core::logging::init_test();
    let db = Database::open_in_memory().unwrap();
    db.migrate().unwrap();
    let db = Arc::new(db);
    (SyncQueue::open(db.clone()).unwrap(), Settings::new(db))
}

fn fast_config() -> DeliveryConfig {
    DeliveryConfig {
        timeout_secs: 5,
        base_delay_ms: 25,
        max_delay_ms: 1_000,
        max_retries: 5,
        sweep_interval_secs: 1,
    }
}

fn outgoing_call() -> CallRecord {
    CallRecord::new(
        "555-1234",
        Some("Alice".to_string()),
        CallDirection::Outgoing,
        1_700_000_000_000,
        30,
    )
}

// ============================================
// Delivery scenarios
// ============================================

#[tokio::test]
async fn test_success_marks_synced_with_exact_body() {
    let (url, endpoint, _shutdown) = spawn_endpoint(&[200]).await;
    let (queue, settings) = test_parts();
    settings.set_endpoint_url(&url).unwrap();

    let record = outgoing_call();
    assert!(queue.enqueue(&record).unwrap());

    let worker = DeliveryWorker::new(queue.clone(), settings, &fast_config()).unwrap();
    let outcome = worker.run_once().await.unwrap();
    assert_eq!(
        outcome,
        CycleOutcome::Synced {
            id: record.id.clone()
        }
    );

    assert_eq!(
        endpoint.bodies(),
        vec![
            r#"{"mobile_number":"555-1234","call_date":1700000000000,"call_type":"OUTGOING","call_duration":30}"#
                .to_string()
        ]
    );

    let stored = queue.record(&record.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert_eq!(stored.attempt_count, 0);
    assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Idle);
}

#[tokio::test]
async fn test_server_errors_retry_with_growing_backoff() {
    let (url, endpoint, _shutdown) = spawn_endpoint(&[500, 500, 200]).await;
    let (queue, settings) = test_parts();
    settings.set_endpoint_url(&url).unwrap();

    let record = CallRecord::new("555-9876", None, CallDirection::Incoming, 42_000, 12);
    queue.enqueue(&record).unwrap();
    let worker = DeliveryWorker::new(queue.clone(), settings, &fast_config()).unwrap();

    let mut delays = Vec::new();
    let synced = loop {
        match worker.run_once().await.unwrap() {
            CycleOutcome::Retrying {
                attempt_count,
                delay,
                ..
            } => {
                delays.push((attempt_count, delay));
                // The record is gated until its backoff expires
                assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Idle);
                tokio::time::sleep(delay + Duration::from_millis(20)).await;
            }
            other => break other,
        }
    };

    assert_eq!(synced, CycleOutcome::Synced { id: record.id.clone() });
    assert_eq!(delays.len(), 2);
    assert_eq!(delays[0].0, 1);
    assert_eq!(delays[1].0, 2);
    assert!(delays[0].1 < delays[1].1);

    let stored = queue.record(&record.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Synced);
    assert_eq!(stored.attempt_count, 2);
    assert_eq!(endpoint.bodies().len(), 3);
}

#[tokio::test]
async fn test_client_error_fails_without_retry() {
    let (url, endpoint, _shutdown) = spawn_endpoint(&[400]).await;
    let (queue, settings) = test_parts();
    settings.set_endpoint_url(&url).unwrap();

    let record = outgoing_call();
    queue.enqueue(&record).unwrap();
    let worker = DeliveryWorker::new(queue.clone(), settings, &fast_config()).unwrap();

    let outcome = worker.run_once().await.unwrap();
    assert!(matches!(outcome, CycleOutcome::Failed { .. }), "{outcome:?}");
    assert_eq!(worker.run_once().await.unwrap(), CycleOutcome::Idle);

    let stored = queue.record(&record.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::FailedPermanent);
    assert_eq!(stored.attempt_count, 0);
    assert!(stored.last_error.unwrap().contains("400"));
    assert_eq!(endpoint.bodies().len(), 1);
}

#[tokio::test]
async fn test_endpoint_change_applies_to_next_attempt() {
    let (old_url, old_endpoint, _old) = spawn_endpoint(&[503]).await;
    let (new_url, new_endpoint, _new) = spawn_endpoint(&[]).await;
    let (queue, settings) = test_parts();
    settings.set_endpoint_url(&old_url).unwrap();

    let record = outgoing_call();
    queue.enqueue(&record).unwrap();
    let worker = DeliveryWorker::new(queue.clone(), settings.clone(), &fast_config()).unwrap();

    let CycleOutcome::Retrying { delay, .. } = worker.run_once().await.unwrap() else {
        panic!("expected a retry against the failing endpoint");
    };
    settings.set_endpoint_url(&new_url).unwrap();
    tokio::time::sleep(delay + Duration::from_millis(20)).await;

    assert_eq!(
        worker.run_once().await.unwrap(),
        CycleOutcome::Synced {
            id: record.id.clone()
        }
    );
    assert_eq!(old_endpoint.bodies().len(), 1);
    assert_eq!(new_endpoint.bodies().len(), 1);
}

#[tokio::test]
async fn test_records_deliver_oldest_first() {
    let (url, endpoint, _shutdown) = spawn_endpoint(&[]).await;
    let (queue, settings) = test_parts();
    settings.set_endpoint_url(&url).unwrap();

    for ts in [3_000, 1_000, 2_000] {
        queue
            .enqueue(&CallRecord::new("555", None, CallDirection::Incoming, ts, 1))
            .unwrap();
    }
    let worker = DeliveryWorker::new(queue, settings, &fast_config()).unwrap();
    for _ in 0..3 {
        assert!(matches!(
            worker.run_once().await.unwrap(),
            CycleOutcome::Synced { .. }
        ));
    }

    let dates: Vec<i64> = endpoint
        .bodies()
        .iter()
        .map(|body| {
            let value: serde_json::Value = serde_json::from_str(body).unwrap();
            value["call_date"].as_i64().unwrap()
        })
        .collect();
    assert_eq!(dates, vec![1_000, 2_000, 3_000]);
}

#[tokio::test]
async fn test_timeout_is_retried() {
    let (url, endpoint, _shutdown) = spawn_slow_endpoint(&[], Duration::from_secs(3)).await;
    let (queue, settings) = test_parts();
    settings.set_endpoint_url(&url).unwrap();

    let record = outgoing_call();
    queue.enqueue(&record).unwrap();
    let config = DeliveryConfig {
        timeout_secs: 1,
        ..fast_config()
    };
    let worker = DeliveryWorker::new(queue.clone(), settings, &config).unwrap();

    let outcome = worker.run_once().await.unwrap();
    assert!(
        matches!(outcome, CycleOutcome::Retrying { attempt_count: 1, .. }),
        "{outcome:?}"
    );

    let stored = queue.record(&record.id).unwrap().unwrap();
    assert_eq!(stored.sync_status, SyncStatus::Pending);
    assert_eq!(stored.attempt_count, 1);
    let last_error = stored.last_error.unwrap();
    assert!(last_error.contains("timed out"), "{last_error}");
    assert_eq!(endpoint.bodies().len(), 1);
}

// ============================================
// Storage failures while resolving
// ============================================

/// Make the given `in_flight → <status>` transition fail inside SQLite.
fn block_transition(queue: &SyncQueue, name: &str, condition: &str) {
    queue
        .database()
        .connection()
        .execute_batch(&format!(
            "CREATE TRIGGER {name} BEFORE UPDATE OF sync_status ON call_records
             WHEN OLD.sync_status = 'in_flight' AND {condition}
             BEGIN SELECT RAISE(ABORT, 'storage unavailable'); END;"
        ))
        .unwrap();
}

fn unblock_transition(queue: &SyncQueue, name: &str) {
    queue
        .database()
        .connection()
        .execute_batch(&format!("DROP TRIGGER {name};"))
        .unwrap();
}

fn two_calls(queue: &SyncQueue) -> (CallRecord, CallRecord) {
    let a = CallRecord::new("555-0001", None, CallDirection::Incoming, 1, 5);
    let b = CallRecord::new("555-0002", None, CallDirection::Incoming, 2, 5);
    queue.enqueue(&a).unwrap();
    queue.enqueue(&b).unwrap();
    (a, b)
}

#[tokio::test]
async fn test_failed_ack_releases_claim() {
    let (url, endpoint, _shutdown) = spawn_endpoint(&[]).await;
    let (queue, settings) = test_parts();
    settings.set_endpoint_url(&url).unwrap();
    let (a, b) = two_calls(&queue);
    let worker = DeliveryWorker::new(queue.clone(), settings, &fast_config()).unwrap();

    block_transition(&queue, "block_ack", "NEW.sync_status = 'synced'");
    assert!(worker.run_once().await.is_err());

    let released = queue.record(&a.id).unwrap().unwrap();
    assert_eq!(released.sync_status, SyncStatus::Pending);
    assert_eq!(released.attempt_count, 0);

    unblock_transition(&queue, "block_ack");
    assert_eq!(
        worker.run_once().await.unwrap(),
        CycleOutcome::Synced { id: a.id.clone() }
    );
    assert_eq!(
        worker.run_once().await.unwrap(),
        CycleOutcome::Synced { id: b.id.clone() }
    );
    // The first delivery is repeated after its ack was lost
    assert_eq!(endpoint.bodies().len(), 3);
}

#[tokio::test]
async fn test_stranded_claim_is_released_next_cycle() {
    let (url, endpoint, _shutdown) = spawn_endpoint(&[]).await;
    let (queue, settings) = test_parts();
    settings.set_endpoint_url(&url).unwrap();
    let (a, b) = two_calls(&queue);
    let worker = DeliveryWorker::new(queue.clone(), settings, &fast_config()).unwrap();

    // Neither the ack nor the release can be written
    block_transition(&queue, "block_resolve", "1");
    assert!(worker.run_once().await.is_err());
    assert_eq!(
        queue.record(&a.id).unwrap().unwrap().sync_status,
        SyncStatus::InFlight
    );

    // Still blocked: nothing new is sent
    assert!(worker.run_once().await.is_err());
    assert_eq!(endpoint.bodies().len(), 1);

    unblock_transition(&queue, "block_resolve");
    assert_eq!(
        worker.run_once().await.unwrap(),
        CycleOutcome::Synced { id: a.id.clone() }
    );
    assert_eq!(
        worker.run_once().await.unwrap(),
        CycleOutcome::Synced { id: b.id.clone() }
    );
    assert_eq!(
        queue.record(&b.id).unwrap().unwrap().sync_status,
        SyncStatus::Synced
    );
}

// ============================================
// Long-running worker
// ============================================

async fn wait_for_status(queue: &SyncQueue, id: &str, status: SyncStatus) {
    for _ in 0..200 {
        if queue.record(id).unwrap().map(|r| r.sync_status) == Some(status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("record {id} never reached {status}");
}

#[tokio::test]
async fn test_run_loop_retries_until_synced() {
    let (url, endpoint, _shutdown) = spawn_endpoint(&[500, 500, 200]).await;
    let (queue, settings) = test_parts();
    settings.set_endpoint_url(&url).unwrap();

    let worker = DeliveryWorker::new(queue.clone(), settings, &fast_config()).unwrap();
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker.run(stop_rx));

    // Enqueued after the worker is already waiting
    let record = outgoing_call();
    queue.enqueue(&record).unwrap();
    wait_for_status(&queue, &record.id, SyncStatus::Synced).await;

    stop_tx.send(true).unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stats.synced, 1);
    assert_eq!(stats.retried, 2);
    assert_eq!(endpoint.bodies().len(), 3);
}

#[tokio::test]
async fn test_call_state_events_reach_endpoint() {
    let (url, endpoint, _shutdown) = spawn_endpoint(&[]).await;
    let (queue, settings) = test_parts();
    settings.set_endpoint_url(&url).unwrap();

    let (mut source, rx) = EventSource::new();
    let ingest = spawn_ingest(rx, queue.clone());

    let worker = DeliveryWorker::new(queue.clone(), settings, &fast_config()).unwrap();
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let handle = tokio::spawn(worker.run(stop_rx));

    for (state, number, at_ms) in [
        (CallState::Ringing, "555-0100", 10_000),
        (CallState::OffHook, "", 12_000),
        (CallState::Idle, "", 72_000),
    ] {
        source.on_state_change(CallStateChange {
            state,
            number: number.to_string(),
            at_ms,
        });
    }
    drop(source);
    assert_eq!(ingest.await.unwrap().admitted, 1);

    let id = calllog_sync_core::record_id("555-0100", 10_000);
    wait_for_status(&queue, &id, SyncStatus::Synced).await;
    stop_tx.send(true).unwrap();
    handle.await.unwrap();

    let body: serde_json::Value = serde_json::from_str(&endpoint.bodies()[0]).unwrap();
    assert_eq!(body["mobile_number"], "555-0100");
    assert_eq!(body["call_type"], "INCOMING");
    assert_eq!(body["call_duration"], 60);
    assert_eq!(body["call_date"], 10_000);
}

#[tokio::test]
async fn test_interrupted_delivery_recovers_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("calllog.db");
    let record = outgoing_call();

    {
        let db = Database::open(&path).unwrap();
        db.migrate().unwrap();
        let queue = SyncQueue::open(Arc::new(db)).unwrap();
        queue.enqueue(&record).unwrap();
        // Claimed, then the process dies before a response
        assert!(queue.claim_next().unwrap().is_some());
    }

    let (url, endpoint, _shutdown) = spawn_endpoint(&[]).await;
    let db = Database::open(&path).unwrap();
    db.migrate().unwrap();
    let db = Arc::new(db);
    let queue = SyncQueue::open(db.clone()).unwrap();
    assert_eq!(
        queue.record(&record.id).unwrap().unwrap().sync_status,
        SyncStatus::Pending
    );

    let settings = Settings::new(db);
    settings.set_endpoint_url(&url).unwrap();
    let worker = DeliveryWorker::new(queue.clone(), settings, &fast_config()).unwrap();
    assert!(matches!(
        worker.run_once().await.unwrap(),
        CycleOutcome::Synced { .. }
    ));
    assert_eq!(endpoint.bodies().len(), 1);
}
