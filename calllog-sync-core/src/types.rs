//! Core domain types for calllog-sync
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **CallRecord** | One call as stored in the durable queue, with its delivery status |
//! | **CallEnded** | The fact emitted when a call transitions back to idle |
//! | **CallStateChange** | A raw call-state transition reported by the telephony layer |
//! | **Direction** | Incoming, outgoing, or missed |
//!
//! A record's `id` is derived from the phone number and start time, so the same
//! call observed twice (a live event and a later call-log rescan reporting the
//! same start time) maps to the same row.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ============================================
// Direction
// ============================================

/// Call direction as reported to the endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallDirection {
    Incoming,
    Outgoing,
    Missed,
}

impl CallDirection {
    /// Wire and storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            CallDirection::Incoming => "INCOMING",
            CallDirection::Outgoing => "OUTGOING",
            CallDirection::Missed => "MISSED",
        }
    }
}

impl std::str::FromStr for CallDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INCOMING" => Ok(CallDirection::Incoming),
            "OUTGOING" => Ok(CallDirection::Outgoing),
            "MISSED" => Ok(CallDirection::Missed),
            _ => Err(format!("unknown call direction: {}", s)),
        }
    }
}

impl std::fmt::Display for CallDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

// ============================================
// Sync status
// ============================================

/// Delivery status of a record
///
/// `Synced` and `FailedPermanent` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    InFlight,
    Synced,
    FailedPermanent,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::InFlight => "in_flight",
            SyncStatus::Synced => "synced",
            SyncStatus::FailedPermanent => "failed_permanent",
        }
    }

    /// Whether no further transition can happen from this status
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncStatus::Synced | SyncStatus::FailedPermanent)
    }
}

impl std::str::FromStr for SyncStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SyncStatus::Pending),
            "in_flight" => Ok(SyncStatus::InFlight),
            "synced" => Ok(SyncStatus::Synced),
            "failed_permanent" => Ok(SyncStatus::FailedPermanent),
            _ => Err(format!("unknown sync status: {}", s)),
        }
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

// ============================================
// CallRecord
// ============================================

/// A call held in the durable queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Stable id derived from (phone_number, timestamp)
    pub id: String,
    /// Cached contact name, if the source knew one
    pub contact_name: Option<String>,
    /// Far-end number as reported by the source (not normalized)
    pub phone_number: String,
    pub direction: CallDirection,
    /// Call start time, epoch milliseconds
    pub timestamp: i64,
    /// Talk time in seconds; 0 for missed calls
    pub duration_sec: u32,
    pub sync_status: SyncStatus,
    /// Number of times a transient failure re-queued this record
    pub attempt_count: u32,
    /// Epoch ms before which the record may not be claimed
    pub next_attempt_at: i64,
    /// Most recent delivery failure, for display
    pub last_error: Option<String>,
    /// Epoch ms of the last state transition
    pub updated_at: i64,
}

impl CallRecord {
    /// Create a new pending record with a derived id.
    pub fn new(
        phone_number: impl Into<String>,
        contact_name: Option<String>,
        direction: CallDirection,
        timestamp: i64,
        duration_sec: u32,
    ) -> Self {
        let phone_number = phone_number.into();
        let duration_sec = match direction {
            CallDirection::Missed => 0,
            _ => duration_sec,
        };
        Self {
            id: record_id(&phone_number, timestamp),
            contact_name: contact_name.filter(|name| !name.trim().is_empty()),
            phone_number,
            direction,
            timestamp,
            duration_sec,
            sync_status: SyncStatus::Pending,
            attempt_count: 0,
            next_attempt_at: 0,
            last_error: None,
            updated_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Build a pending record from a call-ended fact.
    pub fn from_call_ended(event: &CallEnded) -> Self {
        Self::new(
            event.number.clone(),
            None,
            event.direction,
            event.timestamp_ms,
            event.duration_sec,
        )
    }

    /// Name shown in lists: contact name, falling back to the number
    pub fn display_name(&self) -> &str {
        self.contact_name.as_deref().unwrap_or(&self.phone_number)
    }
}

/// Deterministic record id: 32 hex chars of SHA-256 over `number|timestamp`.
pub fn record_id(phone_number: &str, timestamp: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(phone_number.as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.to_string().as_bytes());
    let hash = hasher.finalize();
    hex::encode(&hash[..16])
}

// ============================================
// Call-state signal
// ============================================

/// Telephony call state, as reported by the OS signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    Idle,
    Ringing,
    OffHook,
}

/// One transition of the call-state signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallStateChange {
    pub state: CallState,
    /// Far-end number, empty when the platform withholds it
    #[serde(default)]
    pub number: String,
    /// When the transition was observed, epoch milliseconds
    pub at_ms: i64,
}

/// Emitted when a call transitions back to idle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallEnded {
    pub number: String,
    /// Call start, epoch milliseconds
    pub timestamp_ms: i64,
    pub direction: CallDirection,
    pub duration_sec: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id_is_deterministic() {
        let a = record_id("555-1234", 1_700_000_000_000);
        let b = record_id("555-1234", 1_700_000_000_000);
        let c = record_id("555-1234", 1_700_000_000_001);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_missed_call_has_zero_duration() {
        let record = CallRecord::new("555", None, CallDirection::Missed, 10, 42);
        assert_eq!(record.duration_sec, 0);
        assert_eq!(record.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_display_name_falls_back_to_number() {
        let named = CallRecord::new(
            "555",
            Some("Alice".to_string()),
            CallDirection::Incoming,
            1,
            5,
        );
        let blank = CallRecord::new("555", Some("  ".to_string()), CallDirection::Incoming, 2, 5);
        assert_eq!(named.display_name(), "Alice");
        assert_eq!(blank.display_name(), "555");
    }

    #[test]
    fn test_status_roundtrip_and_terminal() {
        for status in [
            SyncStatus::Pending,
            SyncStatus::InFlight,
            SyncStatus::Synced,
            SyncStatus::FailedPermanent,
        ] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!(SyncStatus::Synced.is_terminal());
        assert!(SyncStatus::FailedPermanent.is_terminal());
        assert!(!SyncStatus::InFlight.is_terminal());
    }

    #[test]
    fn test_call_state_change_json() {
        let change: CallStateChange =
            serde_json::from_str(r#"{"state":"OFF_HOOK","number":"555","at_ms":5}"#).unwrap();
        assert_eq!(change.state, CallState::OffHook);
        assert_eq!(change.number, "555");
    }
}
