//! Wire body for the endpoint POST
//!
//! ```json
//! {"mobile_number": "555-1234", "call_date": 1700000000000, "call_type": "OUTGOING", "call_duration": 30}
//! ```

use serde::Serialize;

use crate::types::{CallDirection, CallRecord};

/// Request body for `POST {endpoint_url}`
#[derive(Debug, Serialize)]
pub struct DeliveryPayload<'a> {
    pub mobile_number: &'a str,
    /// Call start, epoch milliseconds
    pub call_date: i64,
    pub call_type: CallDirection,
    /// Seconds
    pub call_duration: u32,
}

impl<'a> DeliveryPayload<'a> {
    pub fn from_record(record: &'a CallRecord) -> Self {
        Self {
            mobile_number: &record.phone_number,
            call_date: record.timestamp,
            call_type: record.direction,
            call_duration: record.duration_sec,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_shape() {
        let record = CallRecord::new(
            "555-1234",
            Some("Alice".to_string()),
            CallDirection::Outgoing,
            1_700_000_000_000,
            30,
        );
        let body = serde_json::to_string(&DeliveryPayload::from_record(&record)).unwrap();
        assert_eq!(
            body,
            r#"{"mobile_number":"555-1234","call_date":1700000000000,"call_type":"OUTGOING","call_duration":30}"#
        );
    }
}
