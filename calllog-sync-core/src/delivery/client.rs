//! HTTP client for the call-event endpoint
//!
//! Sends one record per request and classifies the result. The client never
//! returns a transport failure as an error: every outcome is a
//! [`DeliveryOutcome`] the worker records against the record.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::error::{Error, Result};

use super::payload::DeliveryPayload;

/// Longest response body excerpt kept in `last_error`
const ERROR_BODY_LIMIT: usize = 200;

/// Result of a single delivery attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx: the endpoint accepted the record
    Delivered(StatusCode),
    /// 4xx: the endpoint will refuse this record every time
    Rejected(String),
    /// 5xx, timeout, or connection failure: worth retrying
    Transient(String),
}

/// How a response status is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    Permanent,
    Retryable,
}

/// Classify an HTTP status. Anything that is neither 2xx nor 4xx is retried.
pub fn classify_status(status: StatusCode) -> StatusClass {
    if status.is_success() {
        StatusClass::Success
    } else if status.is_client_error() {
        StatusClass::Permanent
    } else {
        StatusClass::Retryable
    }
}

/// HTTP client for endpoint delivery
pub struct DeliveryClient {
    http_client: reqwest::Client,
}

impl DeliveryClient {
    /// Create a client with a bounded per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Delivery(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }

    /// POST one payload to `endpoint` and classify the response.
    pub async fn send(&self, endpoint: &str, payload: &DeliveryPayload<'_>) -> DeliveryOutcome {
        let response = match self.http_client.post(endpoint).json(payload).send().await {
            Ok(response) => response,
            Err(e) => return DeliveryOutcome::Transient(describe_transport_error(&e)),
        };

        let status = response.status();
        match classify_status(status) {
            StatusClass::Success => DeliveryOutcome::Delivered(status),
            StatusClass::Permanent => {
                DeliveryOutcome::Rejected(format!("API error ({}): {}", status, body_excerpt(response).await))
            }
            StatusClass::Retryable => {
                DeliveryOutcome::Transient(format!("API error ({}): {}", status, body_excerpt(response).await))
            }
        }
    }
}

fn describe_transport_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        format!("request timed out: {}", error)
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        format!("HTTP request failed: {}", error)
    }
}

async fn body_excerpt(response: reqwest::Response) -> String {
    let text = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown".to_string());
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "empty response".to_string();
    }
    trimmed.chars().take(ERROR_BODY_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CallDirection, CallRecord};

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Success);
        assert_eq!(classify_status(StatusCode::NO_CONTENT), StatusClass::Success);
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), StatusClass::Permanent);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), StatusClass::Permanent);
        assert_eq!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR),
            StatusClass::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            StatusClass::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::MOVED_PERMANENTLY),
            StatusClass::Retryable
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let client = DeliveryClient::new(Duration::from_secs(2)).unwrap();
        let record = CallRecord::new("555", None, CallDirection::Incoming, 1, 1);
        // Port 1 is reserved and nothing listens on it
        let outcome = client
            .send("http://127.0.0.1:1/calls", &DeliveryPayload::from_record(&record))
            .await;
        assert!(matches!(outcome, DeliveryOutcome::Transient(_)), "{outcome:?}");
    }
}
