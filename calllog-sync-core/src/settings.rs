//! Endpoint URL setting
//!
//! The endpoint is the one mutable setting. It is stored in the `settings`
//! table under [`ENDPOINT_KEY`], validated when written, and read fresh from
//! the database by the delivery worker before every attempt, so an update
//! made by another process takes effect on the next delivery.

use std::sync::Arc;

use reqwest::Url;

use crate::db::Database;
use crate::error::{Error, Result};
use crate::queue::now_ms;

/// Settings key holding the endpoint URL
pub const ENDPOINT_KEY: &str = "api_url";

const INVALID_ENDPOINT_MESSAGE: &str = "Please enter a valid API URL";

/// Handle to the persisted endpoint setting.
#[derive(Clone)]
pub struct Settings {
    db: Arc<Database>,
}

impl Settings {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The stored endpoint URL, if one has been saved
    pub fn endpoint_url(&self) -> Result<Option<String>> {
        self.db.get_setting(ENDPOINT_KEY)
    }

    /// Validate and store a user-supplied endpoint URL.
    ///
    /// Returns the value actually stored (trimmed).
    pub fn set_endpoint_url(&self, input: &str) -> Result<String> {
        let url = validate_endpoint(input)?;
        self.db.set_setting(ENDPOINT_KEY, &url, now_ms())?;
        tracing::info!(endpoint = %url, "Endpoint URL saved");
        Ok(url)
    }
}

/// Check that `input` is a usable http(s) URL, returning it trimmed.
pub fn validate_endpoint(input: &str) -> Result<String> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidEndpoint(INVALID_ENDPOINT_MESSAGE.to_string()));
    }

    let url = Url::parse(trimmed)
        .map_err(|e| Error::InvalidEndpoint(format!("{} ({})", INVALID_ENDPOINT_MESSAGE, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(trimmed.to_string()),
        other => Err(Error::InvalidEndpoint(format!(
            "{} (unsupported scheme: {})",
            INVALID_ENDPOINT_MESSAGE, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> Settings {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Settings::new(Arc::new(db))
    }

    #[test]
    fn test_empty_endpoint_rejected() {
        let settings = test_settings();
        let err = settings.set_endpoint_url("   ").unwrap_err();
        assert_eq!(err.to_string(), "Please enter a valid API URL");
        assert!(settings.endpoint_url().unwrap().is_none());
    }

    #[test]
    fn test_non_http_endpoint_rejected() {
        assert!(matches!(
            validate_endpoint("ftp://example.com/calls"),
            Err(Error::InvalidEndpoint(_))
        ));
        assert!(matches!(
            validate_endpoint("not a url"),
            Err(Error::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_endpoint_is_trimmed_and_replaceable() {
        let settings = test_settings();
        let stored = settings
            .set_endpoint_url("  https://api.example.com/calls \n")
            .unwrap();
        assert_eq!(stored, "https://api.example.com/calls");

        settings.set_endpoint_url("http://10.0.0.2:8080/hook").unwrap();
        assert_eq!(
            settings.endpoint_url().unwrap().as_deref(),
            Some("http://10.0.0.2:8080/hook")
        );
    }
}
