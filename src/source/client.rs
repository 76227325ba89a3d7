//! Events API client
//!
//! The API is public, paginated and returns events newest-first.

use crate::error::{RelayError, Result};
use crate::types::RawEvent;
use crate::utils::unix_timestamp;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default endpoint of the game's events API
pub const DEFAULT_EVENTS_ENDPOINT: &str = "https://gameinfo.albiononline.com/api/gameinfo/events";

/// A paginated, newest-first source of events
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Fetch up to `limit` events starting `offset` items back from the newest
    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Vec<RawEvent>>;
}

/// HTTP client for the events API
#[derive(Clone)]
pub struct HttpEventSource {
    client: Client,
    endpoint: String,
}

impl HttpEventSource {
    /// Create a new client with the given per-request timeout
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| RelayError::ConfigurationError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
        })
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    #[instrument(skip(self))]
    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Vec<RawEvent>> {
        debug!("Fetching events from {} with offset {}", self.endpoint, offset);

        // The timestamp defeats intermediate caches on a live endpoint
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
                ("timestamp", unix_timestamp().to_string()),
            ])
            .send()
            .await
            .map_err(|e| RelayError::SourceFetchFailed {
                offset,
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::SourceFetchFailed {
                offset,
                message: format!("Events API error ({}): {}", status, body),
            }
            .into());
        }

        let events: Vec<RawEvent> =
            response
                .json()
                .await
                .map_err(|e| RelayError::SourceFetchFailed {
                    offset,
                    message: format!("Failed to parse events response: {}", e),
                })?;

        debug!("Fetched {} events at offset {}", events.len(), offset);
        Ok(events)
    }
}
