//! Source poller
//!
//! Pages backward from the newest event until it reaches the last event it
//! already knows about, or until a depth ceiling bounds the cost of a cycle.
//! Transient fetch errors never end a cycle: the same page is retried after
//! a fixed backoff, so nothing is skipped or counted twice.

use crate::metrics::MetricsCollector;
use crate::sequencer::HighWaterMark;
use crate::source::client::EventSource;
use crate::types::{EventId, RawEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Paging and retry policy for the poller
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Events requested per page
    pub page_limit: u32,
    /// Offset at which paging stops even if the marker was not reached
    pub max_offset: u32,
    /// Wait between attempts at the same page
    pub retry_backoff: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            page_limit: 51,
            max_offset: 1000,
            retry_backoff: Duration::from_secs(5),
        }
    }
}

/// Result of one fetch
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    /// Cold start: the single newest event, used only to place the marker
    Seed(Option<RawEvent>),
    /// Events newer than the marker, newest-first
    Batch(Vec<RawEvent>),
}

/// Polls the events API for events newer than a marker
pub struct SourcePoller {
    source: Arc<dyn EventSource>,
    config: PollerConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SourcePoller {
    pub fn new(source: Arc<dyn EventSource>, config: PollerConfig) -> Self {
        Self {
            source,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Fetch everything newer than `marker`.
    ///
    /// Without a marker only the newest event is requested, so a cold start
    /// begins recording from now instead of replaying history.
    pub async fn fetch_new_since(&self, marker: &HighWaterMark) -> Fetched {
        match marker.get() {
            None => {
                info!("No marker yet, fetching the latest event to start from");
                let page = self.fetch_page_with_retry(0, 1).await;
                Fetched::Seed(page.into_iter().next())
            }
            Some(last_seen) => {
                debug!("Fetching events newer than {}", last_seen);
                Fetched::Batch(self.fetch_until(last_seen).await)
            }
        }
    }

    async fn fetch_until(&self, last_seen: EventId) -> Vec<RawEvent> {
        let limit = self.config.page_limit.max(1);
        let mut events = Vec::new();
        let mut offset = 0;

        while offset < self.config.max_offset {
            let page = self.fetch_page_with_retry(offset, limit).await;
            if page.is_empty() {
                debug!("Empty page at offset {}, source exhausted", offset);
                return events;
            }

            for event in page {
                if event.event_id <= last_seen {
                    debug!(
                        "Reached known event {} at offset {}, {} new events",
                        event.event_id,
                        offset,
                        events.len()
                    );
                    return events;
                }
                events.push(event);
            }

            offset = offset.saturating_add(limit);
        }

        warn!(
            "Depth ceiling reached at offset {} without finding event {}, keeping {} events",
            offset,
            last_seen,
            events.len()
        );
        events
    }

    /// Fetch one page, retrying the same offset until it succeeds
    async fn fetch_page_with_retry(&self, offset: u32, limit: u32) -> Vec<RawEvent> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.source.fetch_page(offset, limit).await {
                Ok(page) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_fetch(true);
                    }
                    return page;
                }
                Err(e) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_fetch(false);
                    }
                    warn!(
                        "Unable to fetch events at offset {} (attempt {}): {}. Retrying in {:?}",
                        offset, attempt, e, self.config.retry_backoff
                    );
                    sleep(self.config.retry_backoff).await;
                }
            }
        }
    }
}
