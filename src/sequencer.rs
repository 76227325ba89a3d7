//! Sequencing and deduplication of polled events
//!
//! The [`Sequencer`] is the single owner of the high-water mark. Each cycle
//! it asks the poller for events newer than the mark, orders them
//! oldest-first and hands them to the publisher one by one.

use crate::amqp::publisher::EventPublisher;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::source::poller::{Fetched, SourcePoller};
use crate::types::{EventId, RawEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Highest event id already handed to the publisher
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HighWaterMark(Option<EventId>);

impl HighWaterMark {
    /// The "nothing seen yet" sentinel
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(event_id: EventId) -> Self {
        Self(Some(event_id))
    }

    pub fn get(&self) -> Option<EventId> {
        self.0
    }

    pub fn is_set(&self) -> bool {
        self.0.is_some()
    }

    /// Whether an event with this id is newer than the mark
    pub fn admits(&self, event_id: EventId) -> bool {
        self.0.map_or(true, |mark| event_id > mark)
    }

    /// Move the mark forward; never moves it back
    pub fn advance_to(&mut self, event_id: EventId) {
        if self.admits(event_id) {
            self.0 = Some(event_id);
        }
    }
}

impl std::fmt::Display for HighWaterMark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(event_id) => write!(f, "{}", event_id),
            None => write!(f, "none"),
        }
    }
}

/// When the mark moves relative to publishing a batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkerPolicy {
    /// Advance to the batch head before publishing. A publish failure part
    /// way through loses the unpublished tail of the batch.
    #[default]
    AdvanceBeforePublish,
    /// Advance only past events whose publish call succeeded. A failed tail
    /// is fetched again next cycle.
    AdvanceAfterPublish,
}

impl std::str::FromStr for MarkerPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "advance_before_publish" | "before" => Ok(MarkerPolicy::AdvanceBeforePublish),
            "advance_after_publish" | "after" => Ok(MarkerPolicy::AdvanceAfterPublish),
            other => Err(format!("Unknown marker policy: {}", other)),
        }
    }
}

/// What a poll cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Cold start: the mark was placed (if the source had anything), nothing published
    Seeded { marker: Option<EventId> },
    NoNewEvents,
    Published { count: usize, marker: EventId },
}

impl CycleOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            CycleOutcome::Seeded { .. } => "seeded",
            CycleOutcome::NoNewEvents => "empty",
            CycleOutcome::Published { .. } => "published",
        }
    }
}

/// Order a newest-first batch for publishing.
///
/// Drops anything at or below the mark and duplicate ids (live pagination
/// can repeat items across pages), then sorts oldest-first.
pub fn order_batch(batch: Vec<RawEvent>, marker: &HighWaterMark) -> Vec<RawEvent> {
    let mut ordered: Vec<RawEvent> = batch
        .into_iter()
        .filter(|event| marker.admits(event.event_id))
        .collect();
    ordered.sort_by_key(|event| event.event_id);
    ordered.dedup_by_key(|event| event.event_id);
    ordered
}

/// Owns the high-water mark and drives poll cycles
pub struct Sequencer {
    poller: SourcePoller,
    publisher: Arc<dyn EventPublisher>,
    marker: HighWaterMark,
    policy: MarkerPolicy,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Sequencer {
    pub fn new(poller: SourcePoller, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            poller,
            publisher,
            marker: HighWaterMark::none(),
            policy: MarkerPolicy::default(),
            metrics: None,
        }
    }

    pub fn with_policy(mut self, policy: MarkerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Start from a known mark instead of a cold start
    pub fn with_marker(mut self, marker: HighWaterMark) -> Self {
        self.marker = marker;
        self
    }

    pub fn marker(&self) -> HighWaterMark {
        self.marker
    }

    pub fn policy(&self) -> MarkerPolicy {
        self.policy
    }

    /// Run one poll cycle: fetch, order, publish
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome> {
        let result = self.cycle().await;

        if let Some(metrics) = &self.metrics {
            let label = match &result {
                Ok(outcome) => outcome.as_label(),
                Err(_) => "failed",
            };
            metrics.record_poll_cycle(label);
            if let Some(mark) = self.marker.get() {
                metrics.set_high_water_mark(mark);
            }
        }

        result
    }

    async fn cycle(&mut self) -> Result<CycleOutcome> {
        if self.marker.is_set() {
            info!("Fetching events up to event {}", self.marker);
        }

        let batch = match self.poller.fetch_new_since(&self.marker).await {
            Fetched::Seed(seed) => {
                let marker = seed.map(|event| event.event_id);
                if let Some(event_id) = marker {
                    self.marker.advance_to(event_id);
                    info!("Starting from event {}", event_id);
                } else {
                    info!("Events API returned nothing, still waiting for a first event");
                }
                return Ok(CycleOutcome::Seeded { marker });
            }
            Fetched::Batch(batch) => batch,
        };

        let ordered = order_batch(batch, &self.marker);
        let Some(newest) = ordered.last().map(|event| event.event_id) else {
            debug!("No new events");
            return Ok(CycleOutcome::NoNewEvents);
        };

        if self.policy == MarkerPolicy::AdvanceBeforePublish {
            self.marker.advance_to(newest);
        }

        self.publisher.declare_exchange().await?;

        for (index, event) in ordered.iter().enumerate() {
            if let Err(e) = self.publisher.publish_event(event).await {
                self.handle_publish_failure(&ordered, index);
                return Err(e);
            }
            if self.policy == MarkerPolicy::AdvanceAfterPublish {
                self.marker.advance_to(event.event_id);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.record_events_published(ordered.len());
        }

        info!(
            "Published {} events ({} to {})",
            ordered.len(),
            ordered[0].event_id,
            newest
        );
        Ok(CycleOutcome::Published {
            count: ordered.len(),
            marker: newest,
        })
    }

    fn handle_publish_failure(&self, ordered: &[RawEvent], failed_at: usize) {
        let failed_id = ordered[failed_at].event_id;
        if let Some(metrics) = &self.metrics {
            metrics.record_events_published(failed_at);
        }

        match self.policy {
            MarkerPolicy::AdvanceBeforePublish => {
                error!(
                    "Publishing failed at event {}; {} events up to {} will not be published",
                    failed_id,
                    ordered.len() - failed_at,
                    self.marker
                );
            }
            MarkerPolicy::AdvanceAfterPublish => {
                warn!(
                    "Publishing failed at event {}; marker held at {}, the remaining {} events will be fetched again",
                    failed_id,
                    self.marker,
                    ordered.len() - failed_at
                );
            }
        }
    }
}
