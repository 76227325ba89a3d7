//! AMQP event publisher for the fan-out exchange

use crate::amqp::messages::{
    EventCodec, EMPTY_ROUTING_KEY, EVENTS_EXCHANGE, FANOUT_EXCHANGE_TYPE, JSON_CONTENT_TYPE,
};
use crate::error::{RelayError, Result};
use crate::types::{EventId, RawEvent};
use amqprs::{
    channel::{BasicPublishArguments, Channel, ExchangeDeclareArguments},
    BasicProperties,
};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info};

/// Trait for publishing events to the exchange
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Ensure the exchange exists; safe to call repeatedly
    async fn declare_exchange(&self) -> Result<()>;

    /// Publish one event as one message
    async fn publish_event(&self, event: &RawEvent) -> Result<()>;
}

/// Configuration for event publishing
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub exchange: String,
    pub publish_timeout_ms: u64,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            exchange: EVENTS_EXCHANGE.to_string(),
            publish_timeout_ms: 5000,
        }
    }
}

/// AMQP-based event publisher implementation
pub struct AmqpEventPublisher {
    channel: Channel,
    config: PublisherConfig,
}

impl AmqpEventPublisher {
    /// Create a new event publisher and declare its exchange
    pub async fn new(channel: Channel, config: PublisherConfig) -> Result<Self> {
        let publisher = Self { channel, config };
        publisher.declare_exchange().await?;
        info!(
            "Event publisher ready on exchange '{}'",
            publisher.config.exchange
        );
        Ok(publisher)
    }

    pub fn exchange(&self) -> &str {
        &self.config.exchange
    }
}

#[async_trait]
impl EventPublisher for AmqpEventPublisher {
    async fn declare_exchange(&self) -> Result<()> {
        // Live feed: nothing needs to survive a broker restart
        let args = ExchangeDeclareArguments::new(&self.config.exchange, FANOUT_EXCHANGE_TYPE)
            .durable(false)
            .finish();

        self.channel.exchange_declare(args).await.map_err(|e| {
            RelayError::AmqpConnectionFailed {
                message: format!(
                    "Failed to declare exchange '{}': {}",
                    self.config.exchange, e
                ),
            }
        })?;

        Ok(())
    }

    async fn publish_event(&self, event: &RawEvent) -> Result<()> {
        let payload = EventCodec::encode(event)?;

        let args = BasicPublishArguments::new(&self.config.exchange, EMPTY_ROUTING_KEY);
        let mut properties = BasicProperties::default();
        properties
            .with_message_id(&event.event_id.to_string())
            .with_timestamp(crate::utils::unix_timestamp() as u64)
            .with_content_type(JSON_CONTENT_TYPE);

        let publish_timeout = Duration::from_millis(self.config.publish_timeout_ms);
        timeout(
            publish_timeout,
            self.channel.basic_publish(properties, payload, args),
        )
        .await
        .map_err(|_| RelayError::Timeout {
            operation: format!("publish of event {}", event.event_id),
            timeout_ms: self.config.publish_timeout_ms,
        })?
        .map_err(|e| RelayError::PublishFailed {
            event_id: event.event_id,
            message: e.to_string(),
        })?;

        debug!(
            "Published event {} to exchange '{}'",
            event.event_id, self.config.exchange
        );
        Ok(())
    }
}

/// Publisher that drops every event after logging it; used by dry runs
#[derive(Debug, Default)]
pub struct DiscardingEventPublisher {
    discarded: std::sync::atomic::AtomicU64,
    newest: std::sync::atomic::AtomicU64,
}

impl DiscardingEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many events were accepted and dropped
    pub fn discarded(&self) -> u64 {
        self.discarded.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Newest event id seen, zero before the first publish
    pub fn newest(&self) -> EventId {
        self.newest.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[async_trait]
impl EventPublisher for DiscardingEventPublisher {
    async fn declare_exchange(&self) -> Result<()> {
        Ok(())
    }

    async fn publish_event(&self, event: &RawEvent) -> Result<()> {
        self.discarded
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.newest
            .fetch_max(event.event_id, std::sync::atomic::Ordering::Relaxed);
        debug!("Dry run: dropping event {}", event.event_id);
        Ok(())
    }
}

/// In-memory publisher that records what would have been sent.
/// Keeps every event, so it is meant for tests.
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    published: std::sync::Mutex<Vec<RawEvent>>,
    declarations: std::sync::atomic::AtomicUsize,
    fail_on: Option<EventId>,
}

impl InMemoryEventPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// A publisher whose publish call fails for the given event id
    pub fn failing_on(event_id: EventId) -> Self {
        Self {
            fail_on: Some(event_id),
            ..Self::default()
        }
    }

    /// All published events, in publish order
    pub fn published(&self) -> Vec<RawEvent> {
        self.published
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Published event ids, in publish order
    pub fn published_ids(&self) -> Vec<EventId> {
        self.published().iter().map(|event| event.event_id).collect()
    }

    /// How many times the exchange was declared
    pub fn declarations(&self) -> usize {
        self.declarations.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn declare_exchange(&self) -> Result<()> {
        self.declarations
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Ok(())
    }

    async fn publish_event(&self, event: &RawEvent) -> Result<()> {
        if self.fail_on == Some(event.event_id) {
            return Err(RelayError::PublishFailed {
                event_id: event.event_id,
                message: "injected failure".to_string(),
            }
            .into());
        }

        if let Ok(mut events) = self.published.lock() {
            events.push(event.clone());
        }
        Ok(())
    }
}
