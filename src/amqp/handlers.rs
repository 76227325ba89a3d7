//! AMQP consumer for the event stream
//!
//! Every running instance binds its own anonymous, exclusive queue to the
//! fan-out exchange, so each replica receives every event (broadcast, not
//! competing consumers). Messages are handled one at a time and acknowledged
//! exactly once after the handler finishes, whether or not it succeeded.
//! Nothing is ever requeued.

use crate::amqp::messages::{EventCodec, EMPTY_ROUTING_KEY, FANOUT_EXCHANGE_TYPE};
use crate::error::{RelayError, Result};
use crate::metrics::MetricsCollector;
use crate::types::RawEvent;
use crate::utils::{duration_ms, generate_consumer_tag};
use amqprs::{
    channel::{
        BasicAckArguments, BasicCancelArguments, BasicConsumeArguments, BasicQosArguments,
        Channel, ExchangeDeclareArguments, QueueBindArguments, QueueDeclareArguments,
    },
    consumer::AsyncConsumer,
    BasicProperties, Deliver,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Messages pulled from the broker before the previous one is acknowledged
const PREFETCH_COUNT: u16 = 1;

/// Trait defining the interface for handling consumed events
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one event from the exchange
    async fn handle_event(&self, event: RawEvent) -> Result<()>;

    /// Handle a message that could not be processed
    async fn handle_error(&self, error: RelayError, message_data: &[u8]);
}

/// What happened to a single delivery before it was acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Handled,
    HandlerFailed,
    Undecodable,
}

impl DeliveryOutcome {
    pub fn as_label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Handled => "handled",
            DeliveryOutcome::HandlerFailed => "handler_failed",
            DeliveryOutcome::Undecodable => "undecodable",
        }
    }
}

/// Decode a delivery and run the handler on it. Never fails: every outcome
/// leads to an acknowledgement.
pub async fn process_delivery(handler: &dyn MessageHandler, content: &[u8]) -> DeliveryOutcome {
    let event = match EventCodec::decode(content) {
        Ok(event) => event,
        Err(e) => {
            warn!("Dropping undecodable message ({} bytes): {}", content.len(), e);
            handler
                .handle_error(
                    RelayError::InvalidPayload {
                        reason: e.to_string(),
                    },
                    content,
                )
                .await;
            return DeliveryOutcome::Undecodable;
        }
    };

    let event_id = event.event_id;
    match handler.handle_event(event).await {
        Ok(()) => DeliveryOutcome::Handled,
        Err(e) => {
            error!("Handler failed for event {}: {}", event_id, e);
            handler
                .handle_error(
                    RelayError::InternalError {
                        message: e.to_string(),
                    },
                    content,
                )
                .await;
            DeliveryOutcome::HandlerFailed
        }
    }
}

/// Consumer bound to the event fan-out exchange
pub struct EventStreamConsumer {
    handler: Arc<dyn MessageHandler>,
    channel: Channel,
    exchange: String,
    consumer_tag: String,
    metrics: Option<Arc<MetricsCollector>>,
}

impl EventStreamConsumer {
    /// Create a new consumer for the given exchange
    pub fn new(handler: Arc<dyn MessageHandler>, channel: Channel, exchange: &str) -> Self {
        Self {
            handler,
            channel,
            exchange: exchange.to_string(),
            consumer_tag: generate_consumer_tag("events-consumer"),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Declare the exchange and a private queue, bind them and start consuming.
    /// Returns the broker-generated queue name.
    pub async fn start_consuming(&self) -> Result<String> {
        let args = ExchangeDeclareArguments::new(&self.exchange, FANOUT_EXCHANGE_TYPE)
            .durable(false)
            .finish();
        self.channel
            .exchange_declare(args)
            .await
            .map_err(|e| RelayError::AmqpConnectionFailed {
                message: format!("Failed to declare exchange '{}': {}", self.exchange, e),
            })?;

        // Empty name: the broker picks one; the queue dies with this instance
        let args = QueueDeclareArguments::new("")
            .exclusive(true)
            .auto_delete(true)
            .finish();
        let (queue_name, _, _) = self
            .channel
            .queue_declare(args)
            .await
            .map_err(|e| RelayError::AmqpConnectionFailed {
                message: format!("Failed to declare consumer queue: {}", e),
            })?
            .ok_or_else(|| RelayError::AmqpConnectionFailed {
                message: "Broker did not return a queue name".to_string(),
            })?;

        let args = QueueBindArguments::new(&queue_name, &self.exchange, EMPTY_ROUTING_KEY);
        self.channel
            .queue_bind(args)
            .await
            .map_err(|e| RelayError::AmqpConnectionFailed {
                message: format!("Failed to bind queue {}: {}", queue_name, e),
            })?;

        self.channel
            .basic_qos(BasicQosArguments::new(0, PREFETCH_COUNT, false))
            .await
            .map_err(|e| RelayError::AmqpConnectionFailed {
                message: format!("Failed to set prefetch: {}", e),
            })?;

        let args = BasicConsumeArguments::new(&queue_name, &self.consumer_tag)
            .manual_ack(true)
            .finish();
        let consumer = EventConsumer {
            handler: self.handler.clone(),
            metrics: self.metrics.clone(),
        };
        self.channel
            .basic_consume(consumer, args)
            .await
            .map_err(|e| RelayError::AmqpConnectionFailed {
                message: format!("Failed to start consuming: {}", e),
            })?;

        info!(
            "Subscribed to exchange '{}' through queue '{}'",
            self.exchange, queue_name
        );
        Ok(queue_name)
    }

    /// Stop consuming messages
    pub async fn stop_consuming(&self) -> Result<()> {
        let args = BasicCancelArguments::new(&self.consumer_tag);

        self.channel
            .basic_cancel(args)
            .await
            .map_err(|e| RelayError::AmqpConnectionFailed {
                message: format!("Failed to stop consuming: {}", e),
            })?;

        info!("Stopped consuming events");
        Ok(())
    }
}

/// Internal consumer implementation
struct EventConsumer {
    handler: Arc<dyn MessageHandler>,
    metrics: Option<Arc<MetricsCollector>>,
}

#[async_trait]
impl AsyncConsumer for EventConsumer {
    async fn consume(
        &mut self,
        channel: &Channel,
        deliver: Deliver,
        _basic_properties: BasicProperties,
        content: Vec<u8>,
    ) {
        let delivery_tag = deliver.delivery_tag();
        debug!(
            "Event message received - delivery_tag: {}, size: {} bytes",
            delivery_tag,
            content.len()
        );

        let start_time = std::time::Instant::now();
        let outcome = process_delivery(self.handler.as_ref(), &content).await;
        let processing_time = start_time.elapsed();

        debug!(
            "Message {} - delivery_tag: {}, processing_time: {:.2}ms",
            outcome.as_label(),
            delivery_tag,
            duration_ms(processing_time)
        );

        if let Some(metrics) = &self.metrics {
            metrics.record_message_consumed(outcome.as_label(), processing_time);
        }

        if let Err(e) = channel
            .basic_ack(BasicAckArguments::new(delivery_tag, false))
            .await
        {
            error!("Failed to acknowledge delivery {}: {}", delivery_tag, e);
        }
    }
}

/// Handler that records every event it receives
pub struct RecordingMessageHandler {
    pub received: Arc<tokio::sync::Mutex<Vec<RawEvent>>>,
    pub errors: Arc<tokio::sync::Mutex<Vec<String>>>,
    fail: bool,
}

impl Default for RecordingMessageHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingMessageHandler {
    pub fn new() -> Self {
        Self {
            received: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            errors: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            fail: false,
        }
    }

    /// A handler that records events and then reports failure
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl MessageHandler for RecordingMessageHandler {
    async fn handle_event(&self, event: RawEvent) -> Result<()> {
        self.received.lock().await.push(event);
        if self.fail {
            return Err(anyhow::anyhow!("handler failure"));
        }
        Ok(())
    }

    async fn handle_error(&self, error: RelayError, _message_data: &[u8]) {
        self.errors.lock().await.push(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Participant;

    fn encoded_event(event_id: u64) -> Vec<u8> {
        let event = RawEvent {
            event_id,
            time_stamp: None,
            total_victim_kill_fame: 100,
            killer: Participant {
                id: "k".to_string(),
                ..Participant::default()
            },
            victim: Participant {
                id: "v".to_string(),
                ..Participant::default()
            },
            extra: Default::default(),
        };
        EventCodec::encode(&event).unwrap()
    }

    #[tokio::test]
    async fn test_valid_delivery_reaches_handler() {
        let handler = RecordingMessageHandler::new();
        let outcome = process_delivery(&handler, &encoded_event(9)).await;

        assert_eq!(outcome, DeliveryOutcome::Handled);
        let received = handler.received.lock().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].event_id, 9);
        assert!(handler.errors.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_delivery_is_reported_not_handled() {
        let handler = RecordingMessageHandler::new();
        let outcome = process_delivery(&handler, b"{broken").await;

        assert_eq!(outcome, DeliveryOutcome::Undecodable);
        assert!(handler.received.lock().await.is_empty());
        assert_eq!(handler.errors.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_handler_failure_is_contained() {
        let handler = RecordingMessageHandler::failing();
        let outcome = process_delivery(&handler, &encoded_event(9)).await;

        assert_eq!(outcome, DeliveryOutcome::HandlerFailed);
        assert_eq!(handler.received.lock().await.len(), 1);
        assert_eq!(handler.errors.lock().await.len(), 1);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(DeliveryOutcome::Handled.as_label(), "handled");
        assert_eq!(DeliveryOutcome::HandlerFailed.as_label(), "handler_failed");
        assert_eq!(DeliveryOutcome::Undecodable.as_label(), "undecodable");
    }
}
