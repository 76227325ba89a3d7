//! AMQP integration for the relay
//!
//! This module handles the broker connection, the fan-out exchange
//! publisher and the per-instance event stream consumer.

pub mod connection;
pub mod handlers;
pub mod messages;
pub mod publisher;

// Re-export commonly used types
pub use connection::{AmqpConfig, AmqpConnection};
pub use handlers::{EventStreamConsumer, MessageHandler};
pub use messages::*;
pub use publisher::{
    AmqpEventPublisher, DiscardingEventPublisher, EventPublisher, InMemoryEventPublisher,
};
