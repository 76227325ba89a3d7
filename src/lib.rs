//! Killfeed relay - game event fan-out to tracking communities
//!
//! This crate polls a paginated events API, deduplicates and orders the
//! events, broadcasts them through an AMQP fan-out exchange and, on the
//! consuming side, matches each event against per-community watchlists and
//! dispatches notifications under a bounded timeout.

pub mod amqp;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod filter;
pub mod metrics;
pub mod sequencer;
pub mod service;
pub mod source;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{RelayError, Result};
pub use types::*;

// Re-export key components
pub use amqp::publisher::EventPublisher;
pub use dispatch::{Dispatcher, Notifier};
pub use filter::classify;
pub use sequencer::{HighWaterMark, MarkerPolicy, Sequencer};
pub use source::{EventSource, SourcePoller};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
