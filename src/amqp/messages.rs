//! AMQP exchange names and event serialization

use crate::error::{RelayError, Result};
use crate::types::RawEvent;

/// Fan-out exchange carrying kill events
pub const EVENTS_EXCHANGE: &str = "events";

/// Exchange type used for every event category
pub const FANOUT_EXCHANGE_TYPE: &str = "fanout";

/// Fan-out exchanges ignore routing keys
pub const EMPTY_ROUTING_KEY: &str = "";

pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Serialization of events on the wire.
///
/// Events travel as the same self-describing JSON the events API returns, so
/// consumers see field names, not positions.
pub struct EventCodec;

impl EventCodec {
    /// Serialize an event to JSON bytes
    pub fn encode(event: &RawEvent) -> Result<Vec<u8>> {
        serde_json::to_vec(event).map_err(|e| {
            RelayError::InvalidPayload {
                reason: format!("Failed to serialize event {}: {}", event.event_id, e),
            }
            .into()
        })
    }

    /// Deserialize and validate an event from JSON bytes
    pub fn decode(bytes: &[u8]) -> Result<RawEvent> {
        let event: RawEvent =
            serde_json::from_slice(bytes).map_err(|e| RelayError::InvalidPayload {
                reason: format!("Failed to deserialize event: {}", e),
            })?;

        Self::validate(&event)?;
        Ok(event)
    }

    /// Reject events that cannot be ordered or attributed
    pub fn validate(event: &RawEvent) -> Result<()> {
        if event.event_id == 0 {
            return Err(RelayError::InvalidPayload {
                reason: "Event id cannot be zero".to_string(),
            }
            .into());
        }

        if event.killer.id.is_empty() || event.victim.id.is_empty() {
            return Err(RelayError::InvalidPayload {
                reason: format!("Event {} is missing killer or victim id", event.event_id),
            }
            .into());
        }

        Ok(())
    }
}
