//! Error types for the relay
//!
//! Domain failures are described by [`RelayError`]; everything is carried
//! through `anyhow` so call sites can add context with `?`.

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Custom error types for specific relay scenarios
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("AMQP connection failed: {message}")]
    AmqpConnectionFailed { message: String },

    #[error("Failed to publish event {event_id}: {message}")]
    PublishFailed { event_id: u64, message: String },

    #[error("Events API request failed at offset {offset}: {message}")]
    SourceFetchFailed { offset: u32, message: String },

    #[error("Invalid event payload: {reason}")]
    InvalidPayload { reason: String },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Delivery to guild {guild} failed: {message}")]
    DeliveryFailed { guild: String, message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl RelayError {
    /// Whether this error represents an elapsed time budget
    pub fn is_timeout(&self) -> bool {
        matches!(self, RelayError::Timeout { .. })
    }
}

/// Check whether an `anyhow` error wraps a [`RelayError::Timeout`]
pub fn is_timeout(error: &anyhow::Error) -> bool {
    error
        .downcast_ref::<RelayError>()
        .map(RelayError::is_timeout)
        .unwrap_or(false)
}
