//! Utility functions for the relay

use chrono::Utc;
use std::time::Duration;
use uuid::Uuid;

/// Current time as unix seconds, used as a cache buster on API requests
pub fn unix_timestamp() -> i64 {
    Utc::now().timestamp()
}

/// Generate a unique consumer tag with the given prefix
pub fn generate_consumer_tag(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Duration in fractional milliseconds, for log lines
pub fn duration_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
