//! Health checks for the relay
//!
//! A check combines the service's running flag with the state of the
//! components it depends on (currently the broker connection).

use crate::amqp::connection::AmqpConnection;
use crate::config::ServiceMode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Value exported through the health status gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 2,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 0,
        }
    }

    fn worst(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
}

impl ComponentCheck {
    pub fn healthy(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Healthy,
            message: None,
        }
    }

    pub fn unhealthy(name: &str, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: HealthStatus::Unhealthy,
            message: Some(message.into()),
        }
    }
}

/// A dependency whose state feeds the health check
pub trait ComponentProbe: Send + Sync {
    fn check(&self) -> ComponentCheck;
}

impl ComponentProbe for AmqpConnection {
    fn check(&self) -> ComponentCheck {
        if self.is_alive() {
            ComponentCheck::healthy("amqp")
        } else {
            ComponentCheck::unhealthy("amqp", "connection closed")
        }
    }
}

/// Everything a health check looks at
#[derive(Clone)]
pub struct HealthContext {
    service: String,
    mode: ServiceMode,
    is_running: Arc<RwLock<bool>>,
    probes: Vec<Arc<dyn ComponentProbe>>,
}

impl HealthContext {
    pub fn new(service: &str, mode: ServiceMode, is_running: Arc<RwLock<bool>>) -> Self {
        Self {
            service: service.to_string(),
            mode,
            is_running,
            probes: Vec::new(),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn ComponentProbe>) -> Self {
        self.probes.push(probe);
        self
    }

    pub fn mode(&self) -> ServiceMode {
        self.mode
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub mode: ServiceMode,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
}

impl HealthCheck {
    /// Perform a full health check of the service
    pub async fn check(context: &HealthContext) -> Self {
        let mut checks = Vec::with_capacity(context.probes.len() + 1);

        if *context.is_running.read().await {
            checks.push(ComponentCheck::healthy("service"));
        } else {
            checks.push(ComponentCheck::unhealthy("service", "not running"));
        }
        checks.extend(context.probes.iter().map(|probe| probe.check()));

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));
        debug!("Health check completed: {}", status);

        HealthCheck {
            status,
            service: context.service.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            mode: context.mode,
            timestamp: chrono::Utc::now(),
            checks,
        }
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(context: &HealthContext) -> HealthStatus {
        if *context.is_running.read().await {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(ComponentCheck);

    impl ComponentProbe for FixedProbe {
        fn check(&self) -> ComponentCheck {
            self.0.clone()
        }
    }

    fn context(running: bool) -> HealthContext {
        HealthContext::new(
            "killfeed-relay",
            ServiceMode::Crawler,
            Arc::new(RwLock::new(running)),
        )
    }

    #[tokio::test]
    async fn test_running_service_is_healthy() {
        let health = HealthCheck::check(&context(true)).await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.service, "killfeed-relay");
        assert_eq!(health.checks.len(), 1);
    }

    #[tokio::test]
    async fn test_stopped_service_is_unhealthy() {
        let ctx = context(false);
        assert_eq!(HealthCheck::check(&ctx).await.status, HealthStatus::Unhealthy);
        assert_eq!(HealthCheck::liveness_check(&ctx).await, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_worst_component_wins() {
        let degraded = ComponentCheck {
            name: "source".to_string(),
            status: HealthStatus::Degraded,
            message: None,
        };
        let ctx = context(true).with_probe(Arc::new(FixedProbe(degraded)));
        assert_eq!(HealthCheck::check(&ctx).await.status, HealthStatus::Degraded);

        let ctx = ctx.with_probe(Arc::new(FixedProbe(ComponentCheck::unhealthy(
            "amqp",
            "connection closed",
        ))));
        let health = HealthCheck::check(&ctx).await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.checks.len(), 3);
        assert_eq!(HealthCheck::liveness_check(&ctx).await, HealthStatus::Healthy);
    }

    #[test]
    fn test_gauge_values() {
        assert_eq!(HealthStatus::Healthy.as_gauge(), 2);
        assert_eq!(HealthStatus::Degraded.as_gauge(), 1);
        assert_eq!(HealthStatus::Unhealthy.as_gauge(), 0);
    }
}
