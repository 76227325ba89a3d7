//! Health check endpoints and Prometheus metrics server
//!
//! This module provides HTTP endpoints for health checks and Prometheus
//! metrics for the relay using Axum.

use crate::metrics::collector::MetricsCollector;
use crate::service::health::{HealthCheck, HealthContext, HealthStatus};
use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthServerConfig {
    /// Port to bind the health server to
    pub port: u16,
    /// Host to bind to (typically "0.0.0.0" for all interfaces)
    pub host: String,
}

impl Default for HealthServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
        }
    }
}

/// Shared state for the health server
#[derive(Clone)]
pub struct HealthServerState {
    pub metrics_collector: Arc<MetricsCollector>,
    pub health: Option<HealthContext>,
}

/// Health server that provides HTTP endpoints for monitoring
pub struct HealthServer {
    config: HealthServerConfig,
    state: HealthServerState,
    shutdown_tx: broadcast::Sender<()>,
}

impl HealthServer {
    /// Create a new health server
    pub fn new(config: HealthServerConfig, metrics_collector: Arc<MetricsCollector>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            state: HealthServerState {
                metrics_collector,
                health: None,
            },
            shutdown_tx,
        }
    }

    /// Attach the context used by the health endpoints
    pub fn with_health_context(mut self, health: HealthContext) -> Self {
        self.state.health = Some(health);
        self
    }

    /// Start the health server
    pub async fn start(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.host, self.config.port)
            .parse()
            .context("Invalid health server address")?;

        let app = self.create_router();
        let listener = TcpListener::bind(addr).await?;

        info!("Health server listening on http://{}", addr);

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("Health server shutdown signal received");
            })
            .await?;

        info!("Health server stopped");
        Ok(())
    }

    /// Create the Axum router with all health endpoints
    fn create_router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/alive", get(alive_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self.state.clone())
    }

    /// Stop the health server
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping health server...");

        if let Err(e) = self.shutdown_tx.send(()) {
            warn!("Failed to send shutdown signal to health server: {}", e);
        }

        Ok(())
    }
}

/// Root endpoint handler - shows service information
async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ["/health", "/alive", "/metrics"]
    }))
}

/// Full health check endpoint handler
async fn health_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    debug!("Health check requested");

    match &state.health {
        Some(context) => {
            let health = HealthCheck::check(context).await;
            state
                .metrics_collector
                .update_health_status(health.status.as_gauge());

            let code = match health.status {
                HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
                HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            };
            (code, Json(json!(health)))
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "service": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
                "error": "Service not initialized"
            })),
        ),
    }
}

/// Liveness check endpoint handler
async fn alive_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    match &state.health {
        Some(context) => match HealthCheck::liveness_check(context).await {
            HealthStatus::Healthy => (StatusCode::OK, "Alive"),
            _ => (StatusCode::SERVICE_UNAVAILABLE, "Not alive"),
        },
        None => (StatusCode::SERVICE_UNAVAILABLE, "Service not initialized"),
    }
}

/// Prometheus metrics endpoint handler
async fn metrics_handler(State(state): State<HealthServerState>) -> impl IntoResponse {
    match encode_metrics(&state.metrics_collector) {
        Ok(output) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            output,
        ),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain".to_string())],
                "Failed to encode metrics".to_string(),
            )
        }
    }
}

/// Render every registered metric in the Prometheus text format
pub fn encode_metrics(metrics_collector: &MetricsCollector) -> Result<String> {
    let metric_families = metrics_collector.registry().gather();
    let encoder = TextEncoder::new();

    encoder
        .encode_to_string(&metric_families)
        .map_err(|e| anyhow::anyhow!("Failed to encode metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceMode;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tokio::sync::RwLock;
    use tower::ServiceExt; // for oneshot

    fn server() -> HealthServer {
        let collector = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
        HealthServer::new(HealthServerConfig::default(), collector)
    }

    async fn status_of(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_root_endpoint() {
        let app = server().create_router();
        assert_eq!(status_of(app, "/").await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let collector = Arc::new(MetricsCollector::new().expect("Failed to create collector"));
        collector.record_events_published(2);
        collector.update_health_status(2);

        let server = HealthServer::new(HealthServerConfig::default(), collector.clone());
        let app = server.create_router();

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers().get("content-type").unwrap();
        assert!(content_type.to_str().unwrap().contains("text/plain"));

        let text = encode_metrics(&collector).unwrap();
        assert!(text.contains("killfeed_events_published_total 2"));
    }

    #[tokio::test]
    async fn test_health_endpoints_without_context() {
        let app = server().create_router();
        assert_eq!(
            status_of(app.clone(), "/health").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(app, "/alive").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn test_health_endpoints_follow_running_flag() {
        let is_running = Arc::new(RwLock::new(true));
        let context = HealthContext::new("killfeed-relay", ServiceMode::Bot, is_running.clone());
        let app = server().with_health_context(context).create_router();

        assert_eq!(status_of(app.clone(), "/health").await, StatusCode::OK);
        assert_eq!(status_of(app.clone(), "/alive").await, StatusCode::OK);

        *is_running.write().await = false;
        assert_eq!(
            status_of(app.clone(), "/health").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(app, "/alive").await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_health_server_config() {
        let config = HealthServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "0.0.0.0");
    }

    #[tokio::test]
    async fn test_404_handling() {
        let app = server().create_router();
        assert_eq!(status_of(app, "/nonexistent").await, StatusCode::NOT_FOUND);
    }
}
