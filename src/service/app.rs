//! Main application state and service coordination
//!
//! This module contains the AppState that wires the crawler (poller,
//! sequencer, publisher) and the bot side (consumer, dispatcher) together
//! according to the configured mode, and owns their background tasks.

use crate::amqp::connection::AmqpConnection;
use crate::amqp::handlers::{EventStreamConsumer, MessageHandler};
use crate::amqp::publisher::{
    AmqpEventPublisher, DiscardingEventPublisher, EventPublisher, PublisherConfig,
};
use crate::config::AppConfig;
use crate::dispatch::{
    DailyRanking, Dispatcher, FileConfigStore, LogNotifier, StaticGuildDirectory,
};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector, MetricsService};
use crate::sequencer::{CycleOutcome, Sequencer};
use crate::service::health::{HealthCheck, HealthContext, HealthStatus};
use crate::source::client::HttpEventSource;
use crate::source::poller::SourcePoller;
use anyhow::Result;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },
}

/// Startup switches that do not belong in the configuration file
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Run the crawler without a broker; polled events are only logged
    pub dry_run: bool,
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    options: RunOptions,

    /// Broker connection shared by publisher and consumer; absent in dry runs
    amqp_connection: Option<Arc<AmqpConnection>>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    /// Daily ranking fed by the dispatcher
    ranking: Arc<DailyRanking>,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// Exchange consumer in bot mode
    event_consumer: Option<EventStreamConsumer>,

    /// Service status
    is_running: Arc<RwLock<bool>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig, options: RunOptions) -> Result<Self, ServiceError> {
        info!(
            "Initializing {} in {} mode",
            config.service.name, config.service.mode
        );

        if options.dry_run && config.service.mode.runs_bot() {
            return Err(ServiceError::Configuration {
                message: "Dry run only supports crawler mode".to_string(),
            });
        }

        let amqp_connection = if options.dry_run {
            info!("Dry run: not connecting to the broker");
            None
        } else {
            Some(Self::initialize_amqp(&config).await?)
        };

        let is_running = Arc::new(RwLock::new(false));
        let metrics_service =
            Self::initialize_metrics(&config, amqp_connection.clone(), is_running.clone())?;

        Ok(Self {
            config,
            options,
            amqp_connection,
            metrics_service,
            ranking: Arc::new(DailyRanking::new()),
            background_tasks: Vec::new(),
            event_consumer: None,
            is_running,
        })
    }

    /// Start all background services and message consumption
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting {}", self.config.service.name);

        *self.is_running.write().await = true;

        self.start_metrics_service().await;

        if self.config.service.mode.runs_bot() {
            self.start_event_consumption().await?;
        }

        if self.config.service.mode.runs_crawler() {
            self.start_crawler().await?;
        }

        self.start_health_task();

        info!("✅ {} started", self.config.service.name);
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        *self.is_running.write().await = false;

        if let Some(consumer) = &self.event_consumer {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop event consumer: {}", e);
            } else {
                info!("✅ Event consumption stopped");
            }
        }

        self.stop_background_tasks().await;

        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        if let Some(connection) = self.amqp_connection.take() {
            if let Err(e) = connection.close().await {
                warn!("Failed to close AMQP connection: {}", e);
            } else {
                info!("✅ AMQP connection closed");
            }
        }

        info!("✅ {} shutdown completed", self.config.service.name);
        Ok(())
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    pub fn ranking(&self) -> Arc<DailyRanking> {
        self.ranking.clone()
    }

    /// Health context shared with the health endpoints
    pub fn health_context(&self) -> HealthContext {
        Self::build_health_context(
            &self.config,
            self.amqp_connection.clone(),
            self.is_running.clone(),
        )
    }

    fn build_health_context(
        config: &AppConfig,
        amqp_connection: Option<Arc<AmqpConnection>>,
        is_running: Arc<RwLock<bool>>,
    ) -> HealthContext {
        let context = HealthContext::new(&config.service.name, config.service.mode, is_running);
        match amqp_connection {
            Some(connection) => context.with_probe(connection),
            None => context,
        }
    }

    fn initialize_metrics(
        config: &AppConfig,
        amqp_connection: Option<Arc<AmqpConnection>>,
        is_running: Arc<RwLock<bool>>,
    ) -> Result<Arc<MetricsService>, ServiceError> {
        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_context = Self::build_health_context(config, amqp_connection, is_running);
        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone())
                .with_health_context(health_context),
        );

        Ok(Arc::new(MetricsService::new(
            metrics_collector,
            health_server,
        )))
    }

    async fn start_metrics_service(&mut self) {
        let metrics_service = self.metrics_service.clone();

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to start up
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!(
            "✅ Metrics service started on port {}",
            self.config.service.health_port
        );
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<Arc<AmqpConnection>, ServiceError> {
        let amqp_config = config
            .amqp_config()
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        info!(
            "Connecting to AMQP broker at {}:{}",
            amqp_config.host, amqp_config.port
        );

        let connection =
            AmqpConnection::new(amqp_config)
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to connect to AMQP: {}", e),
                })?;

        Ok(Arc::new(connection))
    }

    async fn build_publisher(&self) -> Result<Arc<dyn EventPublisher>, ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            return Ok(Arc::new(DiscardingEventPublisher::new()));
        };

        let channel =
            connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to open publisher channel: {}", e),
                })?;

        let publisher_config = PublisherConfig {
            exchange: self.config.amqp.exchange_name.clone(),
            ..PublisherConfig::default()
        };
        let publisher = AmqpEventPublisher::new(channel, publisher_config)
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Ok(Arc::new(publisher))
    }

    /// Start the poll loop: one task, one cycle at a time
    async fn start_crawler(&mut self) -> Result<(), ServiceError> {
        let source = HttpEventSource::new(&self.config.source.endpoint, self.config.request_timeout())
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to create events API client: {}", e),
            })?;
        let metrics = self.metrics_service.collector();
        let poller = SourcePoller::new(Arc::new(source), self.config.poller_config())
            .with_metrics(metrics.clone());

        let publisher = self.build_publisher().await?;
        let mut sequencer = Sequencer::new(poller, publisher)
            .with_policy(self.config.source.marker_policy)
            .with_metrics(metrics);

        let poll_interval = self.config.poll_interval();
        let is_running = self.is_running.clone();
        let dry_run = self.options.dry_run;

        info!(
            "Starting crawler against {} ({}s interval, {:?})",
            self.config.source.endpoint,
            poll_interval.as_secs(),
            self.config.source.marker_policy
        );

        let crawler_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            while *is_running.read().await {
                interval.tick().await;

                match sequencer.run_cycle().await {
                    Ok(CycleOutcome::Published { count, marker }) if dry_run => {
                        info!("Dry run: {} events up to {} not published", count, marker);
                    }
                    Ok(outcome) => debug!("Poll cycle finished: {:?}", outcome),
                    Err(e) => error!("Poll cycle failed: {}", e),
                }
            }

            info!("Crawler task stopped");
        });

        self.background_tasks.push(crawler_task);
        Ok(())
    }

    /// Bind this instance's queue to the exchange and start dispatching
    async fn start_event_consumption(&mut self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            return Err(ServiceError::Configuration {
                message: "Bot mode needs a broker connection".to_string(),
            });
        };

        let store = FileConfigStore::new(&self.config.delivery.communities_file);
        let communities = store
            .communities()
            .await
            .map_err(|e| ServiceError::Configuration {
                message: format!("Failed to load communities: {}", e),
            })?;
        info!(
            "Serving {} communities from {}",
            communities.len(),
            store.path().display()
        );

        let metrics = self.metrics_service.collector();
        let dispatcher = Dispatcher::new(
            Arc::new(StaticGuildDirectory::new(communities)),
            Arc::new(store),
            Arc::new(LogNotifier::new()),
            self.ranking.clone(),
            self.config.dispatch_config(),
        )
        .with_metrics(metrics.clone());
        let handler: Arc<dyn MessageHandler> = Arc::new(dispatcher);

        let channel =
            connection
                .open_channel()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to open consumer channel: {}", e),
                })?;

        let consumer = EventStreamConsumer::new(handler, channel, &self.config.amqp.exchange_name)
            .with_metrics(metrics);
        let queue_name =
            consumer
                .start_consuming()
                .await
                .map_err(|e| ServiceError::AmqpConnection {
                    message: format!("Failed to start consuming events: {}", e),
                })?;

        info!(
            "[Shard #{}] Listening for events on queue '{}'",
            self.config.service.shard_id, queue_name
        );
        self.event_consumer = Some(consumer);
        Ok(())
    }

    /// Periodically refresh uptime and component health gauges
    fn start_health_task(&mut self) {
        let metrics_collector = self.metrics_service.collector();
        let health_context = self.health_context();
        let is_running = self.is_running.clone();

        let health_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            let start_time = tokio::time::Instant::now();

            while *is_running.read().await {
                interval.tick().await;

                let uptime_seconds = start_time.elapsed().as_secs() as i64;
                metrics_collector
                    .service()
                    .uptime_seconds
                    .set(uptime_seconds);

                let health = HealthCheck::check(&health_context).await;
                metrics_collector.update_health_status(health.status.as_gauge());
                for check in &health.checks {
                    metrics_collector.update_component_health(
                        &check.name,
                        check.status != HealthStatus::Unhealthy,
                    );
                }

                debug!(
                    "Updated service health metrics - uptime: {}s, status: {}",
                    uptime_seconds, health.status
                );
            }

            info!("Health metrics task stopped");
        });

        self.background_tasks.push(health_task);
    }

    /// Stop all background tasks
    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        info!("Stopping {} background tasks...", task_count);

        for (i, task) in self.background_tasks.drain(..).enumerate() {
            debug!("Aborting background task {}/{}", i + 1, task_count);
            task.abort();
        }

        // Give tasks time to clean up gracefully
        tokio::time::sleep(Duration::from_millis(500)).await;

        info!("✅ All {} background tasks stopped", task_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceMode;

    #[tokio::test]
    async fn test_dry_run_rejects_bot_mode() {
        let mut config = AppConfig::default();
        config.service.mode = ServiceMode::Bot;

        let result = AppState::new(config, RunOptions { dry_run: true }).await;
        assert!(matches!(result, Err(ServiceError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_dry_run_crawler_needs_no_broker() {
        let mut config = AppConfig::default();
        config.service.mode = ServiceMode::Crawler;

        let state = AppState::new(config, RunOptions { dry_run: true })
            .await
            .unwrap();
        assert!(!state.is_running().await);

        let health = HealthCheck::check(&state.health_context()).await;
        assert_eq!(health.checks.len(), 1);
        assert_eq!(health.mode, ServiceMode::Crawler);
    }
}
