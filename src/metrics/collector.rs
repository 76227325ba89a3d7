//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the relay: the crawler side
//! (fetches, poll cycles, published events) and the consumer side (consumed
//! messages, matches, deliveries).

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::Duration;

/// Main metrics collector for the relay
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Crawler-side metrics
    source_metrics: SourceMetrics,

    /// Consumer-side metrics
    dispatch_metrics: DispatchMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Crawler-side metrics
#[derive(Clone)]
pub struct SourceMetrics {
    /// Page requests against the events API
    pub fetches_total: IntCounterVec,

    /// Poll cycles by outcome
    pub poll_cycles_total: IntCounterVec,

    /// Newest event id published so far
    pub high_water_mark: IntGauge,

    /// Events published to the exchange
    pub events_published_total: IntCounter,
}

/// Consumer-side metrics
#[derive(Clone)]
pub struct DispatchMetrics {
    /// Messages consumed from the exchange by outcome
    pub messages_consumed_total: IntCounterVec,

    /// Time from delivery to acknowledgement
    pub message_processing_duration: Histogram,

    /// Community matches by side
    pub matches_total: IntCounterVec,

    /// Deliveries by outcome
    pub deliveries_total: IntCounterVec,

    /// Render plus send time per delivery
    pub delivery_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let source_metrics = SourceMetrics::new(&registry)?;
        let dispatch_metrics = DispatchMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            source_metrics,
            dispatch_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn source(&self) -> &SourceMetrics {
        &self.source_metrics
    }

    pub fn dispatch(&self) -> &DispatchMetrics {
        &self.dispatch_metrics
    }

    /// Record one page request against the events API
    pub fn record_fetch(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.source_metrics
            .fetches_total
            .with_label_values(&[status])
            .inc();
    }

    /// Record a finished poll cycle
    pub fn record_poll_cycle(&self, outcome: &str) {
        self.source_metrics
            .poll_cycles_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn set_high_water_mark(&self, event_id: u64) {
        self.source_metrics.high_water_mark.set(event_id as i64);
    }

    pub fn record_events_published(&self, count: usize) {
        self.source_metrics
            .events_published_total
            .inc_by(count as u64);
    }

    /// Record a consumed message and how long it took until its ack
    pub fn record_message_consumed(&self, outcome: &str, duration: Duration) {
        self.dispatch_metrics
            .messages_consumed_total
            .with_label_values(&[outcome])
            .inc();

        self.dispatch_metrics
            .message_processing_duration
            .observe(duration.as_secs_f64());
    }

    pub fn record_match(&self, favorable: bool) {
        let side = if favorable { "favorable" } else { "unfavorable" };
        self.dispatch_metrics
            .matches_total
            .with_label_values(&[side])
            .inc();
    }

    /// Record one community delivery
    pub fn record_delivery(&self, outcome: &str, duration: Duration) {
        self.dispatch_metrics
            .deliveries_total
            .with_label_values(&[outcome])
            .inc();

        self.dispatch_metrics
            .delivery_duration
            .with_label_values(&[outcome])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("killfeed_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let health_status = IntGauge::new(
            "killfeed_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("killfeed_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            health_status,
            component_health,
        })
    }
}

impl SourceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let fetches_total = IntCounterVec::new(
            Opts::new("killfeed_source_fetches_total", "Events API page requests"),
            &["status"],
        )?;
        registry.register(Box::new(fetches_total.clone()))?;

        let poll_cycles_total = IntCounterVec::new(
            Opts::new("killfeed_poll_cycles_total", "Poll cycles by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(poll_cycles_total.clone()))?;

        let high_water_mark = IntGauge::new(
            "killfeed_high_water_mark",
            "Newest event id already published",
        )?;
        registry.register(Box::new(high_water_mark.clone()))?;

        let events_published_total = IntCounter::new(
            "killfeed_events_published_total",
            "Events published to the exchange",
        )?;
        registry.register(Box::new(events_published_total.clone()))?;

        Ok(Self {
            fetches_total,
            poll_cycles_total,
            high_water_mark,
            events_published_total,
        })
    }
}

impl DispatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let messages_consumed_total = IntCounterVec::new(
            Opts::new(
                "killfeed_messages_consumed_total",
                "Messages consumed from the exchange",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(messages_consumed_total.clone()))?;

        let message_processing_duration = Histogram::with_opts(
            HistogramOpts::new(
                "killfeed_message_processing_duration_seconds",
                "Time from delivery to acknowledgement",
            )
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(message_processing_duration.clone()))?;

        let matches_total = IntCounterVec::new(
            Opts::new("killfeed_matches_total", "Community matches by side"),
            &["side"],
        )?;
        registry.register(Box::new(matches_total.clone()))?;

        let deliveries_total = IntCounterVec::new(
            Opts::new("killfeed_deliveries_total", "Community deliveries by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(deliveries_total.clone()))?;

        let delivery_duration = HistogramVec::new(
            HistogramOpts::new(
                "killfeed_delivery_duration_seconds",
                "Render and send time per delivery",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["outcome"],
        )?;
        registry.register(Box::new(delivery_duration.clone()))?;

        Ok(Self {
            messages_consumed_total,
            message_processing_duration,
            matches_total,
            deliveries_total,
            delivery_duration,
        })
    }
}
