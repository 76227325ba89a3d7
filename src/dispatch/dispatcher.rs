//! Delivery dispatcher
//!
//! For every consumed event: read every community's configuration once,
//! classify the event per community, then deliver to all matching
//! communities concurrently. Each render and each send has its own time
//! budget and a failure in one community never affects another.

use crate::amqp::handlers::MessageHandler;
use crate::dispatch::collaborators::{
    ConfigStore, GuildDirectory, Notifier, RankingSink, RenderedPayload, EVENTS_CATEGORY,
};
use crate::error::{is_timeout, RelayError, Result};
use crate::filter::classify;
use crate::metrics::MetricsCollector;
use crate::types::{Community, CommunityConfig, DeliveryMode, MatchedEvent, RawEvent};
use async_trait::async_trait;
use futures::future::join_all;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Dispatcher settings
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Budget for each individual send
    pub send_timeout: Duration,
    /// Notification category passed to the notifier
    pub category: String,
    /// Label of this consumer replica, for log lines
    pub instance_label: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            send_timeout: Duration::from_secs(10),
            category: EVENTS_CATEGORY.to_string(),
            instance_label: "0".to_string(),
        }
    }
}

/// Summary of one event's dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Communities whose watchlist matched
    pub matched: usize,
    pub delivered: usize,
    /// Failed deliveries, timeouts included
    pub failed: usize,
    pub timed_out: usize,
}

/// Fans one consumed event out to every interested community
pub struct Dispatcher {
    directory: Arc<dyn GuildDirectory>,
    store: Arc<dyn ConfigStore>,
    notifier: Arc<dyn Notifier>,
    ranking: Arc<dyn RankingSink>,
    config: DispatchConfig,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<dyn GuildDirectory>,
        store: Arc<dyn ConfigStore>,
        notifier: Arc<dyn Notifier>,
        ranking: Arc<dyn RankingSink>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            directory,
            store,
            notifier,
            ranking,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Classify and deliver one event to every joined community
    pub async fn dispatch(&self, event: RawEvent) -> DispatchReport {
        let event = Arc::new(event);
        let communities = self.directory.joined_guilds();
        if communities.is_empty() {
            return DispatchReport::default();
        }

        let mut configs = self.load_configs(&communities).await;

        let mut deliveries = Vec::new();
        for community in communities {
            let config = configs
                .remove(&community.id)
                .unwrap_or_else(|| CommunityConfig::empty(&community.id));
            if !config.enabled {
                continue;
            }

            let Some(matched) = classify(&event, &config) else {
                continue;
            };

            info!(
                "[Shard #{}] Sending event {} to guild \"{}\"",
                self.config.instance_label,
                matched.event_id(),
                community.name
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_match(matched.favorable);
            }
            self.ranking.record(&community, &matched, &config);
            deliveries.push(self.deliver_timed(community, config, matched));
        }

        let mut report = DispatchReport {
            matched: deliveries.len(),
            ..DispatchReport::default()
        };

        for (community, result) in join_all(deliveries).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    if is_timeout(&e) {
                        report.timed_out += 1;
                    }
                    error!(
                        "[Shard #{}] Error while sending event {} to guild \"{}\" ({}): {}",
                        self.config.instance_label, event.event_id, community.name, community.id, e
                    );
                }
            }
        }

        debug!(
            "Event {} dispatched: {} matched, {} delivered, {} failed",
            event.event_id, report.matched, report.delivered, report.failed
        );
        report
    }

    /// Batched configuration lookup; a failed lookup means no watchlists
    async fn load_configs(&self, communities: &[Community]) -> HashMap<String, CommunityConfig> {
        let guild_ids: Vec<String> = communities.iter().map(|c| c.id.clone()).collect();
        match self.store.get_config_by_guild(&guild_ids).await {
            Ok(configs) => configs,
            Err(e) => {
                warn!(
                    "Failed to load configuration for {} guilds, skipping matches: {}",
                    guild_ids.len(),
                    e
                );
                HashMap::new()
            }
        }
    }

    async fn deliver_timed(
        &self,
        community: Community,
        config: CommunityConfig,
        matched: MatchedEvent,
    ) -> (Community, Result<()>) {
        let start = Instant::now();
        let result = self.deliver(&community, &config, &matched).await;

        if let Some(metrics) = &self.metrics {
            let outcome = match &result {
                Ok(()) => "delivered",
                Err(e) if is_timeout(e) => "timeout",
                Err(_) => "failed",
            };
            metrics.record_delivery(outcome, start.elapsed());
        }

        (community, result)
    }

    /// Render then send. Every render and every send is a separate step
    /// with its own budget, so a stalled renderer fails like a stalled send.
    async fn deliver(
        &self,
        community: &Community,
        config: &CommunityConfig,
        matched: &MatchedEvent,
    ) -> Result<()> {
        match config.mode {
            DeliveryMode::Image => {
                let image = self
                    .bounded(
                        format!("render of event {}", matched.event_id()),
                        self.notifier.render_as_image(matched, &config.lang),
                    )
                    .await?;
                self.send(community, config, image).await?;

                // The inventory follows only once the kill itself went out
                if matched.event.has_inventory() {
                    let inventory = self
                        .bounded(
                            format!("inventory render of event {}", matched.event_id()),
                            self.notifier
                                .render_inventory_as_image(matched, &config.lang),
                        )
                        .await?;
                    self.send(community, config, inventory).await?;
                }
            }
            DeliveryMode::Text => {
                let text = self
                    .bounded(
                        format!("render of event {}", matched.event_id()),
                        self.notifier.render(matched, &config.lang),
                    )
                    .await?;
                self.send(community, config, text).await?;
            }
        }
        Ok(())
    }

    /// One send under its own time budget
    async fn send(
        &self,
        community: &Community,
        config: &CommunityConfig,
        payload: RenderedPayload,
    ) -> Result<()> {
        let send = async {
            self.notifier
                .send_to_guild(community, config, payload, &self.config.category)
                .await
                .map_err(|e| {
                    anyhow::Error::from(RelayError::DeliveryFailed {
                        guild: community.id.clone(),
                        message: e.to_string(),
                    })
                })
        };

        self.bounded(format!("send to guild {}", community.id), send)
            .await
    }

    /// Run one step under `send_timeout`. On timeout the step future is
    /// dropped and its result ignored.
    async fn bounded<T, F>(&self, operation: String, step: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match timeout(self.config.send_timeout, step).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout {
                operation,
                timeout_ms: self.config.send_timeout.as_millis() as u64,
            }
            .into()),
        }
    }
}

#[async_trait]
impl MessageHandler for Dispatcher {
    async fn handle_event(&self, event: RawEvent) -> Result<()> {
        self.dispatch(event).await;
        Ok(())
    }

    async fn handle_error(&self, error: RelayError, message_data: &[u8]) {
        error!(
            "[Shard #{}] Unprocessable event message ({} bytes): {}",
            self.config.instance_label,
            message_data.len(),
            error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::collaborators::{MockConfigStore, StaticGuildDirectory};
    use crate::dispatch::ranking::DailyRanking;
    use crate::types::{Participant, TrackedEntity};
    use std::sync::Mutex;

    #[derive(Default)]
    struct CountingNotifier {
        sent: Mutex<Vec<(String, RenderedPayload)>>,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn render(&self, matched: &MatchedEvent, _lang: &str) -> Result<RenderedPayload> {
            Ok(RenderedPayload::Text(format!("event {}", matched.event_id())))
        }

        async fn render_as_image(
            &self,
            _matched: &MatchedEvent,
            _lang: &str,
        ) -> Result<RenderedPayload> {
            Err(anyhow::anyhow!("no renderer"))
        }

        async fn render_inventory_as_image(
            &self,
            _matched: &MatchedEvent,
            _lang: &str,
        ) -> Result<RenderedPayload> {
            Err(anyhow::anyhow!("no renderer"))
        }

        async fn send_to_guild(
            &self,
            community: &Community,
            _config: &CommunityConfig,
            payload: RenderedPayload,
            _category: &str,
        ) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((community.id.clone(), payload));
            Ok(())
        }
    }

    fn tracked_event(event_id: u64) -> RawEvent {
        RawEvent {
            event_id,
            time_stamp: None,
            total_victim_kill_fame: 500,
            killer: Participant {
                id: "k".to_string(),
                name: "Killer".to_string(),
                guild_id: "G".to_string(),
                ..Participant::default()
            },
            victim: Participant {
                id: "v".to_string(),
                name: "Victim".to_string(),
                ..Participant::default()
            },
            extra: Default::default(),
        }
    }

    fn dispatcher_with(store: MockConfigStore, notifier: Arc<CountingNotifier>) -> Dispatcher {
        let directory = StaticGuildDirectory::new(vec![
            Community::new("c1", "First"),
            Community::new("c2", "Second"),
        ]);
        Dispatcher::new(
            Arc::new(directory),
            Arc::new(store),
            notifier,
            Arc::new(DailyRanking::new()),
            DispatchConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_configs_are_fetched_once_per_event() {
        let mut store = MockConfigStore::new();
        store
            .expect_get_config_by_guild()
            .times(1)
            .returning(|ids| {
                assert_eq!(ids, ["c1".to_string(), "c2".to_string()]);
                let config = CommunityConfig {
                    guild: "c1".to_string(),
                    tracked_guilds: vec![TrackedEntity::new("G", "Guild")],
                    ..CommunityConfig::default()
                };
                Ok(HashMap::from([("c1".to_string(), config)]))
            });

        let notifier = Arc::new(CountingNotifier::default());
        let dispatcher = dispatcher_with(store, notifier.clone());

        let report = dispatcher.dispatch(tracked_event(1)).await;

        assert_eq!(report.matched, 1);
        assert_eq!(report.delivered, 1);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "c1");
        assert_eq!(sent[0].1, RenderedPayload::Text("event 1".to_string()));
    }

    #[tokio::test]
    async fn test_store_failure_means_no_matches() {
        let mut store = MockConfigStore::new();
        store
            .expect_get_config_by_guild()
            .returning(|_| Err(anyhow::anyhow!("store unavailable")));

        let notifier = Arc::new(CountingNotifier::default());
        let dispatcher = dispatcher_with(store, notifier.clone());

        let report = dispatcher.dispatch(tracked_event(1)).await;
        assert_eq!(report, DispatchReport::default());
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_render_failure_is_counted_and_contained() {
        let mut store = MockConfigStore::new();
        store.expect_get_config_by_guild().returning(|_| {
            let tracking = |guild: &str, mode| CommunityConfig {
                guild: guild.to_string(),
                mode,
                tracked_guilds: vec![TrackedEntity::new("G", "Guild")],
                ..CommunityConfig::default()
            };
            Ok(HashMap::from([
                ("c1".to_string(), tracking("c1", DeliveryMode::Image)),
                ("c2".to_string(), tracking("c2", DeliveryMode::Text)),
            ]))
        });

        let notifier = Arc::new(CountingNotifier::default());
        let dispatcher = dispatcher_with(store, notifier.clone());

        let report = dispatcher.dispatch(tracked_event(1)).await;
        assert_eq!(report.matched, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.timed_out, 0);
        assert_eq!(notifier.sent.lock().unwrap()[0].0, "c2");
    }

    /// Image rendering never finishes; text rendering and sends are instant
    struct StalledImageNotifier {
        inner: CountingNotifier,
    }

    #[async_trait]
    impl Notifier for StalledImageNotifier {
        async fn render(&self, matched: &MatchedEvent, lang: &str) -> Result<RenderedPayload> {
            self.inner.render(matched, lang).await
        }

        async fn render_as_image(
            &self,
            _matched: &MatchedEvent,
            _lang: &str,
        ) -> Result<RenderedPayload> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(RenderedPayload::Text("too late".to_string()))
        }

        async fn render_inventory_as_image(
            &self,
            matched: &MatchedEvent,
            lang: &str,
        ) -> Result<RenderedPayload> {
            self.inner.render_inventory_as_image(matched, lang).await
        }

        async fn send_to_guild(
            &self,
            community: &Community,
            config: &CommunityConfig,
            payload: RenderedPayload,
            category: &str,
        ) -> Result<()> {
            self.inner
                .send_to_guild(community, config, payload, category)
                .await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_render_times_out_within_budget() {
        let mut store = MockConfigStore::new();
        store.expect_get_config_by_guild().returning(|_| {
            let tracking = |guild: &str, mode| CommunityConfig {
                guild: guild.to_string(),
                mode,
                tracked_guilds: vec![TrackedEntity::new("G", "Guild")],
                ..CommunityConfig::default()
            };
            Ok(HashMap::from([
                ("c1".to_string(), tracking("c1", DeliveryMode::Image)),
                ("c2".to_string(), tracking("c2", DeliveryMode::Text)),
            ]))
        });

        let notifier = Arc::new(StalledImageNotifier {
            inner: CountingNotifier::default(),
        });
        let dispatcher = Dispatcher::new(
            Arc::new(StaticGuildDirectory::new(vec![
                Community::new("c1", "First"),
                Community::new("c2", "Second"),
            ])),
            Arc::new(store),
            notifier.clone(),
            Arc::new(DailyRanking::new()),
            DispatchConfig::default(),
        );

        let started = tokio::time::Instant::now();
        let report = dispatcher.dispatch(tracked_event(1)).await;
        let elapsed = started.elapsed();

        assert_eq!(report.matched, 2);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.timed_out, 1);
        assert!(elapsed >= Duration::from_secs(10));
        assert!(elapsed < Duration::from_secs(11));

        let sent = notifier.inner.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "c2");
    }

    #[tokio::test]
    async fn test_handler_always_succeeds() {
        let mut store = MockConfigStore::new();
        store
            .expect_get_config_by_guild()
            .returning(|_| Err(anyhow::anyhow!("store unavailable")));

        let dispatcher = dispatcher_with(store, Arc::new(CountingNotifier::default()));
        assert!(dispatcher.handle_event(tracked_event(1)).await.is_ok());
    }
}
