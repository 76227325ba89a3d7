//! Test fixtures and in-memory collaborators for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use killfeed_relay::dispatch::{ConfigStore, Notifier, RenderedPayload};
use killfeed_relay::error::Result;
use killfeed_relay::source::EventSource;
use killfeed_relay::types::{
    Community, CommunityConfig, GuildId, InventoryItem, MatchedEvent, Participant, RawEvent,
    TrackedEntity,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Build a participant with the given player, guild and alliance ids
pub fn participant(id: &str, guild_id: &str, alliance_id: &str) -> Participant {
    Participant {
        id: id.to_string(),
        name: format!("Player {}", id),
        guild_id: guild_id.to_string(),
        guild_name: if guild_id.is_empty() {
            String::new()
        } else {
            format!("Guild {}", guild_id)
        },
        alliance_id: alliance_id.to_string(),
        ..Participant::default()
    }
}

/// Build an event with a positive fame value between two anonymous players
pub fn event(event_id: u64) -> RawEvent {
    event_between(
        event_id,
        100,
        participant("killer", "", ""),
        participant("victim", "", ""),
    )
}

pub fn event_between(event_id: u64, fame: i64, killer: Participant, victim: Participant) -> RawEvent {
    RawEvent {
        event_id,
        time_stamp: Some("2026-10-18T12:00:00.000Z".to_string()),
        total_victim_kill_fame: fame,
        killer,
        victim,
        extra: Default::default(),
    }
}

/// Give the victim something to drop
pub fn with_inventory(mut event: RawEvent) -> RawEvent {
    event.victim.inventory = vec![
        None,
        Some(InventoryItem {
            item_type: "T6_POTION_HEAL".to_string(),
            count: 3,
            quality: 0,
            extra: Default::default(),
        }),
    ];
    event
}

/// Events with the given ids, in the given order
pub fn events(ids: &[u64]) -> Vec<RawEvent> {
    ids.iter().map(|&id| event(id)).collect()
}

/// Community config tracking the given guild ids
pub fn tracking_guilds(guild: &str, guild_ids: &[&str]) -> CommunityConfig {
    CommunityConfig {
        guild: guild.to_string(),
        tracked_guilds: guild_ids
            .iter()
            .map(|id| TrackedEntity::new(*id, format!("Guild {}", id)))
            .collect(),
        ..CommunityConfig::default()
    }
}

/// A live-feed stand-in: a newest-first list of events served page by page
#[derive(Default)]
pub struct FeedSource {
    feed: Mutex<Vec<RawEvent>>,
    requests: Mutex<Vec<(u32, u32)>>,
    failures_remaining: Mutex<u32>,
}

impl FeedSource {
    /// Feed holding the given ids, newest first
    pub fn newest_first(ids: &[u64]) -> Self {
        Self {
            feed: Mutex::new(events(ids)),
            ..Self::default()
        }
    }

    /// Feed holding every id from `newest` down to 1
    pub fn descending_from(newest: u64) -> Self {
        let ids: Vec<u64> = (1..=newest).rev().collect();
        Self::newest_first(&ids)
    }

    /// New events arrive at the head of the feed
    pub fn push_newer(&self, ids_newest_first: &[u64]) {
        let mut feed = self.feed.lock().unwrap();
        let mut fresh = events(ids_newest_first);
        fresh.append(&mut feed);
        *feed = fresh;
    }

    /// Prepend prebuilt events, given newest first
    pub fn push_events(&self, newest_first: Vec<RawEvent>) {
        let mut feed = self.feed.lock().unwrap();
        let mut fresh = newest_first;
        fresh.append(&mut feed);
        *feed = fresh;
    }

    /// Fail the next `count` requests
    pub fn fail_next(&self, count: u32) {
        *self.failures_remaining.lock().unwrap() = count;
    }

    /// Every (offset, limit) pair requested so far
    pub fn requests(&self) -> Vec<(u32, u32)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSource for FeedSource {
    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<Vec<RawEvent>> {
        self.requests.lock().unwrap().push((offset, limit));

        {
            let mut failures = self.failures_remaining.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(anyhow::anyhow!("connection reset"));
            }
        }

        let feed = self.feed.lock().unwrap();
        Ok(feed
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// Settings store backed by a fixed map
#[derive(Default)]
pub struct StaticConfigStore {
    configs: HashMap<GuildId, CommunityConfig>,
    lookups: Mutex<usize>,
}

impl StaticConfigStore {
    pub fn new(configs: Vec<CommunityConfig>) -> Self {
        Self {
            configs: configs
                .into_iter()
                .map(|config| (config.guild.clone(), config))
                .collect(),
            lookups: Mutex::new(0),
        }
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }
}

#[async_trait]
impl ConfigStore for StaticConfigStore {
    async fn get_config_by_guild(
        &self,
        guild_ids: &[GuildId],
    ) -> Result<HashMap<GuildId, CommunityConfig>> {
        *self.lookups.lock().unwrap() += 1;
        Ok(guild_ids
            .iter()
            .filter_map(|id| self.configs.get(id).map(|c| (id.clone(), c.clone())))
            .collect())
    }
}

/// How the notifier treats sends to one community
#[derive(Debug, Clone, Copy)]
pub enum SendBehavior {
    Delay(Duration),
    Fail,
}

/// A send that reached the notifier
#[derive(Debug, Clone)]
pub struct SentNotification {
    pub guild: String,
    pub payload: RenderedPayload,
    pub at: Instant,
}

/// Notifier recording every completed send
#[derive(Default)]
pub struct RecordingNotifier {
    behaviors: HashMap<String, SendBehavior>,
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(mut self, guild: &str, behavior: SendBehavior) -> Self {
        self.behaviors.insert(guild.to_string(), behavior);
        self
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, guild: &str) -> Vec<RenderedPayload> {
        self.sent()
            .into_iter()
            .filter(|s| s.guild == guild)
            .map(|s| s.payload)
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn render(&self, matched: &MatchedEvent, _lang: &str) -> Result<RenderedPayload> {
        let side = if matched.favorable { "kill" } else { "death" };
        Ok(RenderedPayload::Text(format!(
            "{} {}",
            side,
            matched.event_id()
        )))
    }

    async fn render_as_image(&self, matched: &MatchedEvent, _lang: &str) -> Result<RenderedPayload> {
        Ok(RenderedPayload::Image {
            file_name: format!("kill-{}.png", matched.event_id()),
            bytes: vec![0x89, 0x50],
        })
    }

    async fn render_inventory_as_image(
        &self,
        matched: &MatchedEvent,
        _lang: &str,
    ) -> Result<RenderedPayload> {
        Ok(RenderedPayload::Image {
            file_name: format!("inventory-{}.png", matched.event_id()),
            bytes: vec![0x89, 0x50],
        })
    }

    async fn send_to_guild(
        &self,
        community: &Community,
        _config: &CommunityConfig,
        payload: RenderedPayload,
        _category: &str,
    ) -> Result<()> {
        match self.behaviors.get(&community.id) {
            Some(SendBehavior::Fail) => {
                return Err(anyhow::anyhow!("missing permissions in {}", community.id))
            }
            Some(SendBehavior::Delay(delay)) => tokio::time::sleep(*delay).await,
            None => {}
        }

        self.sent.lock().unwrap().push(SentNotification {
            guild: community.id.clone(),
            payload,
            at: Instant::now(),
        });
        Ok(())
    }
}
