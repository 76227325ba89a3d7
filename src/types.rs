//! Common types used throughout the relay
//!
//! Event types mirror the PascalCase JSON emitted by the game's events API.
//! Fields the relay does not interpret are kept in flattened `extra` maps so
//! that a re-published event carries everything the API sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Identifier assigned to an event by the events API (higher is newer)
pub type EventId = u64;

/// Identifier of a served community (Discord guild)
pub type GuildId = String;

/// A kill event as returned by the events API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawEvent {
    pub event_id: EventId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<String>,
    /// Fame awarded for the kill; non-positive for arena and duel kills
    #[serde(default)]
    pub total_victim_kill_fame: i64,
    /// The actor of the event
    pub killer: Participant,
    /// The target of the event
    pub victim: Participant,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RawEvent {
    /// Whether the event counts towards tracking (duels and arena kills do not)
    pub fn is_countable(&self) -> bool {
        self.total_victim_kill_fame > 0
    }

    /// Whether the victim dropped at least one inventory item
    pub fn has_inventory(&self) -> bool {
        self.victim.inventory.iter().any(Option::is_some)
    }
}

/// One side of an event: the killer or the victim
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Participant {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Empty when the player has no guild
    #[serde(default)]
    pub guild_id: String,
    #[serde(default)]
    pub guild_name: String,
    /// Empty when the guild has no alliance
    #[serde(default)]
    pub alliance_id: String,
    #[serde(default)]
    pub alliance_name: String,
    #[serde(default)]
    pub kill_fame: i64,
    #[serde(default)]
    pub death_fame: i64,
    #[serde(default)]
    pub inventory: Vec<Option<InventoryItem>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single inventory slot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InventoryItem {
    #[serde(rename = "Type")]
    pub item_type: String,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub quality: u32,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A player, guild or alliance a community has opted to monitor
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackedEntity {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl TrackedEntity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// How a community wants matched events rendered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Text,
    Image,
}

impl std::fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryMode::Text => write!(f, "text"),
            DeliveryMode::Image => write!(f, "image"),
        }
    }
}

/// Per-community configuration snapshot, owned by the settings store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityConfig {
    pub guild: GuildId,
    pub lang: String,
    pub mode: DeliveryMode,
    /// Target channel for notifications
    pub channel: Option<String>,
    /// Whether kill notifications are switched on for this community
    pub enabled: bool,
    pub tracked_players: Vec<TrackedEntity>,
    pub tracked_guilds: Vec<TrackedEntity>,
    pub tracked_alliances: Vec<TrackedEntity>,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            guild: String::new(),
            lang: "en".to_string(),
            mode: DeliveryMode::default(),
            channel: None,
            enabled: true,
            tracked_players: Vec::new(),
            tracked_guilds: Vec::new(),
            tracked_alliances: Vec::new(),
        }
    }
}

impl CommunityConfig {
    /// Configuration used for a community with nothing stored: no watchlist
    pub fn empty(guild: &str) -> Self {
        Self {
            guild: guild.to_string(),
            ..Self::default()
        }
    }

    /// Total number of tracked entities across all categories
    pub fn tracked_count(&self) -> usize {
        self.tracked_players.len() + self.tracked_guilds.len() + self.tracked_alliances.len()
    }
}

/// A served community as known to the gateway
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Community {
    pub id: GuildId,
    #[serde(default)]
    pub name: String,
}

impl Community {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// An event matched against one community's watchlist
///
/// Lives for a single dispatch attempt; the event itself is shared between
/// every community that matched it.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedEvent {
    pub event: Arc<RawEvent>,
    pub guild: GuildId,
    /// `true` when the tracked entity was the killer, `false` when it was the victim
    pub favorable: bool,
}

impl MatchedEvent {
    pub fn event_id(&self) -> EventId {
        self.event.event_id
    }
}
