//! Interfaces to the systems the dispatcher depends on
//!
//! The gateway, settings store, renderer and ranking reports live outside
//! the relay; the dispatcher only sees them through these traits.

use crate::error::Result;
use crate::types::{Community, CommunityConfig, GuildId, MatchedEvent};
use async_trait::async_trait;
use std::collections::HashMap;

/// Notification category used for kill events
pub const EVENTS_CATEGORY: &str = "events";

/// A notification ready to be sent
#[derive(Debug, Clone, PartialEq)]
pub enum RenderedPayload {
    /// A text (embed) message
    Text(String),
    /// An image attachment
    Image { file_name: String, bytes: Vec<u8> },
}

/// Communities this instance currently serves
pub trait GuildDirectory: Send + Sync {
    fn joined_guilds(&self) -> Vec<Community>;
}

/// The settings store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Look up configurations for many communities at once. Communities with
    /// nothing stored are simply absent from the result.
    async fn get_config_by_guild(
        &self,
        guild_ids: &[GuildId],
    ) -> Result<HashMap<GuildId, CommunityConfig>>;
}

/// Renders matched events and sends them to a community
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn render(&self, matched: &MatchedEvent, lang: &str) -> Result<RenderedPayload>;

    async fn render_as_image(&self, matched: &MatchedEvent, lang: &str)
        -> Result<RenderedPayload>;

    /// Image of the items the victim dropped
    async fn render_inventory_as_image(
        &self,
        matched: &MatchedEvent,
        lang: &str,
    ) -> Result<RenderedPayload>;

    async fn send_to_guild(
        &self,
        community: &Community,
        config: &CommunityConfig,
        payload: RenderedPayload,
        category: &str,
    ) -> Result<()>;
}

/// Aggregate reporting fed by every match, whatever happens to its delivery
pub trait RankingSink: Send + Sync {
    fn record(&self, community: &Community, matched: &MatchedEvent, config: &CommunityConfig);
}

/// Fixed list of communities
#[derive(Debug, Clone, Default)]
pub struct StaticGuildDirectory {
    communities: Vec<Community>,
}

impl StaticGuildDirectory {
    pub fn new(communities: Vec<Community>) -> Self {
        Self { communities }
    }
}

impl GuildDirectory for StaticGuildDirectory {
    fn joined_guilds(&self) -> Vec<Community> {
        self.communities.clone()
    }
}
