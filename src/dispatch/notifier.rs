//! Log-only notifier
//!
//! Used when the relay runs without a chat gateway attached: matched events
//! are rendered to a one-line summary and written to the log instead of
//! being posted.

use crate::dispatch::collaborators::{Notifier, RenderedPayload};
use crate::error::Result;
use crate::types::{Community, CommunityConfig, MatchedEvent, Participant};
use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

fn describe(participant: &Participant) -> String {
    match (participant.guild_name.is_empty(), participant.alliance_name.is_empty()) {
        (true, _) => participant.name.clone(),
        (false, true) => format!("{} [{}]", participant.name, participant.guild_name),
        (false, false) => format!(
            "{} [{}/{}]",
            participant.name, participant.alliance_name, participant.guild_name
        ),
    }
}

/// One-line summary of a matched event
pub fn summarize(matched: &MatchedEvent) -> String {
    let event = &matched.event;
    let marker = if matched.favorable { "+" } else { "-" };
    format!(
        "{} {} killed {} for {} fame (event {})",
        marker,
        describe(&event.killer),
        describe(&event.victim),
        event.total_victim_kill_fame,
        event.event_id
    )
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn render(&self, matched: &MatchedEvent, _lang: &str) -> Result<RenderedPayload> {
        Ok(RenderedPayload::Text(summarize(matched)))
    }

    async fn render_as_image(&self, matched: &MatchedEvent, _lang: &str) -> Result<RenderedPayload> {
        Ok(RenderedPayload::Image {
            file_name: format!("{}-event.png", matched.event_id()),
            bytes: summarize(matched).into_bytes(),
        })
    }

    async fn render_inventory_as_image(
        &self,
        matched: &MatchedEvent,
        _lang: &str,
    ) -> Result<RenderedPayload> {
        let items: Vec<&str> = matched
            .event
            .victim
            .inventory
            .iter()
            .flatten()
            .map(|item| item.item_type.as_str())
            .collect();
        Ok(RenderedPayload::Image {
            file_name: format!("{}-inventory.png", matched.event_id()),
            bytes: items.join(", ").into_bytes(),
        })
    }

    async fn send_to_guild(
        &self,
        community: &Community,
        config: &CommunityConfig,
        payload: RenderedPayload,
        category: &str,
    ) -> Result<()> {
        let channel = config.channel.as_deref().unwrap_or("default");
        match payload {
            RenderedPayload::Text(text) => {
                info!(
                    "[{}] {} #{}: {}",
                    category, community.name, channel, text
                );
            }
            RenderedPayload::Image { file_name, bytes } => {
                info!(
                    "[{}] {} #{}: {} ({} bytes)",
                    category,
                    community.name,
                    channel,
                    file_name,
                    bytes.len()
                );
            }
        }
        Ok(())
    }
}
