//! Per-community event filtering
//!
//! Decides whether an event concerns a community's watchlist and whether it
//! is good news (a tracked killer) or bad news (a tracked victim) for it.

use crate::types::{CommunityConfig, MatchedEvent, Participant, RawEvent, TrackedEntity};
use std::collections::HashSet;
use std::sync::Arc;

/// Tracked ids of one community, borrowed from its configuration
#[derive(Debug, Default)]
pub struct Watchlist<'a> {
    players: HashSet<&'a str>,
    guilds: HashSet<&'a str>,
    alliances: HashSet<&'a str>,
}

impl<'a> Watchlist<'a> {
    /// Build the lookup sets for a community. Entities with an empty id are ignored.
    pub fn from_config(config: &'a CommunityConfig) -> Self {
        fn ids(entities: &[TrackedEntity]) -> HashSet<&str> {
            entities
                .iter()
                .map(|entity| entity.id.as_str())
                .filter(|id| !id.is_empty())
                .collect()
        }

        Self {
            players: ids(&config.tracked_players),
            guilds: ids(&config.tracked_guilds),
            alliances: ids(&config.tracked_alliances),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty() && self.guilds.is_empty() && self.alliances.is_empty()
    }

    /// Whether the participant's alliance, guild or player id is tracked
    pub fn matches(&self, participant: &Participant) -> bool {
        self.alliances.contains(participant.alliance_id.as_str())
            || self.guilds.contains(participant.guild_id.as_str())
            || self.players.contains(participant.id.as_str())
    }
}

/// Classify an event for a single community.
///
/// Returns `None` when the community tracks nothing, when the event carries
/// no fame (arena and duel kills), or when neither side is tracked. When
/// both the killer and the victim are tracked by the same community only one
/// match is produced and it is favorable.
pub fn classify(event: &Arc<RawEvent>, config: &CommunityConfig) -> Option<MatchedEvent> {
    let watchlist = Watchlist::from_config(config);
    if watchlist.is_empty() {
        return None;
    }

    if !event.is_countable() {
        return None;
    }

    let favorable = watchlist.matches(&event.killer);
    let unfavorable = watchlist.matches(&event.victim);
    if !favorable && !unfavorable {
        return None;
    }

    Some(MatchedEvent {
        event: Arc::clone(event),
        guild: config.guild.clone(),
        favorable,
    })
}
