//! Daily ranking of tracked players per community
//!
//! Every match feeds the ranking: favorable matches credit the killer with
//! the kill fame, unfavorable ones charge the victim with the death. Totals
//! reset when the UTC day changes.

use crate::dispatch::collaborators::RankingSink;
use crate::types::{Community, CommunityConfig, GuildId, MatchedEvent};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

/// One player's totals for the day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlayerStanding {
    pub player_id: String,
    pub name: String,
    pub kills: u32,
    pub deaths: u32,
    pub kill_fame: u64,
    pub death_fame: u64,
}

#[derive(Debug, Default)]
struct RankingState {
    day: Option<NaiveDate>,
    guilds: HashMap<GuildId, HashMap<String, PlayerStanding>>,
}

/// In-memory [`RankingSink`] keeping today's totals
#[derive(Debug, Default)]
pub struct DailyRanking {
    state: Mutex<RankingState>,
}

impl DailyRanking {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a match as of the given day
    pub fn record_on(&self, day: NaiveDate, guild: &str, matched: &MatchedEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };

        if state.day != Some(day) {
            if state.day.is_some() {
                debug!("New ranking day {}, clearing previous totals", day);
            }
            state.guilds.clear();
            state.day = Some(day);
        }

        let fame = matched.event.total_victim_kill_fame.max(0) as u64;
        let participant = if matched.favorable {
            &matched.event.killer
        } else {
            &matched.event.victim
        };

        let standing = state
            .guilds
            .entry(guild.to_string())
            .or_default()
            .entry(participant.id.clone())
            .or_insert_with(|| PlayerStanding {
                player_id: participant.id.clone(),
                ..PlayerStanding::default()
            });
        standing.name = participant.name.clone();

        if matched.favorable {
            standing.kills += 1;
            standing.kill_fame += fame;
        } else {
            standing.deaths += 1;
            standing.death_fame += fame;
        }
    }

    /// Today's standings for a community, best killers first
    pub fn standings(&self, guild: &str) -> Vec<PlayerStanding> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };

        let mut standings: Vec<PlayerStanding> = state
            .guilds
            .get(guild)
            .map(|players| players.values().cloned().collect())
            .unwrap_or_default();
        standings.sort_by(|a, b| {
            b.kill_fame
                .cmp(&a.kill_fame)
                .then_with(|| a.death_fame.cmp(&b.death_fame))
                .then_with(|| a.player_id.cmp(&b.player_id))
        });
        standings
    }

    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.guilds.clear();
        }
    }
}

impl RankingSink for DailyRanking {
    fn record(&self, community: &Community, matched: &MatchedEvent, _config: &CommunityConfig) {
        let today = chrono::Utc::now().date_naive();
        self.record_on(today, &community.id, matched);
    }
}
