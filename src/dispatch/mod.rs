//! Per-community dispatch of consumed events

pub mod collaborators;
pub mod dispatcher;
pub mod notifier;
pub mod ranking;
pub mod store;

pub use collaborators::{
    ConfigStore, GuildDirectory, Notifier, RankingSink, RenderedPayload, StaticGuildDirectory,
    EVENTS_CATEGORY,
};
pub use dispatcher::{DispatchConfig, DispatchReport, Dispatcher};
pub use notifier::LogNotifier;
pub use ranking::{DailyRanking, PlayerStanding};
pub use store::FileConfigStore;
