//! File-backed community settings
//!
//! Stands in for the settings store when running the relay on its own. The
//! file is re-read on every lookup so edits apply to the next event.
//!
//! ```toml
//! [[communities]]
//! guild = "738365346855256107"
//! name = "My Server"
//! mode = "text"
//! channel = "869662789713666099"
//!
//! [[communities.tracked_guilds]]
//! id = "vFUVDtWgQwK-4NNwf0xo_w"
//! name = "Tracked Guild"
//! ```

use crate::dispatch::collaborators::ConfigStore;
use crate::error::{RelayError, Result};
use crate::types::{Community, CommunityConfig, GuildId};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default, Deserialize)]
struct CommunitiesFile {
    #[serde(default)]
    communities: Vec<CommunityEntry>,
}

#[derive(Debug, Deserialize)]
struct CommunityEntry {
    #[serde(default)]
    name: Option<String>,
    #[serde(flatten)]
    config: CommunityConfig,
}

/// Settings read from a TOML file
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<CommunityEntry>> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            RelayError::ConfigurationError {
                message: format!(
                    "Failed to read communities file {}: {}",
                    self.path.display(),
                    e
                ),
            }
        })?;
        parse_communities(&content)
    }

    /// The communities listed in the file, used as the served guild list
    pub async fn communities(&self) -> Result<Vec<Community>> {
        let entries = self.load().await?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let name = entry.name.unwrap_or_else(|| entry.config.guild.clone());
                Community::new(entry.config.guild, name)
            })
            .collect())
    }
}

fn parse_communities(content: &str) -> Result<Vec<CommunityEntry>> {
    let file: CommunitiesFile =
        toml::from_str(content).map_err(|e| RelayError::ConfigurationError {
            message: format!("Invalid communities file: {}", e),
        })?;

    for entry in &file.communities {
        if entry.config.guild.is_empty() {
            return Err(RelayError::ConfigurationError {
                message: "Every community needs a guild id".to_string(),
            }
            .into());
        }
    }

    Ok(file.communities)
}

#[async_trait]
impl ConfigStore for FileConfigStore {
    async fn get_config_by_guild(
        &self,
        guild_ids: &[GuildId],
    ) -> Result<HashMap<GuildId, CommunityConfig>> {
        let entries = self.load().await?;
        Ok(entries
            .into_iter()
            .map(|entry| entry.config)
            .filter(|config| guild_ids.contains(&config.guild))
            .map(|config| (config.guild.clone(), config))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeliveryMode;

    const SAMPLE: &str = r#"
[[communities]]
guild = "111"
name = "First Server"
mode = "image"
lang = "pt"

[[communities.tracked_guilds]]
id = "G1"
name = "Guild One"

[[communities]]
guild = "222"
enabled = false

[[communities.tracked_players]]
id = "P1"
"#;

    fn write_sample(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.toml", name, uuid::Uuid::new_v4()));
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn test_parse_communities() {
        let entries = parse_communities(SAMPLE).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.name.as_deref(), Some("First Server"));
        assert_eq!(first.config.mode, DeliveryMode::Image);
        assert_eq!(first.config.lang, "pt");
        assert_eq!(first.config.tracked_guilds[0].id, "G1");
        assert!(first.config.enabled);

        let second = &entries[1];
        assert!(!second.config.enabled);
        assert_eq!(second.config.tracked_players[0].id, "P1");
        assert_eq!(second.config.tracked_players[0].name, "");
    }

    #[test]
    fn test_parse_rejects_missing_guild() {
        assert!(parse_communities("[[communities]]\nname = \"x\"\n").is_err());
        assert!(parse_communities("communities = 3").is_err());
        assert!(parse_communities("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_only_returns_requested_guilds() {
        let path = write_sample("communities-lookup");
        let store = FileConfigStore::new(&path);

        let configs = store
            .get_config_by_guild(&["111".to_string(), "999".to_string()])
            .await
            .unwrap();
        assert_eq!(configs.len(), 1);
        assert!(configs.contains_key("111"));

        let communities = store.communities().await.unwrap();
        assert_eq!(
            communities,
            vec![Community::new("111", "First Server"), Community::new("222", "222")]
        );

        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let store = FileConfigStore::new("/nonexistent/communities.toml");
        assert!(store.get_config_by_guild(&["1".to_string()]).await.is_err());
    }
}
