use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::filter::FilterRules;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Refresh interval in minutes
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Channel feed endpoint; the channel id is appended as `?channel_id=`
    #[serde(default = "default_youtube_feed_url")]
    pub youtube_feed_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_refresh_interval() -> u64 {
    15
}

fn default_bind_address() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_youtube_feed_url() -> String {
    "https://www.youtube.com/feeds/videos.xml".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    "BRandom/1.0 (Feed Aggregator)".to_string()
}

fn default_fetch_all() -> bool {
    true
}

/// A source seeded from the config file on startup.
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub source_type: String,
    pub identifier: String,
    #[serde(default = "default_fetch_all")]
    pub fetch_all: bool,
    pub filter_rules: Option<FilterRules>,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
