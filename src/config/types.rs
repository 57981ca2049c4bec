//! Configuration type definitions.

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub discord: DiscordConfig,
    pub telegram: TelegramConfig,
    pub store: Option<StoreConfig>,
}

/// Discord bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    pub token: String,
    /// Channels whose every message is forwarded to all subscribers.
    pub broadcast_channels: Option<Vec<u64>>,
    /// Category ids whose text channels are offered in the channel picker.
    pub allowed_channel_categories: Option<Vec<u64>>,
    /// Guild assigned to newly registered subscribers.
    pub default_guild: Option<u64>,
}

/// Telegram bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub token: String,
    /// Bot API base, overridable for local API servers.
    pub api_url: Option<String>,
    /// Long-poll timeout for getUpdates.
    pub poll_timeout_secs: Option<u64>,
}

/// Subscriber store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub path: String,
}

impl Config {
    /// Path of the subscriber store file.
    pub fn store_path(&self) -> &str {
        self.store
            .as_ref()
            .map(|s| s.path.as_str())
            .unwrap_or("subscribers.json")
    }
}

impl DiscordConfig {
    pub fn broadcast_channels(&self) -> &[u64] {
        self.broadcast_channels.as_deref().unwrap_or(&[])
    }

    pub fn allowed_channel_categories(&self) -> &[u64] {
        self.allowed_channel_categories.as_deref().unwrap_or(&[])
    }
}

impl TelegramConfig {
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or("https://api.telegram.org")
    }

    pub fn poll_timeout_secs(&self) -> u64 {
        self.poll_timeout_secs.unwrap_or(60)
    }
}
