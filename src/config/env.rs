//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `HERALD_DISCORD_TOKEN` - Discord bot token
//! - `HERALD_TELEGRAM_TOKEN` - Telegram bot token
//! - `HERALD_STORE_PATH` - Subscriber store file path
//! - `HERALD_DEFAULT_GUILD` - Guild assigned to new subscribers

use std::env;

use crate::config::types::{Config, StoreConfig};

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "HERALD";

/// Apply environment variable overrides to a config.
///
/// This allows sensitive values like bot tokens to be provided via
/// environment variables instead of the config file.
pub fn apply_env_overrides(mut config: Config) -> Config {
    // Bot tokens
    if let Ok(token) = env::var(format!("{}_DISCORD_TOKEN", ENV_PREFIX)) {
        config.discord.token = token;
    }
    if let Ok(token) = env::var(format!("{}_TELEGRAM_TOKEN", ENV_PREFIX)) {
        config.telegram.token = token;
    }

    // Store location
    if let Ok(path) = env::var(format!("{}_STORE_PATH", ENV_PREFIX)) {
        config.store = Some(StoreConfig { path });
    }

    // Default guild for new subscribers
    if let Ok(guild) = env::var(format!("{}_DEFAULT_GUILD", ENV_PREFIX)) {
        if let Ok(id) = guild.parse() {
            config.discord.default_guild = Some(id);
        }
    }

    config
}

/// Check if any required environment variables are set but empty.
///
/// Returns a list of variable names that are set but empty.
pub fn check_empty_env_vars() -> Vec<String> {
    let vars = [
        format!("{}_DISCORD_TOKEN", ENV_PREFIX),
        format!("{}_TELEGRAM_TOKEN", ENV_PREFIX),
    ];

    vars.into_iter()
        .filter(|var| env::var(var).map(|v| v.is_empty()).unwrap_or(false))
        .collect()
}

/// Get the config file path from environment or use default.
///
/// Checks `HERALD_CONFIG` environment variable, otherwise returns "herald.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "herald.conf".to_string())
}
