//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Validate Discord config
    if config.discord.token.is_empty() {
        errors.push("discord.token is required".to_string());
    }
    if config.discord.token == "YOUR_DISCORD_TOKEN_HERE" {
        errors.push("discord.token has not been configured (still using placeholder)".to_string());
    }
    for (i, channel) in config.discord.broadcast_channels().iter().enumerate() {
        if *channel == 0 {
            errors.push(format!(
                "discord.broadcast_channels[{}] must be non-zero",
                i
            ));
        }
    }
    for (i, category) in config.discord.allowed_channel_categories().iter().enumerate() {
        if *category == 0 {
            errors.push(format!(
                "discord.allowed_channel_categories[{}] must be non-zero",
                i
            ));
        }
    }
    if config.discord.default_guild == Some(0) {
        errors.push("discord.default_guild must be non-zero".to_string());
    }

    // Validate Telegram config
    if config.telegram.token.is_empty() {
        errors.push("telegram.token is required".to_string());
    }
    if config.telegram.token == "YOUR_TELEGRAM_TOKEN_HERE" {
        errors.push("telegram.token has not been configured (still using placeholder)".to_string());
    }
    if let Some(url) = config.telegram.api_url.as_deref() {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            errors.push(format!(
                "telegram.api_url '{}' must start with http:// or https://",
                url
            ));
        }
    }
    if let Some(timeout) = config.telegram.poll_timeout_secs {
        if timeout == 0 || timeout > 300 {
            errors.push(format!(
                "telegram.poll_timeout_secs must be 1-300 (got {})",
                timeout
            ));
        }
    }

    // Validate store config
    if let Some(ref store) = config.store {
        if store.path.is_empty() {
            errors.push("store.path must not be empty".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}
