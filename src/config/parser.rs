//! Configuration file parsing (HOCON format).

use std::path::Path;

use crate::common::error::ConfigError;
use crate::config::types::Config;
use hocon::HoconLoader;

/// Load configuration from a HOCON file.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    HoconLoader::new()
        .load_file(path)
        .map_err(|e| ConfigError::IoError {
            path: path.display().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

/// Load configuration from a HOCON string.
pub fn load_config_str(content: &str) -> Result<Config, ConfigError> {
    HoconLoader::new()
        .load_str(content)
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?
        .resolve()
        .map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = load_config_str(
            r#"
            discord {
                token = "discord-token"
            }
            telegram {
                token = "telegram-token"
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.discord.token, "discord-token");
        assert_eq!(config.telegram.token, "telegram-token");
        assert!(config.discord.broadcast_channels.is_none());
        assert!(config.store.is_none());
        assert_eq!(config.store_path(), "subscribers.json");
        assert_eq!(config.telegram.api_url(), "https://api.telegram.org");
        assert_eq!(config.telegram.poll_timeout_secs(), 60);
    }

    #[test]
    fn test_parse_full_config() {
        let config = load_config_str(
            r#"
            discord {
                token = "discord-token"
                broadcast_channels = [111, 222]
                allowed_channel_categories = [333]
                default_guild = 444
            }
            telegram {
                token = "telegram-token"
                api_url = "http://localhost:8081"
                poll_timeout_secs = 30
            }
            store {
                path = "/var/lib/herald/subscribers.json"
            }
            "#,
        )
        .unwrap();

        assert_eq!(config.discord.broadcast_channels(), &[111, 222]);
        assert_eq!(config.discord.allowed_channel_categories(), &[333]);
        assert_eq!(config.discord.default_guild, Some(444));
        assert_eq!(config.telegram.api_url(), "http://localhost:8081");
        assert_eq!(config.telegram.poll_timeout_secs(), 30);
        assert_eq!(config.store_path(), "/var/lib/herald/subscribers.json");
    }

    #[test]
    fn test_missing_section_fails() {
        let result = load_config_str(
            r#"
            discord {
                token = "discord-token"
            }
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = load_config("/nonexistent/herald.conf");
        assert!(matches!(result, Err(ConfigError::IoError { .. })));
    }
}
