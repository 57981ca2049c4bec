//! Error types for the application.

use thiserror::Error;

use crate::common::types::{ChannelId, RoleId, UserId};

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Subscriber store errors.
///
/// A missing store file is not an error; the store opens empty.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to access store file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse store file '{path}': {message}")]
    ParseError { path: String, message: String },
}

/// Entity resolution failures during message rendering.
///
/// A failed resolution skips one token and is reported alongside the
/// rendered output; it never aborts the render.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Unknown user id {0}")]
    UnknownUser(UserId),

    #[error("Unknown role id {0}")]
    UnknownRole(RoleId),

    #[error("Unknown channel id {0}")]
    UnknownChannel(ChannelId),
}

/// Telegram Bot API transport errors.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected Telegram response: {message}")]
    UnexpectedResponse { message: String },
}

impl TelegramError {
    /// True when the failure means the recipient cannot be reached at all,
    /// such as the subscriber having blocked the bot or deleted the chat.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Api { code: 403, .. })
    }
}

/// Outcome classification for a single notification send.
#[derive(Debug, Error)]
pub enum SendError {
    /// The recipient is permanently gone; the dispatcher deregisters them.
    #[error("Recipient unreachable: {reason}")]
    Unreachable { reason: String },

    /// Any other failure; logged, delivery to this recipient is skipped.
    #[error("Send failed: {reason}")]
    Other { reason: String },
}

impl From<TelegramError> for SendError {
    fn from(error: TelegramError) -> Self {
        if error.is_unreachable() {
            Self::Unreachable {
                reason: error.to_string(),
            }
        } else {
            Self::Other {
                reason: error.to_string(),
            }
        }
    }
}

/// Result type alias for config operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for Telegram API operations.
pub type TelegramResult<T> = std::result::Result<T, TelegramError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forbidden_api_error_is_unreachable() {
        let error = TelegramError::Api {
            code: 403,
            description: "Forbidden: bot was blocked by the user".to_string(),
        };
        assert!(error.is_unreachable());
        assert!(matches!(
            SendError::from(error),
            SendError::Unreachable { .. }
        ));
    }

    #[test]
    fn test_other_api_errors_are_not_unreachable() {
        let error = TelegramError::Api {
            code: 429,
            description: "Too Many Requests".to_string(),
        };
        assert!(!error.is_unreachable());
        assert!(matches!(SendError::from(error), SendError::Other { .. }));
    }
}
