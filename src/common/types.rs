//! Shared types used across the application.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Telegram chat identifier (one chat per subscriber).
pub type ChatId = i64;

/// Discord guild identifier.
pub type GuildId = u64;

/// Discord channel identifier.
pub type ChannelId = u64;

/// Discord user identifier.
pub type UserId = u64;

/// Discord role identifier.
pub type RoleId = u64;

/// A subscriber's stored notification preferences.
///
/// One record per Telegram chat. A wiped record keeps its row in the store
/// but carries no preferences; `is_empty` distinguishes the two.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriberRecord {
    pub chat_id: ChatId,
    /// Discord username to watch for mentions of.
    #[serde(default)]
    pub discord_handle: Option<String>,
    /// Discord role names to watch for mentions of.
    #[serde(default)]
    pub discord_roles: BTreeSet<String>,
    /// Guild the subscription is scoped to.
    #[serde(default)]
    pub guild_id: Option<GuildId>,
    /// Set once the subscriber has proven control of the claimed handle.
    #[serde(default)]
    pub verified: bool,
    /// Channel-name whitelist. Empty means every channel is allowed.
    #[serde(default)]
    pub channels: BTreeSet<String>,
    #[serde(default)]
    pub registered_at: Option<DateTime<Utc>>,
}

impl SubscriberRecord {
    /// A record with no preferences, as created on first contact or by a wipe.
    pub fn empty(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            discord_handle: None,
            discord_roles: BTreeSet::new(),
            guild_id: None,
            verified: false,
            channels: BTreeSet::new(),
            registered_at: None,
        }
    }

    /// True when the record carries no preferences at all.
    ///
    /// Empty records are skipped by broadcast delivery and contribute
    /// nothing to the notification index.
    pub fn is_empty(&self) -> bool {
        self.discord_handle.is_none()
            && self.discord_roles.is_empty()
            && self.guild_id.is_none()
            && self.channels.is_empty()
    }

    /// True when the record has at least one mention trigger.
    pub fn has_triggers(&self) -> bool {
        self.discord_handle.is_some() || !self.discord_roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_record_is_empty() {
        assert!(SubscriberRecord::empty(42).is_empty());
    }

    #[test]
    fn test_record_with_handle_is_not_empty() {
        let mut record = SubscriberRecord::empty(42);
        record.discord_handle = Some("ada".to_string());
        assert!(!record.is_empty());
        assert!(record.has_triggers());
    }

    #[test]
    fn test_verified_alone_does_not_mark_record_non_empty() {
        let mut record = SubscriberRecord::empty(42);
        record.verified = true;
        assert!(record.is_empty());
        assert!(!record.has_triggers());
    }

    #[test]
    fn test_roles_only_record_has_triggers() {
        let mut record = SubscriberRecord::empty(7);
        record.discord_roles.insert("mods".to_string());
        assert!(!record.is_empty());
        assert!(record.has_triggers());
    }
}
