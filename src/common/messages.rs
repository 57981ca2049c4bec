//! Canonical event types for bridge communication.
//!
//! This module defines the single source of truth for the normalized
//! events flowing from the Discord side into the routing loop.

use crate::common::types::{ChannelId, ChatId, GuildId, RoleId, UserId};

/// A user mentioned in a message, resolved at the event boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserMention {
    pub id: UserId,
    pub username: String,
    /// Guild nickname, when the member has one.
    pub nickname: Option<String>,
}

impl UserMention {
    /// Case-insensitive match against a watched handle.
    ///
    /// Both the username and the guild nickname count, mirroring how the
    /// platform itself looks members up by name.
    pub fn matches_handle(&self, handle: &str) -> bool {
        let handle = handle.to_lowercase();
        if self.username.to_lowercase() == handle {
            return true;
        }
        match &self.nickname {
            Some(nick) => nick.to_lowercase() == handle,
            None => false,
        }
    }
}

/// A role mentioned in a message, resolved at the event boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMention {
    pub id: RoleId,
    pub name: String,
}

/// A guild message normalized for routing.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    /// Channel name as shown on the source platform.
    pub channel_name: String,
    /// Author display name (guild nickname preferred over username).
    pub author_name: String,
    /// Raw message body, untransformed.
    pub content: String,
    /// Permanent link to the message.
    pub permalink: String,
    pub user_mentions: Vec<UserMention>,
    pub role_mentions: Vec<RoleMention>,
    pub mentions_everyone: bool,
    /// True when the message arrived in an always-active channel.
    pub broadcast: bool,
}

/// Request to verify a subscriber's claimed Discord handle.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    /// Telegram chat the subscriber claims to own.
    pub chat_id: ChatId,
    /// Discord username of the account the request came from.
    pub discord_username: String,
}

/// Events emitted by the Discord side, consumed by the bridge loop.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    /// A guild message to route and deliver.
    Message(MessageEvent),
    /// A verification request received via direct message.
    Verify(VerifyRequest),
}
