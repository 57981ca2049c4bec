//! Cache-backed entity resolution.
//!
//! Looks up users, roles and channels in the serenity cache for message
//! rendering, and lists the guild channels offered by the channel picker.

use std::sync::Arc;

use serenity::cache::Cache;
use serenity::model::channel::ChannelType;

use crate::bridge::render::{EntityResolver, ResolvedChannel, ResolvedUser};
use crate::common::error::ResolveError;
use crate::common::types::{ChannelId, GuildId, RoleId, UserId};

/// Channel-name fragments excluded from the channel picker.
const EXCLUDED_NAME_PARTS: [&str; 2] = ["ticket", "closed"];

/// Resolves mention tokens against one guild's cached state.
pub struct CacheResolver {
    cache: Arc<Cache>,
    guild_id: GuildId,
}

impl CacheResolver {
    pub fn for_guild(cache: Arc<Cache>, guild_id: GuildId) -> Self {
        Self { cache, guild_id }
    }
}

impl EntityResolver for CacheResolver {
    fn resolve_user(&self, id: UserId) -> Result<ResolvedUser, ResolveError> {
        let user_id = serenity::model::id::UserId::new(id);

        if let Some(guild) = self.cache.guild(serenity::model::id::GuildId::new(self.guild_id)) {
            if let Some(member) = guild.members.get(&user_id) {
                return Ok(ResolvedUser {
                    username: member.user.name.clone(),
                    nickname: member.nick.clone(),
                });
            }
        }

        // Mentioned users from outside the guild still resolve by username.
        if let Some(user) = self.cache.user(user_id) {
            return Ok(ResolvedUser {
                username: user.name.clone(),
                nickname: None,
            });
        }

        Err(ResolveError::UnknownUser(id))
    }

    fn resolve_role(&self, id: RoleId) -> Result<String, ResolveError> {
        if let Some(guild) = self.cache.guild(serenity::model::id::GuildId::new(self.guild_id)) {
            if let Some(role) = guild.roles.get(&serenity::model::id::RoleId::new(id)) {
                return Ok(role.name.clone());
            }
        }

        Err(ResolveError::UnknownRole(id))
    }

    fn resolve_channel(&self, id: ChannelId) -> Result<ResolvedChannel, ResolveError> {
        if let Some(guild) = self.cache.guild(serenity::model::id::GuildId::new(self.guild_id)) {
            if let Some(channel) = guild.channels.get(&serenity::model::id::ChannelId::new(id)) {
                return Ok(ResolvedChannel {
                    name: channel.name.clone(),
                    url: format!(
                        "https://discord.com/channels/{}/{}",
                        self.guild_id, id
                    ),
                });
            }
        }

        Err(ResolveError::UnknownChannel(id))
    }
}

/// Text channels a subscriber may pick for their whitelist, sorted by name.
///
/// Restricted to the allowed categories when any are configured. Ticket and
/// closed channels are always skipped to keep the listing short.
pub fn allowed_text_channels(
    cache: &Cache,
    guild_id: GuildId,
    allowed_categories: &[u64],
) -> Vec<String> {
    let guild = match cache.guild(serenity::model::id::GuildId::new(guild_id)) {
        Some(guild) => guild,
        None => return Vec::new(),
    };

    let mut names: Vec<String> = guild
        .channels
        .values()
        .filter(|channel| channel.kind == ChannelType::Text)
        .filter(|channel| is_listable_name(&channel.name))
        .filter(|channel| {
            if allowed_categories.is_empty() {
                return true;
            }
            channel
                .parent_id
                .map(|parent| allowed_categories.contains(&parent.get()))
                .unwrap_or(false)
        })
        .map(|channel| channel.name.clone())
        .collect();

    names.sort();
    names
}

fn is_listable_name(name: &str) -> bool {
    !EXCLUDED_NAME_PARTS.iter().any(|part| name.contains(part))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_and_closed_channels_are_not_listable() {
        assert!(is_listable_name("general"));
        assert!(is_listable_name("announcements"));
        assert!(!is_listable_name("ticket-0042"));
        assert!(!is_listable_name("support-ticket"));
        assert!(!is_listable_name("closed-ideas"));
    }
}
