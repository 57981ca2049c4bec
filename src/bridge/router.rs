//! Notification routing.
//!
//! Decides which Telegram chats get notified for an incoming message and
//! why. Routing is pure over one immutable registry snapshot; delivery and
//! any state changes happen in the dispatcher.

use std::collections::HashMap;

use crate::bridge::registry::NotificationIndex;
use crate::bridge::render::escape_markup;
use crate::common::messages::MessageEvent;
use crate::common::types::{ChatId, SubscriberRecord};

/// Why a recipient was selected for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyReason {
    /// The subscriber's watched handle was mentioned.
    HandleMention,
    /// One of the subscriber's watched roles was mentioned.
    RoleMention,
    /// The message arrived in an always-active channel.
    Broadcast,
}

/// A single planned delivery.
#[derive(Debug, Clone)]
pub struct DeliveryTarget {
    pub chat_id: ChatId,
    pub reason: NotifyReason,
    /// Recipient-agnostic header line, already rendered.
    pub header: String,
}

/// Select delivery targets for a message event.
///
/// A message in an always-active channel broadcasts to every non-empty
/// record and skips all mention filters. Otherwise handles are processed
/// fully before roles, and every mention match must pass three filters:
/// the record is verified, its guild is the event's guild, and its channel
/// whitelist is empty or contains the event channel. There is no dedup
/// across match reasons; a chat matched twice is notified twice.
pub fn route(
    event: &MessageEvent,
    index: &NotificationIndex,
    subscribers: &HashMap<ChatId, SubscriberRecord>,
) -> Vec<DeliveryTarget> {
    if event.broadcast {
        let header = broadcast_header(event);
        let mut targets: Vec<DeliveryTarget> = subscribers
            .values()
            .filter(|record| !record.is_empty())
            .map(|record| DeliveryTarget {
                chat_id: record.chat_id,
                reason: NotifyReason::Broadcast,
                header: header.clone(),
            })
            .collect();
        targets.sort_by_key(|target| target.chat_id);
        return targets;
    }

    let mut targets = Vec::new();

    for (handle, chats) in index.handles() {
        if !event
            .user_mentions
            .iter()
            .any(|mention| mention.matches_handle(handle))
        {
            continue;
        }
        let header = handle_header(event);
        for &chat_id in chats {
            if passes_filters(chat_id, event, index, subscribers) {
                targets.push(DeliveryTarget {
                    chat_id,
                    reason: NotifyReason::HandleMention,
                    header: header.clone(),
                });
            }
        }
    }

    // Role names active on this event, keyed lowercased for the index,
    // keeping the platform casing for the header.
    let mut active_roles: Vec<(String, &str)> = event
        .role_mentions
        .iter()
        .map(|role| (role.name.to_lowercase(), role.name.as_str()))
        .collect();
    if event.mentions_everyone {
        active_roles.push(("@everyone".to_string(), "@everyone"));
    }

    for (role_key, chats) in index.roles() {
        let display_name = match active_roles.iter().find(|(key, _)| key == role_key) {
            Some((_, display_name)) => display_name,
            None => continue,
        };
        let header = role_header(event, display_name);
        for &chat_id in chats {
            if passes_filters(chat_id, event, index, subscribers) {
                targets.push(DeliveryTarget {
                    chat_id,
                    reason: NotifyReason::RoleMention,
                    header: header.clone(),
                });
            }
        }
    }

    targets
}

/// The three-condition filter every mention-based match must pass.
fn passes_filters(
    chat_id: ChatId,
    event: &MessageEvent,
    index: &NotificationIndex,
    subscribers: &HashMap<ChatId, SubscriberRecord>,
) -> bool {
    let record = match subscribers.get(&chat_id) {
        Some(record) => record,
        None => return false,
    };
    if !record.verified {
        return false;
    }
    if record.guild_id != Some(event.guild_id) {
        return false;
    }
    index.channel_allowed(chat_id, &event.channel_name)
}

fn handle_header(event: &MessageEvent) -> String {
    format!(
        "Mentioned by {} in <a href='{}'>#{}</a>:",
        escape_markup(&event.author_name),
        event.permalink,
        escape_markup(&event.channel_name)
    )
}

fn role_header(event: &MessageEvent, role_name: &str) -> String {
    format!(
        "{} mentioned in <a href='{}'>#{}</a>:",
        escape_markup(role_name),
        event.permalink,
        escape_markup(&event.channel_name)
    )
}

fn broadcast_header(event: &MessageEvent) -> String {
    format!(
        "New message in <a href='{}'>#{}</a>:",
        event.permalink,
        escape_markup(&event.channel_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::registry::RegistrySnapshot;
    use crate::common::messages::{RoleMention, UserMention};

    fn make_event() -> MessageEvent {
        MessageEvent {
            guild_id: 1,
            channel_id: 100,
            channel_name: "general".to_string(),
            author_name: "eve".to_string(),
            content: "hello".to_string(),
            permalink: "https://discord.com/channels/1/100/5".to_string(),
            user_mentions: Vec::new(),
            role_mentions: Vec::new(),
            mentions_everyone: false,
            broadcast: false,
        }
    }

    fn mention(username: &str) -> UserMention {
        UserMention {
            id: 1,
            username: username.to_string(),
            nickname: None,
        }
    }

    fn make_record(chat_id: ChatId, handle: Option<&str>, roles: &[&str]) -> SubscriberRecord {
        let mut record = SubscriberRecord::empty(chat_id);
        record.discord_handle = handle.map(|h| h.to_string());
        record.discord_roles = roles.iter().map(|r| r.to_string()).collect();
        record.guild_id = Some(1);
        record.verified = true;
        record
    }

    fn route_for(event: &MessageEvent, records: Vec<SubscriberRecord>) -> Vec<DeliveryTarget> {
        let snapshot = RegistrySnapshot::build(records);
        route(event, &snapshot.index, &snapshot.subscribers)
    }

    #[test]
    fn test_handle_mention_routes_to_watcher() {
        let mut event = make_event();
        event.user_mentions.push(mention("ada"));

        let targets = route_for(&event, vec![make_record(10, Some("ada"), &[])]);

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].chat_id, 10);
        assert_eq!(targets[0].reason, NotifyReason::HandleMention);
        assert_eq!(
            targets[0].header,
            "Mentioned by eve in <a href='https://discord.com/channels/1/100/5'>#general</a>:"
        );
    }

    #[test]
    fn test_handle_matching_is_case_insensitive() {
        let mut event = make_event();
        event.channel_name = "GENERAL".to_string();
        event.user_mentions.push(mention("ADA"));

        let mut record = make_record(10, Some("Ada"), &[]);
        record.channels.insert("General".to_string());

        let targets = route_for(&event, vec![record]);

        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn test_nickname_match_counts_as_handle_mention() {
        let mut event = make_event();
        event.user_mentions.push(UserMention {
            id: 1,
            username: "someuser".to_string(),
            nickname: Some("Ada".to_string()),
        });

        let targets = route_for(&event, vec![make_record(10, Some("ada"), &[])]);

        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn test_unverified_subscriber_is_skipped() {
        let mut event = make_event();
        event.user_mentions.push(mention("ada"));

        let mut record = make_record(10, Some("ada"), &[]);
        record.verified = false;

        assert!(route_for(&event, vec![record]).is_empty());
    }

    #[test]
    fn test_guild_mismatch_is_skipped() {
        let mut event = make_event();
        event.user_mentions.push(mention("ada"));

        let mut record = make_record(10, Some("ada"), &[]);
        record.guild_id = Some(2);

        assert!(route_for(&event, vec![record]).is_empty());
    }

    #[test]
    fn test_record_without_guild_never_matches() {
        let mut event = make_event();
        event.user_mentions.push(mention("ada"));

        let mut record = make_record(10, Some("ada"), &[]);
        record.guild_id = None;

        assert!(route_for(&event, vec![record]).is_empty());
    }

    #[test]
    fn test_empty_whitelist_allows_any_channel() {
        let mut event = make_event();
        event.channel_name = "totally-unrelated".to_string();
        event.user_mentions.push(mention("ada"));

        let targets = route_for(&event, vec![make_record(10, Some("ada"), &[])]);

        assert_eq!(targets.len(), 1);
    }

    #[test]
    fn test_populated_whitelist_filters_channels() {
        let mut event = make_event();
        event.channel_name = "random".to_string();
        event.user_mentions.push(mention("ada"));

        let mut record = make_record(10, Some("ada"), &[]);
        record.channels.insert("general".to_string());

        assert!(route_for(&event, vec![record.clone()]).is_empty());

        event.channel_name = "general".to_string();
        assert_eq!(route_for(&event, vec![record]).len(), 1);
    }

    #[test]
    fn test_role_mention_routes_to_every_watcher() {
        let mut event = make_event();
        event.role_mentions.push(RoleMention {
            id: 7,
            name: "Mods".to_string(),
        });

        let targets = route_for(
            &event,
            vec![
                make_record(10, None, &["mods"]),
                make_record(11, None, &["mods"]),
            ],
        );

        assert_eq!(targets.len(), 2);
        assert!(targets
            .iter()
            .all(|t| t.reason == NotifyReason::RoleMention));
        assert_eq!(
            targets[0].header,
            "Mods mentioned in <a href='https://discord.com/channels/1/100/5'>#general</a>:"
        );
    }

    #[test]
    fn test_only_the_matching_role_watcher_is_targeted() {
        let mut event = make_event();
        event.guild_id = 42;
        event.role_mentions.push(RoleMention {
            id: 7,
            name: "admins".to_string(),
        });

        let mut watcher = make_record(10, None, &["admins"]);
        watcher.guild_id = Some(42);
        let mut wrong_role = make_record(11, None, &["mods"]);
        wrong_role.guild_id = Some(42);
        let handle_only = make_record(12, Some("ada"), &[]);

        let targets = route_for(
            &event,
            vec![watcher.clone(), wrong_role, handle_only],
        );

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].chat_id, 10);
        assert_eq!(targets[0].reason, NotifyReason::RoleMention);

        watcher.guild_id = Some(99);
        assert!(route_for(&event, vec![watcher]).is_empty());
    }

    #[test]
    fn test_everyone_ping_activates_everyone_watchers() {
        let mut event = make_event();
        event.mentions_everyone = true;

        let targets = route_for(&event, vec![make_record(10, None, &["@everyone"])]);

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].reason, NotifyReason::RoleMention);
    }

    #[test]
    fn test_handles_processed_before_roles() {
        let mut event = make_event();
        event.user_mentions.push(mention("ada"));
        event.role_mentions.push(RoleMention {
            id: 7,
            name: "mods".to_string(),
        });

        let targets = route_for(
            &event,
            vec![
                make_record(10, None, &["mods"]),
                make_record(11, Some("ada"), &[]),
            ],
        );

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].reason, NotifyReason::HandleMention);
        assert_eq!(targets[1].reason, NotifyReason::RoleMention);
    }

    #[test]
    fn test_no_dedup_when_handle_and_role_both_match() {
        let mut event = make_event();
        event.user_mentions.push(mention("ada"));
        event.role_mentions.push(RoleMention {
            id: 7,
            name: "mods".to_string(),
        });

        let targets = route_for(&event, vec![make_record(10, Some("ada"), &["mods"])]);

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].chat_id, 10);
        assert_eq!(targets[1].chat_id, 10);
        assert_eq!(targets[0].reason, NotifyReason::HandleMention);
        assert_eq!(targets[1].reason, NotifyReason::RoleMention);
    }

    #[test]
    fn test_broadcast_reaches_all_non_empty_records() {
        let mut event = make_event();
        event.broadcast = true;

        let mut unverified = make_record(11, Some("grace"), &[]);
        unverified.verified = false;
        let mut other_guild = make_record(12, Some("joan"), &[]);
        other_guild.guild_id = Some(9);

        let targets = route_for(
            &event,
            vec![
                make_record(10, Some("ada"), &[]),
                unverified,
                other_guild,
                SubscriberRecord::empty(13),
            ],
        );

        // Every filter is bypassed; only the empty record is excluded.
        let chats: Vec<ChatId> = targets.iter().map(|t| t.chat_id).collect();
        assert_eq!(chats, vec![10, 11, 12]);
        assert!(targets.iter().all(|t| t.reason == NotifyReason::Broadcast));
        assert_eq!(
            targets[0].header,
            "New message in <a href='https://discord.com/channels/1/100/5'>#general</a>:"
        );
    }

    #[test]
    fn test_broadcast_short_circuits_mention_routing() {
        let mut event = make_event();
        event.broadcast = true;
        event.user_mentions.push(mention("ada"));

        let targets = route_for(&event, vec![make_record(10, Some("ada"), &[])]);

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].reason, NotifyReason::Broadcast);
    }

    #[test]
    fn test_header_escapes_interpolated_names() {
        let mut event = make_event();
        event.author_name = "a&b".to_string();
        event.channel_name = "q<x>".to_string();
        event.user_mentions.push(mention("ada"));

        let targets = route_for(&event, vec![make_record(10, Some("ada"), &[])]);

        assert!(targets[0].header.contains("a&amp;b"));
        assert!(targets[0].header.contains("#q&lt;x&gt;"));
    }
}
