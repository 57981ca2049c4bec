//! Subscriber registry and notification index.
//!
//! The index is derived wholesale from the stored subscriber records and
//! published as an immutable snapshot; routing always reads one consistent
//! snapshot and never observes a half-applied refresh.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::common::types::{ChatId, SubscriberRecord};

/// Lookup structures for notification routing.
///
/// Keys and whitelist entries are lowercased when the index is built, so
/// matching is case-insensitive throughout.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationIndex {
    /// Watched handle -> chats that watch it.
    handle_index: HashMap<String, BTreeSet<ChatId>>,
    /// Watched role name -> chats that watch it.
    role_index: HashMap<String, BTreeSet<ChatId>>,
    /// Chat -> channel-name whitelist. An empty set means every channel.
    whitelist: HashMap<ChatId, BTreeSet<String>>,
}

impl NotificationIndex {
    /// Build the index from scratch for the given records.
    ///
    /// Total for any input: records without a handle contribute no handle
    /// entries, records without roles no role entries. Every chat with at
    /// least one watched trigger gets a whitelist entry, even an empty one.
    pub fn rebuild(records: &[SubscriberRecord]) -> Self {
        let mut index = Self::default();

        for record in records {
            if let Some(handle) = &record.discord_handle {
                index
                    .handle_index
                    .entry(handle.to_lowercase())
                    .or_default()
                    .insert(record.chat_id);
            }
            for role in &record.discord_roles {
                index
                    .role_index
                    .entry(role.to_lowercase())
                    .or_default()
                    .insert(record.chat_id);
            }
            if record.has_triggers() {
                index.whitelist.insert(
                    record.chat_id,
                    record.channels.iter().map(|c| c.to_lowercase()).collect(),
                );
            }
        }

        index
    }

    /// Watched handles with their subscribed chats.
    pub fn handles(&self) -> impl Iterator<Item = (&String, &BTreeSet<ChatId>)> {
        self.handle_index.iter()
    }

    /// Watched role names with their subscribed chats.
    pub fn roles(&self) -> impl Iterator<Item = (&String, &BTreeSet<ChatId>)> {
        self.role_index.iter()
    }

    /// Whether the chat accepts notifications from the given channel.
    ///
    /// An empty whitelist allows every channel; fresh subscriptions work
    /// before any channel was ever picked.
    pub fn channel_allowed(&self, chat_id: ChatId, channel_name: &str) -> bool {
        match self.whitelist.get(&chat_id) {
            Some(allowed) if allowed.is_empty() => true,
            Some(allowed) => allowed.contains(&channel_name.to_lowercase()),
            None => true,
        }
    }

    pub fn watched_handle_count(&self) -> usize {
        self.handle_index.len()
    }

    pub fn watched_role_count(&self) -> usize {
        self.role_index.len()
    }
}

/// One immutable view of the subscriber base.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    pub subscribers: HashMap<ChatId, SubscriberRecord>,
    pub index: NotificationIndex,
}

impl RegistrySnapshot {
    /// Build a snapshot, deriving the index from the records.
    pub fn build(records: Vec<SubscriberRecord>) -> Self {
        let index = NotificationIndex::rebuild(&records);
        let subscribers = records.into_iter().map(|r| (r.chat_id, r)).collect();
        Self { subscribers, index }
    }
}

/// Handle through which snapshots are published and read.
///
/// Refreshes build a complete new snapshot and swap the pointer in one
/// atomic store; readers holding the previous Arc are unaffected.
#[derive(Debug)]
pub struct Registry {
    snap: ArcSwap<RegistrySnapshot>,
}

impl Registry {
    /// Create a registry with an empty snapshot.
    pub fn new() -> Self {
        Self {
            snap: ArcSwap::from_pointee(RegistrySnapshot::default()),
        }
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snap.load_full()
    }

    /// Build and publish a fresh snapshot from the given records.
    pub fn install(&self, records: Vec<SubscriberRecord>) {
        let snapshot = RegistrySnapshot::build(records);
        debug!(
            subscribers = snapshot.subscribers.len(),
            handles = snapshot.index.watched_handle_count(),
            roles = snapshot.index.watched_role_count(),
            "Registry snapshot installed"
        );
        self.snap.store(Arc::new(snapshot));
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared registry reference for use across async tasks.
pub type SharedRegistry = Arc<Registry>;

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(chat_id: ChatId, handle: Option<&str>, roles: &[&str]) -> SubscriberRecord {
        let mut record = SubscriberRecord::empty(chat_id);
        record.discord_handle = handle.map(|h| h.to_string());
        record.discord_roles = roles.iter().map(|r| r.to_string()).collect();
        record.guild_id = Some(1);
        record.verified = true;
        record
    }

    #[test]
    fn test_rebuild_indexes_handles_and_roles() {
        let records = vec![
            make_record(10, Some("Ada"), &["Mods"]),
            make_record(11, Some("grace"), &[]),
            make_record(12, None, &["mods", "admins"]),
        ];

        let index = NotificationIndex::rebuild(&records);

        assert_eq!(index.watched_handle_count(), 2);
        assert_eq!(index.watched_role_count(), 2);

        let ada_watchers: Vec<_> = index
            .handles()
            .filter(|(handle, _)| handle.as_str() == "ada")
            .flat_map(|(_, chats)| chats.iter().copied())
            .collect();
        assert_eq!(ada_watchers, vec![10]);

        let mods_watchers: Vec<_> = index
            .roles()
            .filter(|(role, _)| role.as_str() == "mods")
            .flat_map(|(_, chats)| chats.iter().copied())
            .collect();
        assert_eq!(mods_watchers, vec![10, 12]);
    }

    #[test]
    fn test_rebuild_skips_records_without_triggers() {
        let records = vec![SubscriberRecord::empty(10), make_record(11, Some("ada"), &[])];

        let index = NotificationIndex::rebuild(&records);

        assert_eq!(index.watched_handle_count(), 1);
        assert_eq!(index.watched_role_count(), 0);
        // No whitelist entry for the empty record either.
        assert!(index.channel_allowed(10, "general"));
    }

    #[test]
    fn test_empty_whitelist_allows_every_channel() {
        let records = vec![make_record(10, Some("ada"), &[])];

        let index = NotificationIndex::rebuild(&records);

        assert!(index.channel_allowed(10, "general"));
        assert!(index.channel_allowed(10, "anything-at-all"));
    }

    #[test]
    fn test_populated_whitelist_restricts_channels() {
        let mut record = make_record(10, Some("ada"), &[]);
        record.channels.insert("General".to_string());

        let index = NotificationIndex::rebuild(&[record]);

        assert!(index.channel_allowed(10, "general"));
        assert!(index.channel_allowed(10, "GENERAL"));
        assert!(!index.channel_allowed(10, "random"));
    }

    #[test]
    fn test_multi_role_record_appears_under_each_role() {
        let records = vec![make_record(10, None, &["mods", "admins", "helpers"])];

        let index = NotificationIndex::rebuild(&records);

        assert_eq!(index.watched_role_count(), 3);
        for (_, chats) in index.roles() {
            assert!(chats.contains(&10));
        }
    }

    #[test]
    fn test_rebuild_is_deterministic() {
        let records = vec![
            make_record(10, Some("ada"), &["mods"]),
            make_record(11, Some("grace"), &["admins"]),
        ];

        assert_eq!(
            NotificationIndex::rebuild(&records),
            NotificationIndex::rebuild(&records)
        );
    }

    #[test]
    fn test_snapshot_keeps_record_for_every_indexed_chat() {
        let records = vec![
            make_record(10, Some("ada"), &[]),
            make_record(11, None, &["mods"]),
        ];

        let snapshot = RegistrySnapshot::build(records);

        for (_, chats) in snapshot.index.handles() {
            for chat in chats {
                assert!(snapshot.subscribers.contains_key(chat));
            }
        }
        for (_, chats) in snapshot.index.roles() {
            for chat in chats {
                assert!(snapshot.subscribers.contains_key(chat));
            }
        }
    }

    #[test]
    fn test_install_replaces_snapshot_wholesale() {
        let registry = Registry::new();
        assert_eq!(registry.snapshot().subscribers.len(), 0);

        registry.install(vec![make_record(10, Some("ada"), &[])]);
        let first = registry.snapshot();
        assert_eq!(first.subscribers.len(), 1);

        registry.install(vec![
            make_record(11, Some("grace"), &[]),
            make_record(12, Some("joan"), &[]),
        ]);
        let second = registry.snapshot();

        // The old Arc still reads the old data; the new one has no trace of it.
        assert_eq!(first.subscribers.len(), 1);
        assert_eq!(second.subscribers.len(), 2);
        assert!(!second.subscribers.contains_key(&10));
    }
}
