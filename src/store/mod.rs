//! Subscriber persistence.
//!
//! Records live in one JSON file keyed by chat id, mirrored in memory
//! behind an async mutex. Mutations rewrite the whole file; the subscriber
//! base is small and reads never touch the disk after startup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::common::error::{StoreError, StoreResult};
use crate::common::types::{ChatId, SubscriberRecord};

pub struct SubscriberStore {
    path: PathBuf,
    records: Mutex<BTreeMap<ChatId, SubscriberRecord>>,
}

impl SubscriberStore {
    /// Open the store, reading existing records when the file exists.
    ///
    /// A missing file is a valid empty store, not an error.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let records: BTreeMap<ChatId, SubscriberRecord> =
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => {
                    serde_json::from_str(&contents).map_err(|error| StoreError::ParseError {
                        path: path.display().to_string(),
                        message: error.to_string(),
                    })?
                }
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
                Err(error) => {
                    return Err(StoreError::IoError {
                        path: path.display().to_string(),
                        source: error,
                    });
                }
            };

        info!(
            path = %path.display(),
            subscribers = records.len(),
            "Subscriber store opened"
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Snapshot of every record, for registry rebuilds.
    pub async fn load_all(&self) -> Vec<SubscriberRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    /// One record, if present.
    pub async fn get(&self, chat_id: ChatId) -> Option<SubscriberRecord> {
        self.records.lock().await.get(&chat_id).cloned()
    }

    /// Apply a mutation to the chat's record, creating it first if needed,
    /// then persist. Returns the record after the mutation.
    pub async fn update<F>(&self, chat_id: ChatId, mutate: F) -> StoreResult<SubscriberRecord>
    where
        F: FnOnce(&mut SubscriberRecord),
    {
        let mut records = self.records.lock().await;
        let record = records.entry(chat_id).or_insert_with(|| {
            let mut record = SubscriberRecord::empty(chat_id);
            record.registered_at = Some(Utc::now());
            record
        });
        mutate(record);
        let updated = record.clone();
        self.persist(&records).await?;
        Ok(updated)
    }

    /// Reset the chat's record to empty, keeping the row.
    pub async fn wipe(&self, chat_id: ChatId) -> StoreResult<()> {
        let mut records = self.records.lock().await;
        records.insert(chat_id, SubscriberRecord::empty(chat_id));
        self.persist(&records).await
    }

    /// Remove the chat's record entirely.
    ///
    /// This is the deregistration path for unreachable recipients; it
    /// returns whether a record actually existed.
    pub async fn delete(&self, chat_id: ChatId) -> StoreResult<bool> {
        let mut records = self.records.lock().await;
        if records.remove(&chat_id).is_none() {
            return Ok(false);
        }
        self.persist(&records).await?;
        Ok(true)
    }

    /// Mark the chat's record verified when the claimed handle matches the
    /// given username. Returns false when there is no record or no match.
    pub async fn confirm_handle(&self, chat_id: ChatId, username: &str) -> StoreResult<bool> {
        let mut records = self.records.lock().await;
        let record = match records.get_mut(&chat_id) {
            Some(record) => record,
            None => return Ok(false),
        };
        let matches = record
            .discord_handle
            .as_deref()
            .is_some_and(|handle| handle.to_lowercase() == username.to_lowercase());
        if !matches {
            return Ok(false);
        }
        record.verified = true;
        self.persist(&records).await?;
        Ok(true)
    }

    async fn persist(&self, records: &BTreeMap<ChatId, SubscriberRecord>) -> StoreResult<()> {
        let contents =
            serde_json::to_string_pretty(records).map_err(|error| StoreError::ParseError {
                path: self.path.display().to_string(),
                message: error.to_string(),
            })?;
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|error| StoreError::IoError {
                path: self.path.display().to_string(),
                source: error,
            })?;
        debug!(subscribers = records.len(), "Subscriber store persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("herald-{}-{}.json", name, std::process::id()))
    }

    #[test]
    fn test_open_missing_file_is_empty() {
        tokio_test::block_on(async {
            let path = temp_store_path("missing");
            let _ = std::fs::remove_file(&path);

            let store = SubscriberStore::open(&path).await.unwrap();
            assert!(store.load_all().await.is_empty());
        });
    }

    #[tokio::test]
    async fn test_update_creates_and_persists_record() {
        let path = temp_store_path("update");
        let _ = std::fs::remove_file(&path);

        let store = SubscriberStore::open(&path).await.unwrap();
        let record = store
            .update(42, |r| r.discord_handle = Some("ada".to_string()))
            .await
            .unwrap();
        assert_eq!(record.discord_handle.as_deref(), Some("ada"));
        assert!(record.registered_at.is_some());

        // A fresh store instance reads the same data back.
        let reopened = SubscriberStore::open(&path).await.unwrap();
        let records = reopened.load_all().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].discord_handle.as_deref(), Some("ada"));

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_wipe_keeps_an_empty_row() {
        let path = temp_store_path("wipe");
        let _ = std::fs::remove_file(&path);

        let store = SubscriberStore::open(&path).await.unwrap();
        store
            .update(42, |r| {
                r.discord_handle = Some("ada".to_string());
                r.verified = true;
            })
            .await
            .unwrap();

        store.wipe(42).await.unwrap();

        let record = store.get(42).await.unwrap();
        assert!(record.is_empty());
        assert!(!record.verified);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_delete_removes_the_row() {
        let path = temp_store_path("delete");
        let _ = std::fs::remove_file(&path);

        let store = SubscriberStore::open(&path).await.unwrap();
        store
            .update(42, |r| r.discord_handle = Some("ada".to_string()))
            .await
            .unwrap();

        assert!(store.delete(42).await.unwrap());
        assert!(store.get(42).await.is_none());
        // Second delete is a no-op.
        assert!(!store.delete(42).await.unwrap());

        let reopened = SubscriberStore::open(&path).await.unwrap();
        assert!(reopened.load_all().await.is_empty());

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn test_confirm_handle_requires_matching_record() {
        let path = temp_store_path("confirm");
        let _ = std::fs::remove_file(&path);

        let store = SubscriberStore::open(&path).await.unwrap();
        store
            .update(42, |r| r.discord_handle = Some("Ada".to_string()))
            .await
            .unwrap();

        // No record for this chat.
        assert!(!store.confirm_handle(7, "ada").await.unwrap());
        // Wrong username.
        assert!(!store.confirm_handle(42, "grace").await.unwrap());
        assert!(!store.get(42).await.unwrap().verified);

        // Case-insensitive match flips the bit.
        assert!(store.confirm_handle(42, "ADA").await.unwrap());
        assert!(store.get(42).await.unwrap().verified);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_open_rejects_corrupt_file() {
        tokio_test::block_on(async {
            let path = temp_store_path("corrupt");
            std::fs::write(&path, "not json at all").unwrap();

            let result = SubscriberStore::open(&path).await;
            assert!(matches!(result, Err(StoreError::ParseError { .. })));

            let _ = std::fs::remove_file(&path);
        });
    }
}
