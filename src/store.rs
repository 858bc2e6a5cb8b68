//! Persistence contracts the chat pipeline writes through
//!
//! The conversation store only needs `get` and a full replace of the turn
//! list. Stores that can apply an edit atomically override [`ConversationStore::modify`];
//! the provided implementation is a plain read-modify-write.

use crate::types::{ApiKeyRecord, ConversationRecord, TurnRecord};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Edit applied to the turn list of one conversation
pub type TurnEdit = Box<dyn FnOnce(&mut Vec<TurnRecord>) + Send>;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ConversationRecord>>;

    /// Replaces the full turn list. Updating an unknown key is a no-op.
    async fn update(&self, key: &str, data: Vec<TurnRecord>) -> Result<()>;

    async fn modify(&self, key: &str, edit: TurnEdit) -> Result<()> {
        let mut data = self
            .get(key)
            .await?
            .map(|record| record.data)
            .unwrap_or_default();
        edit(&mut data);
        self.update(key, data).await
    }
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<ApiKeyRecord>>;
}

/// Conversation store kept in process memory
#[derive(Default)]
pub struct MemoryConversationStore {
    records: RwLock<HashMap<String, ConversationRecord>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: ConversationRecord) {
        self.records
            .write()
            .await
            .insert(record.key.clone(), record);
    }

    pub async fn remove(&self, key: &str) -> Option<ConversationRecord> {
        self.records.write().await.remove(key)
    }

    /// Conversations ordered by most recent first
    pub async fn list(&self) -> Vec<ConversationRecord> {
        let mut records: Vec<_> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get(&self, key: &str) -> Result<Option<ConversationRecord>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn update(&self, key: &str, data: Vec<TurnRecord>) -> Result<()> {
        match self.records.write().await.get_mut(key) {
            Some(record) => record.data = data,
            None => debug!("Ignoring update of unknown conversation {}", key),
        }
        Ok(())
    }

    async fn modify(&self, key: &str, edit: TurnEdit) -> Result<()> {
        // The write guard spans the whole edit, so concurrent sessions never
        // overwrite each other's turns.
        match self.records.write().await.get_mut(key) {
            Some(record) => edit(&mut record.data),
            None => debug!("Ignoring edit of unknown conversation {}", key),
        }
        Ok(())
    }
}

/// API key store kept in process memory
#[derive(Default)]
pub struct MemoryApiKeyStore {
    keys: RwLock<HashMap<String, ApiKeyRecord>>,
}

impl MemoryApiKeyStore {
    pub fn new(records: impl IntoIterator<Item = ApiKeyRecord>) -> Self {
        Self {
            keys: RwLock::new(
                records
                    .into_iter()
                    .map(|record| (record.key.clone(), record))
                    .collect(),
            ),
        }
    }

    pub async fn insert(&self, record: ApiKeyRecord) {
        self.keys.write().await.insert(record.key.clone(), record);
    }
}

#[async_trait]
impl ApiKeyStore for MemoryApiKeyStore {
    async fn get(&self, key: &str) -> Result<Option<ApiKeyRecord>> {
        Ok(self.keys.read().await.get(key).cloned())
    }
}
