//! In-memory message store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowgate_core::error::StoreError;
use flowgate_core::store::{MessageStore, PersistInput, StoredMessage};
use tokio::sync::RwLock;
use uuid::Uuid;

/// One persisted row: what was asked to be stored plus when.
#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub input: PersistInput,
    pub created_at: DateTime<Utc>,
}

/// Append-only message log shared by clones.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageStore {
    rows: Arc<RwLock<Vec<MessageRecord>>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row with an explicit timestamp (for seeding history).
    pub async fn insert_at(&self, input: PersistInput, created_at: DateTime<Utc>) -> String {
        let id = Uuid::new_v4().to_string();
        self.rows.write().await.push(MessageRecord {
            id: id.clone(),
            input,
            created_at,
        });
        id
    }

    /// All rows of a chat in insertion order.
    pub async fn records(&self, chat_id: &str) -> Vec<MessageRecord> {
        self.rows
            .read()
            .await
            .iter()
            .filter(|r| r.input.chat_id == chat_id)
            .cloned()
            .collect()
    }

    pub async fn count(&self) -> usize {
        self.rows.read().await.len()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn list_since(&self, chat_id: &str, since: DateTime<Utc>) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = self.rows.read().await;
        let mut out: Vec<StoredMessage> = rows
            .iter()
            .filter(|r| r.input.chat_id == chat_id && r.created_at >= since)
            .map(|r| StoredMessage {
                id: r.id.clone(),
                chat_id: r.input.chat_id.clone(),
                role: r.input.role.clone(),
                content: r.input.content.clone(),
                created_at: r.created_at,
            })
            .collect();
        out.sort_by_key(|m| m.created_at);
        Ok(out)
    }

    async fn persist(&self, input: PersistInput) -> Result<String, StoreError> {
        if input.chat_id.trim().is_empty() {
            return Err(StoreError::Backend("chat id is required".into()));
        }
        Ok(self.insert_at(input, Utc::now()).await)
    }
}
