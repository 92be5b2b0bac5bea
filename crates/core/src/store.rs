//! Message history persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;

/// A persisted conversation message.
///
/// `content` holds the JSON-encoded [`ModelMessage`](crate::message::ModelMessage)
/// as written by the flow. Rows written by older clients may contain plain
/// text instead; readers fall back to treating it as raw content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Everything needed to persist one message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistInput {
    pub bot_id: String,
    pub chat_id: String,
    pub route_id: String,
    pub sender_channel_identity_id: String,
    pub sender_user_id: String,
    pub platform: String,
    pub external_message_id: String,
    pub source_reply_to_message_id: String,
    pub role: String,
    pub content: String,
    /// Route info, token usage, file attachments
    pub metadata: Map<String, Value>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Messages of `chat_id` created at or after `since`, oldest first.
    async fn list_since(&self, chat_id: &str, since: DateTime<Utc>) -> Result<Vec<StoredMessage>, StoreError>;

    /// Persist a message, returning its id.
    async fn persist(&self, input: PersistInput) -> Result<String, StoreError>;
}
