//! Bot- and conversation-level settings readers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Per-bot settings relevant to conversation flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    pub chat_model_id: String,
    pub background_model_id: String,
    pub memory_model_id: String,
    /// History window in minutes (0 = use default)
    pub max_context_load_time: i64,
    pub dm_history_limit: i64,
    pub channel_history_limit: i64,
    pub language: String,
}

/// Per-conversation overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationSettings {
    pub model_id: String,
}

#[async_trait]
pub trait SettingsReader: Send + Sync {
    async fn get_bot(&self, bot_id: &str) -> Result<BotSettings, StoreError>;
}

#[async_trait]
pub trait ConversationSettingsReader: Send + Sync {
    async fn get_settings(&self, chat_id: &str) -> Result<ConversationSettings, StoreError>;
}
