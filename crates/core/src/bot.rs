//! Bot-scoped records: persona prompts, container binding, conversation
//! summaries, evolution logs and token usage.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::request::TokenUsage;

/// Persona prompts attached to every gateway request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotPrompts {
    pub identity: String,
    pub soul: String,
    pub task: String,
    pub allow_self_evolution: bool,
}

impl Default for BotPrompts {
    fn default() -> Self {
        Self {
            identity: String::new(),
            soul: String::new(),
            task: String::new(),
            allow_self_evolution: true,
        }
    }
}

/// Terminal state of an evolution (heartbeat) run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvolutionStatus {
    Completed,
    Skipped,
    Failed,
}

impl std::fmt::Display for EvolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EvolutionStatus::Completed => "completed",
            EvolutionStatus::Skipped => "skipped",
            EvolutionStatus::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvolutionLogUpdate {
    pub log_id: String,
    pub status: EvolutionStatus,
    pub changes_summary: Option<String>,
    pub agent_response: Option<String>,
}

/// Bot-scoped persistence used by the resolver.
///
/// Lookups that may legitimately find nothing return `Ok(None)`.
#[async_trait]
pub trait BotRepository: Send + Sync {
    async fn prompts(&self, bot_id: &str) -> Result<BotPrompts, StoreError>;

    async fn container_id(&self, bot_id: &str) -> Result<Option<String>, StoreError>;

    /// Display name of a channel identity, or of the user linked to it.
    async fn display_name(&self, channel_identity_id: &str) -> Result<Option<String>, StoreError>;

    async fn summary(&self, bot_id: &str, chat_id: &str) -> Result<Option<String>, StoreError>;

    async fn upsert_summary(
        &self,
        bot_id: &str,
        chat_id: &str,
        summary: &str,
        message_count: usize,
    ) -> Result<(), StoreError>;

    async fn complete_evolution_log(&self, update: EvolutionLogUpdate) -> Result<(), StoreError>;
}

/// One token usage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub bot_id: String,
    pub model: String,
    /// `chat`, `schedule`, `heartbeat`, `summarize`
    pub source: String,
    pub usage: TokenUsage,
}

#[async_trait]
pub trait UsageRecorder: Send + Sync {
    async fn record(&self, record: UsageRecord) -> Result<(), StoreError>;
}
