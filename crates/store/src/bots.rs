//! In-memory bot repository, settings readers, skills and knowledge.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use flowgate_core::bot::{BotPrompts, BotRepository, EvolutionLogUpdate};
use flowgate_core::error::StoreError;
use flowgate_core::settings::{BotSettings, ConversationSettings, ConversationSettingsReader, SettingsReader};
use flowgate_core::skill::{KnowledgeContextLoader, SkillEntry, SkillLoader};
use tokio::sync::RwLock;
use tracing::debug;

use crate::fixture::{BotFixture, Fixture};

/// A stored conversation summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryRecord {
    pub summary: String,
    pub message_count: usize,
}

#[derive(Debug, Default)]
struct MutableState {
    summaries: HashMap<(String, String), SummaryRecord>,
    evolution_logs: Vec<EvolutionLogUpdate>,
}

/// Bot-scoped data from a [`Fixture`], with summaries and evolution logs
/// kept in memory. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBotStore {
    bots: Arc<HashMap<String, BotFixture>>,
    identities: Arc<HashMap<String, String>>,
    chat_models: Arc<HashMap<String, String>>,
    state: Arc<RwLock<MutableState>>,
}

impl InMemoryBotStore {
    pub fn from_fixture(fixture: &Fixture) -> Self {
        let summaries = fixture
            .chats
            .iter()
            .filter(|c| !c.bot_id.trim().is_empty() && !c.summary.trim().is_empty())
            .map(|c| {
                let record = SummaryRecord {
                    summary: c.summary.clone(),
                    message_count: 0,
                };
                ((c.bot_id.clone(), c.id.clone()), record)
            })
            .collect();

        Self {
            bots: Arc::new(fixture.bots.iter().map(|b| (b.id.clone(), b.clone())).collect()),
            identities: Arc::new(
                fixture
                    .identities
                    .iter()
                    .map(|i| (i.id.clone(), i.display_name.clone()))
                    .collect(),
            ),
            chat_models: Arc::new(
                fixture
                    .chats
                    .iter()
                    .filter(|c| !c.model_id.trim().is_empty())
                    .map(|c| (c.id.clone(), c.model_id.clone()))
                    .collect(),
            ),
            state: Arc::new(RwLock::new(MutableState {
                summaries,
                evolution_logs: Vec::new(),
            })),
        }
    }

    fn bot(&self, bot_id: &str) -> Result<&BotFixture, StoreError> {
        self.bots
            .get(bot_id)
            .ok_or_else(|| StoreError::NotFound(format!("bot {bot_id}")))
    }

    pub async fn summary_record(&self, bot_id: &str, chat_id: &str) -> Option<SummaryRecord> {
        self.state
            .read()
            .await
            .summaries
            .get(&(bot_id.to_string(), chat_id.to_string()))
            .cloned()
    }

    /// Evolution log completions in the order they arrived.
    pub async fn evolution_logs(&self) -> Vec<EvolutionLogUpdate> {
        self.state.read().await.evolution_logs.clone()
    }
}

#[async_trait]
impl SettingsReader for InMemoryBotStore {
    async fn get_bot(&self, bot_id: &str) -> Result<BotSettings, StoreError> {
        Ok(self.bot(bot_id)?.settings.clone())
    }
}

#[async_trait]
impl ConversationSettingsReader for InMemoryBotStore {
    async fn get_settings(&self, chat_id: &str) -> Result<ConversationSettings, StoreError> {
        Ok(ConversationSettings {
            model_id: self.chat_models.get(chat_id).cloned().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl BotRepository for InMemoryBotStore {
    async fn prompts(&self, bot_id: &str) -> Result<BotPrompts, StoreError> {
        Ok(self.bot(bot_id)?.prompts.clone())
    }

    async fn container_id(&self, bot_id: &str) -> Result<Option<String>, StoreError> {
        let container = &self.bot(bot_id)?.container_id;
        Ok(Some(container.clone()).filter(|c| !c.trim().is_empty()))
    }

    async fn display_name(&self, channel_identity_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.identities.get(channel_identity_id).cloned())
    }

    async fn summary(&self, bot_id: &str, chat_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.summary_record(bot_id, chat_id).await.map(|r| r.summary))
    }

    async fn upsert_summary(
        &self,
        bot_id: &str,
        chat_id: &str,
        summary: &str,
        message_count: usize,
    ) -> Result<(), StoreError> {
        debug!(bot_id = %bot_id, chat_id = %chat_id, message_count, "Summary upserted");
        self.state.write().await.summaries.insert(
            (bot_id.to_string(), chat_id.to_string()),
            SummaryRecord {
                summary: summary.to_string(),
                message_count,
            },
        );
        Ok(())
    }

    async fn complete_evolution_log(&self, update: EvolutionLogUpdate) -> Result<(), StoreError> {
        self.state.write().await.evolution_logs.push(update);
        Ok(())
    }
}

#[async_trait]
impl SkillLoader for InMemoryBotStore {
    async fn load_skills(&self, bot_id: &str) -> Result<Vec<SkillEntry>, StoreError> {
        Ok(self.bots.get(bot_id).map(|b| b.skills.clone()).unwrap_or_default())
    }
}

#[async_trait]
impl KnowledgeContextLoader for InMemoryBotStore {
    async fn load_context(&self, bot_id: &str, _query: &str) -> Result<String, StoreError> {
        Ok(self.bots.get(bot_id).map(|b| b.knowledge.clone()).unwrap_or_default())
    }
}
