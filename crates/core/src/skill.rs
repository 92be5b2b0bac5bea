//! Skills, knowledge context and session extraction.
//!
//! These are optional collaborators; the resolver works without them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StoreError;
use crate::message::ModelMessage;

/// A skill the agent may load on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillEntry {
    pub name: String,
    pub description: String,
    pub content: String,
    /// Free-form metadata; `enabled: true` pins the skill
    pub metadata: Map<String, Value>,
}

impl SkillEntry {
    pub fn is_pinned(&self) -> bool {
        self.metadata.get("enabled").and_then(Value::as_bool) == Some(true)
    }
}

#[async_trait]
pub trait SkillLoader: Send + Sync {
    async fn load_skills(&self, bot_id: &str) -> Result<Vec<SkillEntry>, StoreError>;
}

/// Loads knowledge-base context relevant to a query.
#[async_trait]
pub trait KnowledgeContextLoader: Send + Sync {
    async fn load_context(&self, bot_id: &str, query: &str) -> Result<String, StoreError>;
}

/// Extracts session-level state from a finished round.
#[async_trait]
pub trait SessionExtractor: Send + Sync {
    async fn extract_session(
        &self,
        bot_id: &str,
        chat_id: &str,
        messages: &[ModelMessage],
    ) -> Result<String, StoreError>;
}
