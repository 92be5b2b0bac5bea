//! Model and provider registry.
//!
//! A [`ChatModel`] names a concrete model served by an [`LlmProvider`]. The
//! registry resolves models by their public model id or by internal row id
//! (used for fallback chains).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// Provider client types the gateway knows how to drive.
pub const SUPPORTED_CLIENT_TYPES: &[&str] = &[
    "openai",
    "openai-compat",
    "anthropic",
    "google",
    "azure",
    "bedrock",
    "mistral",
    "xai",
    "ollama",
    "dashscope",
    "deepseek",
    "zai-global",
    "zai-cn",
    "zai-coding-global",
    "zai-coding-cn",
    "minimax-global",
    "minimax-cn",
    "moonshot-global",
    "moonshot-cn",
    "volcengine",
    "volcengine-coding",
    "qianfan",
    "groq",
    "openrouter",
    "together",
    "fireworks",
    "perplexity",
];

/// Trim and lowercase a client type, returning it only when supported.
pub fn normalize_client_type(raw: &str) -> Option<String> {
    let ct = raw.trim().to_lowercase();
    SUPPORTED_CLIENT_TYPES.contains(&ct.as_str()).then_some(ct)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelType {
    #[default]
    Chat,
    Embedding,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatModel {
    /// Internal row id
    pub id: String,
    /// Provider-facing model id, e.g. `gpt-4o`
    pub model_id: String,
    pub provider_id: String,
    pub model_type: ModelType,
    /// Input modalities (`text`, `image`, ...)
    pub input: Vec<String>,
    pub context_window: i64,
    pub reasoning: bool,
    pub max_tokens: i64,
    /// Row id of the model to fail over to
    pub fallback_model_id: String,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmProvider {
    pub id: String,
    pub name: String,
    pub client_type: String,
    pub api_key: String,
    pub base_url: String,
}

impl std::fmt::Debug for LlmProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmProvider")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("client_type", &self.client_type)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[async_trait]
pub trait ModelRegistry: Send + Sync {
    async fn get_by_model_id(&self, model_id: &str) -> Result<ChatModel, StoreError>;

    async fn get_by_id(&self, id: &str) -> Result<ChatModel, StoreError>;

    /// Models of the given type whose provider has this client type.
    async fn list_by_client_type(
        &self,
        client_type: &str,
        model_type: ModelType,
    ) -> Result<Vec<ChatModel>, StoreError>;

    async fn provider_by_id(&self, provider_id: &str) -> Result<LlmProvider, StoreError>;
}
