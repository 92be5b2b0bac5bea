//! Long-term memory service interface.
//!
//! The memory service is an opaque ranked-result producer: it returns scored
//! items for a query within a namespace and scope, and accepts new messages
//! for extraction. Ranking internals (vector, keyword, hybrid) live behind
//! the trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::MemoryError;
use crate::message::ModelMessage;

/// Namespace holding per-bot memories.
pub const NAMESPACE_BOT: &str = "bot";
/// Namespace holding cross-bot solutions.
pub const NAMESPACE_SOLUTIONS: &str = "solutions";
/// Scope used for the shared solutions namespace.
pub const SCOPE_GLOBAL: &str = "global";

/// A single memory as returned by the service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryItem {
    pub id: String,
    pub memory: String,
    /// Relevance score set by search
    pub score: f64,
    /// RFC3339 or `YYYY-MM-DDTHH:MM:SS`
    pub created_at: String,
    pub updated_at: String,
}

impl MemoryItem {
    pub fn new(id: impl Into<String>, memory: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            memory: memory.into(),
            score,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub bot_id: String,
    pub namespace: String,
    pub scope_id: String,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddRequest {
    pub messages: Vec<ModelMessage>,
    pub bot_id: String,
    pub namespace: String,
    pub scope_id: String,
}

#[async_trait]
pub trait MemoryService: Send + Sync {
    async fn search(&self, req: SearchRequest) -> Result<Vec<MemoryItem>, MemoryError>;

    /// Extract and store memories from a batch of messages.
    async fn add(&self, req: AddRequest) -> Result<Vec<MemoryItem>, MemoryError>;
}
