//! Inbound chat requests and the responses returned to callers.

use serde::{Deserialize, Serialize};

use crate::message::ModelMessage;

/// Task types that run on the bot's background model.
pub const BACKGROUND_TASK_TYPES: [&str; 3] = ["heartbeat", "schedule", "subagent"];

/// A single chat turn as submitted by a channel or API handler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub bot_id: String,
    pub chat_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub source_channel_identity_id: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub route_id: String,
    #[serde(default)]
    pub external_message_id: String,

    pub query: String,

    /// Messages appended after history, memory and knowledge context
    #[serde(default)]
    pub messages: Vec<ModelMessage>,

    /// Explicit model id; overrides all settings-based selection
    #[serde(default)]
    pub model: String,
    /// Client-type filter applied when `model` is set
    #[serde(default)]
    pub provider: String,
    /// `chat`, `heartbeat`, `schedule`, `subagent`, ...
    #[serde(default)]
    pub task_type: String,

    #[serde(default)]
    pub current_channel: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub allowed_actions: Vec<String>,
    #[serde(default)]
    pub reply_target: String,
    /// `""`, `p2p`, `private`, `direct`, `group`, ...
    #[serde(default)]
    pub conversation_type: String,

    /// History window in minutes; negative disables history loading
    #[serde(default)]
    pub max_context_load_time: i64,
    #[serde(default)]
    pub history_limit_override: i64,

    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub container_id: String,

    /// Authorization forwarded verbatim to the gateway
    #[serde(default)]
    pub token: String,
    /// Session token exposed to the agent through its identity block
    #[serde(default)]
    pub chat_token: String,

    /// The caller already persisted the user message for this turn
    #[serde(default)]
    pub user_message_persisted: bool,

    #[serde(default)]
    pub file_attachments: Vec<FileAttachment>,
}

impl ChatRequest {
    pub fn new(bot_id: impl Into<String>, chat_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            bot_id: bot_id.into(),
            chat_id: chat_id.into(),
            query: query.into(),
            ..Default::default()
        }
    }

    /// Whether this turn runs as a background task.
    pub fn is_background_task(&self) -> bool {
        let task = self.task_type.trim().to_lowercase();
        BACKGROUND_TASK_TYPES.contains(&task.as_str())
    }

    /// Direct conversations get a longer default history.
    pub fn is_direct_conversation(&self) -> bool {
        matches!(
            self.conversation_type.trim().to_lowercase().as_str(),
            "" | "p2p" | "private" | "direct"
        )
    }
}

/// Token accounting reported by the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }
}

/// A file produced during a turn, attached to the final assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub path: String,
    pub name: String,
}

impl FileAttachment {
    /// Build an attachment whose name is the basename of `path`.
    pub fn from_path(path: impl Into<String>) -> Self {
        let path = path.into();
        let name = std::path::Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.clone());
        Self { path, name }
    }
}

/// Result of a synchronous chat turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatResponse {
    pub messages: Vec<ModelMessage>,
    #[serde(default)]
    pub skills: Vec<String>,
    pub model: String,
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

/// A raw JSON payload from one `data:` line of the gateway stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk(pub String);

impl StreamChunk {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_name_is_basename() {
        let a = FileAttachment::from_path("/data/out/report.pdf");
        assert_eq!(a.name, "report.pdf");
        assert_eq!(a.path, "/data/out/report.pdf");
    }

    #[test]
    fn background_task_detection() {
        let mut req = ChatRequest::new("b", "c", "q");
        assert!(!req.is_background_task());
        req.task_type = " Heartbeat ".into();
        assert!(req.is_background_task());
        req.task_type = "subagent".into();
        assert!(req.is_background_task());
    }

    #[test]
    fn direct_conversation_types() {
        let mut req = ChatRequest::new("b", "c", "q");
        assert!(req.is_direct_conversation());
        for t in ["p2p", "private", "direct"] {
            req.conversation_type = t.into();
            assert!(req.is_direct_conversation());
        }
        req.conversation_type = "group".into();
        assert!(!req.is_direct_conversation());
    }
}
