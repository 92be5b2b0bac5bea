//! Wire types of the agent gateway HTTP API (camelCase JSON).

use flowgate_core::message::ModelMessage;
use flowgate_core::request::{FileAttachment, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn is_false(b: &bool) -> bool {
    !*b
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

/// Model and provider credentials the gateway should call.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayModelConfig {
    pub model_id: String,
    pub client_type: String,
    #[serde(default)]
    pub input: Vec<String>,
    pub api_key: String,
    pub base_url: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub reasoning: bool,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub max_tokens: i64,
}

impl std::fmt::Debug for GatewayModelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayModelConfig")
            .field("model_id", &self.model_id)
            .field("client_type", &self.client_type)
            .field("input", &self.input)
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .field("reasoning", &self.reasoning)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// Who the agent is acting as and for whom.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayIdentity {
    pub bot_id: String,
    pub container_id: String,
    pub channel_identity_id: String,
    pub display_name: String,
    pub current_platform: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub conversation_type: String,
    pub reply_target: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub session_token: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewaySkill {
    pub name: String,
    pub description: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl GatewaySkill {
    pub fn is_pinned(&self) -> bool {
        self.metadata.get("enabled").and_then(Value::as_bool) == Some(true)
    }
}

/// Payload of `POST /chat/` and `POST /chat/stream`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayRequest {
    pub model: GatewayModelConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_model: Option<GatewayModelConfig>,
    /// History window in minutes
    pub active_context_time: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub language: String,
    pub timezone: String,
    pub channels: Vec<String>,
    pub current_channel: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_actions: Vec<String>,
    pub messages: Vec<ModelMessage>,
    pub skills: Vec<String>,
    pub usable_skills: Vec<GatewaySkill>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query: String,
    pub identity: GatewayIdentity,
    /// Always sent as an empty array
    pub attachments: Vec<Value>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bot_identity: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bot_soul: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bot_task: String,
    pub allow_self_evolution: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

impl From<GatewayUsage> for TokenUsage {
    fn from(u: GatewayUsage) -> Self {
        TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayFileAttachment {
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub path: String,
}

/// Keep `file` attachments with a non-blank path, deduplicated by path.
pub fn extract_file_attachments(raw: &[GatewayFileAttachment]) -> Vec<FileAttachment> {
    let mut out: Vec<FileAttachment> = Vec::new();
    for a in raw {
        if a.kind != "file" {
            continue;
        }
        let path = a.path.trim();
        if path.is_empty() || out.iter().any(|f| f.path == path) {
            continue;
        }
        out.push(FileAttachment::from_path(path));
    }
    out
}

/// Response of `/chat/` and `/chat/trigger-schedule`, and the terminal
/// stream payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    #[serde(default)]
    pub messages: Vec<ModelMessage>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<GatewayUsage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<GatewayFileAttachment>,
}

/// Schedule descriptor sent with `/chat/trigger-schedule`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySchedule {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_calls: Option<i64>,
    pub command: String,
    /// `schedule` or `heartbeat`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trigger_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerScheduleRequest {
    #[serde(flatten)]
    pub request: GatewayRequest,
    pub schedule: GatewaySchedule,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizeRequest {
    pub model: GatewayModelConfig,
    pub messages: Vec<ModelMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummarizeResponse {
    #[serde(default)]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<GatewayUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_uses_camel_case_and_omits_empty_optionals() {
        let req = GatewayRequest {
            model: GatewayModelConfig {
                model_id: "gpt-4o".into(),
                client_type: "openai".into(),
                ..Default::default()
            },
            timezone: "UTC".into(),
            allow_self_evolution: true,
            ..Default::default()
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["model"]["modelId"], "gpt-4o");
        assert_eq!(v["activeContextTime"], 0);
        assert_eq!(v["attachments"], json!([]));
        assert_eq!(v["allowSelfEvolution"], true);
        assert!(v.get("backgroundModel").is_none());
        assert!(v.get("language").is_none());
        assert!(v.get("allowedActions").is_none());
        assert!(v["model"].get("maxTokens").is_none());
        assert!(v["identity"].get("sessionToken").is_none());
    }

    #[test]
    fn trigger_request_flattens_payload() {
        let req = TriggerScheduleRequest {
            request: GatewayRequest {
                timezone: "UTC".into(),
                ..Default::default()
            },
            schedule: GatewaySchedule {
                id: "s1".into(),
                command: "report".into(),
                trigger_type: "heartbeat".into(),
                ..Default::default()
            },
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["timezone"], "UTC");
        assert_eq!(v["schedule"]["triggerType"], "heartbeat");
        assert!(v["schedule"].get("maxCalls").is_none());
    }

    #[test]
    fn response_parses_usage_and_attachments() {
        let resp: GatewayResponse = serde_json::from_value(json!({
            "messages": [{"role": "assistant", "content": "done"}],
            "usage": {"promptTokens": 10, "completionTokens": 5, "totalTokens": 15},
            "attachments": [{"type": "file", "path": "/out/a.txt"}]
        }))
        .unwrap();
        assert_eq!(resp.messages.len(), 1);
        assert_eq!(TokenUsage::from(resp.usage.unwrap()).total_tokens, 15);
        assert!(resp.skills.is_empty());
    }

    #[test]
    fn file_attachments_filtered_and_deduped() {
        let raw = vec![
            GatewayFileAttachment { kind: "file".into(), path: " /out/a.txt ".into() },
            GatewayFileAttachment { kind: "file".into(), path: "/out/a.txt".into() },
            GatewayFileAttachment { kind: "image".into(), path: "/out/b.png".into() },
            GatewayFileAttachment { kind: "file".into(), path: "  ".into() },
        ];
        let out = extract_file_attachments(&raw);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "a.txt");
    }

    #[test]
    fn model_config_debug_redacts_key() {
        let cfg = GatewayModelConfig {
            api_key: "sk-live".into(),
            ..Default::default()
        };
        assert!(!format!("{cfg:?}").contains("sk-live"));
    }
}
