//! Message domain types exchanged with the agent gateway.
//!
//! A [`ModelMessage`] mirrors the provider-neutral message shape the gateway
//! speaks. Content is either a plain string or a list of typed parts; parts
//! the runtime does not understand are preserved verbatim in
//! [`ContentPart::Other`] so they round-trip unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The role of a message sender in a conversation.
///
/// Unknown roles (e.g. legacy `function`) are kept as [`Role::Other`] so
/// parsing never fails on them; the sanitizer removes them later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// System instructions and injected context
    System,
    /// Tool execution result
    Tool,
    /// Anything else, kept as sent
    Other(String),
}

impl Role {
    /// Parse a role string, ignoring surrounding whitespace.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "user" => Role::User,
            "assistant" => Role::Assistant,
            "system" => Role::System,
            "tool" => Role::Tool,
            other => Role::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
            Role::Other(raw) => raw,
        }
    }

    /// Whether the gateway accepts this role.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Role::Other(_))
    }
}

impl From<String> for Role {
    fn from(raw: String) -> Self {
        Role::parse(&raw)
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A legacy (OpenAI-style) tool call attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,

    #[serde(default = "default_tool_call_type", rename = "type")]
    pub kind: String,

    #[serde(default)]
    pub function: ToolFunction,
}

fn default_tool_call_type() -> String {
    "function".into()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolFunction {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: default_tool_call_type(),
            function: ToolFunction {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// One element of a structured message body.
///
/// Serialized through `serde_json::Value` so that unknown part types are
/// kept as-is instead of failing the whole message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ContentPart {
    Text {
        text: String,
    },
    Reasoning {
        text: String,
    },
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        input: Value,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: Value,
    },
    /// A part with an unrecognized or incomplete shape.
    Other(Value),
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ContentPart::ToolCall {
            tool_call_id: id.into(),
            tool_name: name.into(),
            input,
        }
    }

    pub fn tool_result(id: impl Into<String>, name: impl Into<String>, result: Value) -> Self {
        ContentPart::ToolResult {
            tool_call_id: id.into(),
            tool_name: name.into(),
            result,
        }
    }
}

impl From<Value> for ContentPart {
    fn from(value: Value) -> Self {
        let field = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
        let part = match kind {
            "text" => field("text").map(|text| ContentPart::Text { text }),
            "reasoning" => field("text").map(|text| ContentPart::Reasoning { text }),
            "tool-call" => field("toolCallId").map(|tool_call_id| ContentPart::ToolCall {
                tool_call_id,
                tool_name: field("toolName").unwrap_or_default(),
                input: value
                    .get("input")
                    .or_else(|| value.get("args"))
                    .cloned()
                    .unwrap_or(Value::Null),
            }),
            "tool-result" => field("toolCallId").map(|tool_call_id| ContentPart::ToolResult {
                tool_call_id,
                tool_name: field("toolName").unwrap_or_default(),
                result: value
                    .get("result")
                    .or_else(|| value.get("output"))
                    .cloned()
                    .unwrap_or(Value::Null),
            }),
            _ => None,
        };
        part.unwrap_or(ContentPart::Other(value))
    }
}

impl From<ContentPart> for Value {
    fn from(part: ContentPart) -> Self {
        let mut obj = Map::new();
        match part {
            ContentPart::Text { text } => {
                obj.insert("type".into(), "text".into());
                obj.insert("text".into(), text.into());
            }
            ContentPart::Reasoning { text } => {
                obj.insert("type".into(), "reasoning".into());
                obj.insert("text".into(), text.into());
            }
            ContentPart::ToolCall { tool_call_id, tool_name, input } => {
                obj.insert("type".into(), "tool-call".into());
                obj.insert("toolCallId".into(), tool_call_id.into());
                obj.insert("toolName".into(), tool_name.into());
                if !input.is_null() {
                    obj.insert("input".into(), input);
                }
            }
            ContentPart::ToolResult { tool_call_id, tool_name, result } => {
                obj.insert("type".into(), "tool-result".into());
                obj.insert("toolCallId".into(), tool_call_id.into());
                obj.insert("toolName".into(), tool_name.into());
                obj.insert("result".into(), result);
            }
            ContentPart::Other(value) => return value,
        }
        Value::Object(obj)
    }
}

/// Message body: plain text or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
    /// Any other JSON shape, preserved verbatim.
    Other(Value),
}

impl MessageContent {
    /// Concatenated visible text. Reasoning parts are skipped.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
            MessageContent::Other(_) => String::new(),
        }
    }

    pub fn parts(&self) -> &[ContentPart] {
        match self {
            MessageContent::Parts(parts) => parts,
            _ => &[],
        }
    }

    /// True when the body carries something besides tool-call requests.
    pub fn has_content(&self) -> bool {
        match self {
            MessageContent::Text(text) => !text.trim().is_empty(),
            MessageContent::Parts(parts) => parts.iter().any(|p| match p {
                ContentPart::Text { text } | ContentPart::Reasoning { text } => !text.trim().is_empty(),
                ContentPart::ToolCall { .. } => false,
                ContentPart::ToolResult { .. } | ContentPart::Other(_) => true,
            }),
            MessageContent::Other(value) => !value.is_null(),
        }
    }
}

/// A single message in the provider-neutral gateway format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,

    /// If this is a tool result, which tool call it responds to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_call_id: String,

    /// Legacy tool calls requested by the assistant
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl ModelMessage {
    pub fn new(role: Role, content: Option<MessageContent>) -> Self {
        Self {
            role,
            content,
            tool_call_id: String::new(),
            tool_calls: Vec::new(),
            name: String::new(),
        }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, Some(MessageContent::Text(text.into())))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    /// A tool result message with plain-text content.
    pub fn tool_result(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            ..Self::text(Role::Tool, text)
        }
    }

    /// A message with structured content parts.
    pub fn with_parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self::new(role, Some(MessageContent::Parts(parts)))
    }

    pub fn with_tool_calls(mut self, calls: Vec<ToolCall>) -> Self {
        self.tool_calls = calls;
        self
    }

    /// Visible text of the message (empty when there is none).
    pub fn text_content(&self) -> String {
        self.content.as_ref().map(MessageContent::text).unwrap_or_default()
    }

    pub fn has_content(&self) -> bool {
        self.content.as_ref().is_some_and(MessageContent::has_content)
    }

    pub fn parts(&self) -> &[ContentPart] {
        self.content.as_ref().map(MessageContent::parts).unwrap_or(&[])
    }

    /// Non-blank tool-call ids from both the legacy `tool_calls` field and
    /// `tool-call` content parts, in message order.
    pub fn assistant_tool_call_ids(&self) -> Vec<String> {
        let legacy = self
            .tool_calls
            .iter()
            .map(|tc| tc.id.as_str())
            .filter(|id| !id.trim().is_empty());
        let parts = self.parts().iter().filter_map(|p| match p {
            ContentPart::ToolCall { tool_call_id, .. } if !tool_call_id.trim().is_empty() => {
                Some(tool_call_id.as_str())
            }
            _ => None,
        });
        legacy.chain(parts).map(str::to_string).collect()
    }
}
