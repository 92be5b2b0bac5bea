//! Server-sent event decoding for `/chat/stream`.
//!
//! The gateway emits `event:` and `data:` lines. Every non-empty data payload
//! is a JSON envelope that is forwarded to the client verbatim; a few
//! envelope types are also interpreted here (tool telemetry, attachment
//! deltas and the terminal message set).

use flowgate_core::text::truncate;
use serde::Deserialize;
use serde_json::Value;

use crate::types::{GatewayFileAttachment, GatewayResponse, GatewayUsage};

/// Max bytes kept from a tool input or result for logging.
pub const TOOL_PAYLOAD_LOG_LIMIT: usize = 2000;

/// One `data:` payload together with the most recent `event:` name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseData {
    pub event: String,
    pub data: String,
}

/// Line-oriented SSE decoder. The event name persists until the next
/// `event:` line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    current_event: String,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one raw line. Returns a payload for non-empty `data:` lines other
    /// than `[DONE]`.
    pub fn decode(&mut self, line: &str) -> Option<SseData> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        if let Some(event) = line.strip_prefix("event:") {
            self.current_event = event.trim().to_string();
            return None;
        }
        let data = line.strip_prefix("data:")?.trim();
        if data.is_empty() || data == "[DONE]" {
            return None;
        }
        Some(SseData {
            event: self.current_event.clone(),
            data: data.to_string(),
        })
    }

    pub fn current_event(&self) -> &str {
        &self.current_event
    }
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default)]
    messages: Vec<flowgate_core::message::ModelMessage>,
    #[serde(default)]
    usage: Option<GatewayUsage>,
    #[serde(default)]
    attachments: Vec<GatewayFileAttachment>,
}

fn parse_response(data: &str) -> Option<GatewayResponse> {
    serde_json::from_str::<GatewayResponse>(data)
        .ok()
        .filter(|r| !r.messages.is_empty())
}

/// Find the final message set of a run in a data payload.
///
/// Shapes are tried in order:
/// 1. `event: done` with a response body
/// 2. an envelope of type `agent_end` or `done` carrying `messages`
/// 3. an envelope of type `done` with the response nested under `data`
/// 4. a bare `{"messages": [...]}` body
pub fn detect_terminal(event: &str, data: &str) -> Option<GatewayResponse> {
    if event == "done" {
        if let Some(resp) = parse_response(data) {
            return Some(resp);
        }
    }

    if let Ok(env) = serde_json::from_str::<Envelope>(data) {
        if (env.kind == "agent_end" || env.kind == "done") && !env.messages.is_empty() {
            return Some(GatewayResponse {
                messages: env.messages,
                skills: Vec::new(),
                usage: env.usage,
                attachments: env.attachments,
            });
        }
        if env.kind == "done" {
            if let Some(nested) = env.data {
                if let Ok(resp) = serde_json::from_value::<GatewayResponse>(nested) {
                    if !resp.messages.is_empty() {
                        return Some(resp);
                    }
                }
            }
        }
    }

    parse_response(data)
}

/// Tool lifecycle notification carried in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolEvent {
    Started {
        tool_name: String,
        tool_call_id: String,
        input: String,
    },
    Completed {
        tool_name: String,
        tool_call_id: String,
        result: String,
    },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolEnvelope {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    tool_name: String,
    #[serde(default)]
    tool_call_id: String,
    #[serde(default)]
    input: Value,
    #[serde(default)]
    result: Value,
}

fn render_value(v: &Value) -> String {
    let text = match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    truncate(&text, TOOL_PAYLOAD_LOG_LIMIT)
}

/// Parse `tool_call_start` / `tool_call_end` envelopes. Input and result are
/// rendered as text and truncated for logging.
pub fn parse_tool_event(data: &str) -> Option<ToolEvent> {
    let env: ToolEnvelope = serde_json::from_str(data).ok()?;
    match env.kind.as_str() {
        "tool_call_start" => Some(ToolEvent::Started {
            input: render_value(&env.input),
            tool_name: env.tool_name,
            tool_call_id: env.tool_call_id,
        }),
        "tool_call_end" => Some(ToolEvent::Completed {
            result: render_value(&env.result),
            tool_name: env.tool_name,
            tool_call_id: env.tool_call_id,
        }),
        _ => None,
    }
}

#[derive(Deserialize)]
struct AttachmentDelta {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    attachments: Vec<GatewayFileAttachment>,
}

/// Attachments announced by an `attachment_delta` envelope; empty for any
/// other payload.
pub fn parse_attachment_delta(data: &str) -> Vec<GatewayFileAttachment> {
    match serde_json::from_str::<AttachmentDelta>(data) {
        Ok(delta) if delta.kind == "attachment_delta" => delta.attachments,
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_tracks_event_and_skips_noise() {
        let mut dec = SseDecoder::new();
        assert_eq!(dec.decode(""), None);
        assert_eq!(dec.decode(": keep-alive"), None);
        assert_eq!(dec.decode("event: done"), None);
        assert_eq!(dec.current_event(), "done");
        assert_eq!(dec.decode("data:   "), None);
        assert_eq!(dec.decode("data: [DONE]"), None);

        let got = dec.decode("  data: {\"type\":\"text_delta\"}\r").unwrap();
        assert_eq!(got.event, "done");
        assert_eq!(got.data, "{\"type\":\"text_delta\"}");
    }

    #[test]
    fn terminal_event_done_body() {
        let resp = detect_terminal("done", r#"{"messages":[{"role":"assistant","content":"hi"}]}"#).unwrap();
        assert_eq!(resp.messages.len(), 1);
    }

    #[test]
    fn terminal_agent_end_envelope_with_usage() {
        let data = r#"{"type":"agent_end","messages":[{"role":"assistant","content":"ok"}],"usage":{"totalTokens":9}}"#;
        let resp = detect_terminal("", data).unwrap();
        assert_eq!(resp.usage.unwrap().total_tokens, 9);
    }

    #[test]
    fn terminal_done_with_nested_data() {
        let data = r#"{"type":"done","data":{"messages":[{"role":"assistant","content":"nested"}]}}"#;
        let resp = detect_terminal("", data).unwrap();
        assert_eq!(resp.messages[0].text_content(), "nested");
    }

    #[test]
    fn terminal_envelope_wins_over_nested_data() {
        let data = r#"{"type":"done","messages":[{"role":"assistant","content":"outer"}],
                       "data":{"messages":[{"role":"assistant","content":"inner"}]}}"#;
        let resp = detect_terminal("", data).unwrap();
        assert_eq!(resp.messages[0].text_content(), "outer");
    }

    #[test]
    fn terminal_bare_messages_and_non_terminals() {
        assert!(detect_terminal("", r#"{"messages":[{"role":"assistant","content":"x"}]}"#).is_some());
        assert!(detect_terminal("", r#"{"type":"text_delta","delta":"x"}"#).is_none());
        assert!(detect_terminal("done", r#"{"messages":[]}"#).is_none());
        assert!(detect_terminal("", "not json").is_none());
    }

    #[test]
    fn tool_events_are_parsed_and_truncated() {
        let big = "a".repeat(3000);
        let start = format!(r#"{{"type":"tool_call_start","toolName":"exec","toolCallId":"c1","input":"{big}"}}"#);
        match parse_tool_event(&start).unwrap() {
            ToolEvent::Started { tool_name, input, .. } => {
                assert_eq!(tool_name, "exec");
                assert_eq!(input.len(), TOOL_PAYLOAD_LOG_LIMIT + 3);
            }
            other => panic!("unexpected {other:?}"),
        }

        let end = r#"{"type":"tool_call_end","toolName":"exec","toolCallId":"c1","result":{"ok":true}}"#;
        assert_eq!(
            parse_tool_event(end),
            Some(ToolEvent::Completed {
                tool_name: "exec".into(),
                tool_call_id: "c1".into(),
                result: r#"{"ok":true}"#.into(),
            })
        );
        assert!(parse_tool_event(r#"{"type":"text_delta"}"#).is_none());
    }

    #[test]
    fn attachment_delta_only_for_its_type() {
        let data = r#"{"type":"attachment_delta","attachments":[{"type":"file","path":"/out/r.pdf"}]}"#;
        let got = parse_attachment_delta(data);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].path, "/out/r.pdf");
        assert!(parse_attachment_delta(r#"{"type":"done","attachments":[{"type":"file","path":"x"}]}"#).is_empty());
    }
}
