//! Scheduled and heartbeat triggers.
//!
//! A trigger runs one agent turn on the bot's own chat (chat id = bot id)
//! through the gateway's trigger-schedule endpoint. Heartbeats additionally
//! close their evolution log with the outcome.

use std::time::Instant;

use flowgate_core::bot::{EvolutionLogUpdate, EvolutionStatus};
use flowgate_core::error::{FlowError, Result};
use flowgate_core::message::{ContentPart, ModelMessage, Role};
use flowgate_core::request::ChatRequest;
use flowgate_core::text::truncate;
use flowgate_core::trigger::{HeartbeatPayload, SchedulePayload};
use flowgate_gateway::{GatewaySchedule, TriggerScheduleRequest, extract_file_attachments, with_gateway_retry};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::failover::gateway_failure;
use crate::resolver::Resolver;

pub const TRIGGER_TYPE_SCHEDULE: &str = "schedule";
pub const TRIGGER_TYPE_HEARTBEAT: &str = "heartbeat";

/// Name of the agent tool that delivers a message to the user.
pub const SEND_TOOL: &str = "send";

/// Longest tool-result excerpt used for fallback delivery.
pub const TOOL_RESULT_SUMMARY_LIMIT: usize = 400;

const EVOLUTION_SUMMARY_LIMIT: usize = 500;
const EVOLUTION_SKIP_MARKERS: [&str; 2] = ["no evolution needed", "no changes needed"];
const TOOL_RESULT_TEXT_FIELDS: [&str; 6] = ["stdout", "output", "text", "message", "result", "content"];

/// Everything one trigger run needs.
#[derive(Debug, Clone, Default)]
pub struct TriggerParams {
    pub bot_id: String,
    pub query: String,
    pub owner_user_id: String,
    pub display_name: String,
    pub schedule: GatewaySchedule,
    /// Usage source recorded for the run
    pub usage_type: String,
    pub evolution_log_id: String,
    pub history_limit_override: i64,
    pub platform: String,
    pub reply_target: String,
}

impl TriggerParams {
    fn is_heartbeat(&self) -> bool {
        self.schedule.trigger_type == TRIGGER_TYPE_HEARTBEAT
    }
}

impl Resolver {
    /// Run a scheduled command.
    pub async fn trigger_schedule(&self, bot_id: &str, payload: SchedulePayload, token: &str) -> Result<()> {
        info!(
            bot_id = %bot_id,
            schedule_id = %payload.id,
            platform = %payload.platform,
            reply_target = %payload.reply_target,
            "Schedule trigger starting"
        );
        if bot_id.trim().is_empty() {
            return Err(FlowError::Validation("bot id is required".into()));
        }
        if payload.command.trim().is_empty() {
            return Err(FlowError::Validation("schedule command is required".into()));
        }

        let params = TriggerParams {
            bot_id: bot_id.to_string(),
            query: payload.command.clone(),
            owner_user_id: payload.owner_user_id,
            display_name: "Scheduler".into(),
            schedule: GatewaySchedule {
                id: payload.id,
                name: payload.name,
                description: payload.description,
                pattern: payload.pattern,
                max_calls: payload.max_calls,
                command: payload.command,
                trigger_type: TRIGGER_TYPE_SCHEDULE.into(),
            },
            usage_type: TRIGGER_TYPE_SCHEDULE.into(),
            platform: payload.platform,
            reply_target: payload.reply_target,
            ..Default::default()
        };
        self.execute_trigger(params, token)
            .await
            .inspect_err(|e| warn!(bot_id = %bot_id, error = %e, "Schedule trigger failed"))
    }

    /// Run a heartbeat (self-evolution) prompt.
    pub async fn trigger_heartbeat(&self, bot_id: &str, payload: HeartbeatPayload, token: &str) -> Result<()> {
        info!(bot_id = %bot_id, heartbeat_id = %payload.heartbeat_id, reason = %payload.reason, "Heartbeat trigger starting");
        if bot_id.trim().is_empty() {
            return Err(FlowError::Validation("bot id is required".into()));
        }
        if payload.prompt.trim().is_empty() {
            return Err(FlowError::Validation("heartbeat prompt is required".into()));
        }

        let params = TriggerParams {
            bot_id: bot_id.to_string(),
            query: payload.prompt.clone(),
            owner_user_id: payload.owner_user_id,
            display_name: "Heartbeat".into(),
            schedule: GatewaySchedule {
                id: payload.heartbeat_id,
                name: TRIGGER_TYPE_HEARTBEAT.into(),
                description: format!("Heartbeat trigger (reason: {})", payload.reason),
                pattern: payload.interval_pattern,
                max_calls: None,
                command: payload.prompt,
                trigger_type: TRIGGER_TYPE_HEARTBEAT.into(),
            },
            usage_type: TRIGGER_TYPE_HEARTBEAT.into(),
            evolution_log_id: payload.evolution_log_id,
            history_limit_override: self.evolution_history_limit,
            ..Default::default()
        };
        self.execute_trigger(params, token)
            .await
            .inspect_err(|e| warn!(bot_id = %bot_id, error = %e, "Heartbeat trigger failed"))
    }

    /// Resolve, post to trigger-schedule, deliver and store.
    pub async fn execute_trigger(&self, params: TriggerParams, token: &str) -> Result<()> {
        if params.schedule.id.trim().is_empty() {
            return Err(FlowError::Validation("trigger pre-validation: schedule id is required".into()));
        }
        if params.schedule.command.trim().is_empty() {
            return Err(FlowError::Validation(
                "trigger pre-validation: schedule command is required".into(),
            ));
        }
        info!(
            bot_id = %params.bot_id,
            usage_type = %params.usage_type,
            platform = %params.platform,
            reply_target = %params.reply_target,
            query = %truncate(&params.query, 200),
            "Trigger channel routing"
        );

        let task_type = if params.is_heartbeat() {
            TRIGGER_TYPE_HEARTBEAT
        } else {
            TRIGGER_TYPE_SCHEDULE
        };
        let mut req = ChatRequest {
            bot_id: params.bot_id.clone(),
            chat_id: params.bot_id.clone(),
            query: params.query.clone(),
            user_id: params.owner_user_id.clone(),
            token: token.to_string(),
            history_limit_override: params.history_limit_override,
            current_channel: params.platform.clone(),
            reply_target: params.reply_target.clone(),
            task_type: task_type.into(),
            ..Default::default()
        };
        if !params.platform.is_empty() {
            req.channels = vec![params.platform.clone()];
        }

        let rc = match self.resolve(&req).await {
            Ok(rc) => rc,
            Err(e) => {
                warn!(bot_id = %params.bot_id, error = %e, "Trigger resolve failed");
                self.fail_evolution_log(&params.evolution_log_id, &e).await;
                return Err(e);
            }
        };

        let mut payload = rc.payload.clone();
        payload.identity.channel_identity_id = params.owner_user_id.trim().to_string();
        payload.identity.display_name = params.display_name.clone();
        if !params.platform.is_empty() {
            payload.identity.current_platform = params.platform.clone();
            payload.current_channel = params.platform.clone();
            if payload.channels.is_empty() {
                payload.channels = vec![params.platform.clone()];
            }
        }
        if !params.reply_target.is_empty() {
            payload.identity.reply_target = params.reply_target.clone();
        }
        let trigger_req = TriggerScheduleRequest {
            request: payload,
            schedule: params.schedule.clone(),
        };
        info!(
            step = "llm_request_sent",
            bot_id = %params.bot_id,
            trace_id = %rc.trace_id,
            model = %rc.model.model_id,
            provider = %rc.provider.client_type,
            message_count = trigger_req.request.messages.len(),
            schedule_id = %params.schedule.id,
            "Trigger request sent ({})",
            params.usage_type
        );

        // Triggers are not tied to a client connection, so nothing cancels them.
        let never = CancellationToken::new();
        let started = Instant::now();
        let resp = match with_gateway_retry(&never, || self.gateway.trigger_schedule(&trigger_req, token)).await {
            Ok(resp) => resp,
            Err(e) => {
                let err = gateway_failure(e);
                warn!(
                    step = "llm_response_received",
                    bot_id = %params.bot_id,
                    trace_id = %rc.trace_id,
                    error = %err,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "Trigger request failed"
                );
                self.fail_evolution_log(&params.evolution_log_id, &err).await;
                return Err(err);
            }
        };
        info!(
            step = "llm_response_received",
            bot_id = %params.bot_id,
            trace_id = %rc.trace_id,
            model = %rc.model.model_id,
            response_length = resp.messages.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Trigger response received ({})",
            params.usage_type
        );

        self.record_usage(&params.bot_id, resp.usage, &rc.model.model_id, &params.usage_type);
        if !params.evolution_log_id.trim().is_empty() {
            self.complete_evolution_log(evolution_update(&params.evolution_log_id, &resp.messages))
                .await;
        }

        if !params.is_heartbeat() {
            self.deliver_fallback(&params, &resp.messages).await;
        }

        req.file_attachments = extract_file_attachments(&resp.attachments);
        self.store_round(&req, &rc.trace_id, resp.messages, resp.usage)
            .await
            .inspect_err(|e| warn!(bot_id = %params.bot_id, error = %e, "Trigger store round failed"))
    }

    /// Push the reply to the channel when the agent did not call `send`.
    async fn deliver_fallback(&self, params: &TriggerParams, messages: &[ModelMessage]) {
        let Some(sender) = &self.trigger_sender else {
            return;
        };
        if params.platform.trim().is_empty() || params.reply_target.trim().is_empty() || has_send_tool_call(messages)
        {
            return;
        }
        let Some((text, source)) = fallback_delivery_text(messages) else {
            return;
        };
        info!(
            bot_id = %params.bot_id,
            platform = %params.platform,
            reply_target = %params.reply_target,
            source,
            text_preview = %truncate(&text, 100),
            "Agent skipped send tool, delivering fallback"
        );
        if let Err(e) = sender
            .send_text(&params.bot_id, &params.platform, &params.reply_target, &text)
            .await
        {
            warn!(bot_id = %params.bot_id, error = %e, "Fallback send failed");
        }
    }

    async fn complete_evolution_log(&self, update: EvolutionLogUpdate) {
        let log_id = update.log_id.clone();
        if let Err(e) = self.bots.complete_evolution_log(update).await {
            warn!(log_id = %log_id, error = %e, "Complete evolution log failed");
        }
    }

    async fn fail_evolution_log(&self, log_id: &str, err: &FlowError) {
        if log_id.trim().is_empty() {
            return;
        }
        self.complete_evolution_log(evolution_failure(log_id, err)).await;
    }
}

/// Whether any assistant message calls the `send` tool, either as a legacy
/// tool call or as a tool-call content part.
pub fn has_send_tool_call(messages: &[ModelMessage]) -> bool {
    messages.iter().filter(|m| m.role == Role::Assistant).any(|m| {
        m.tool_calls.iter().any(|tc| tc.function.name == SEND_TOOL)
            || m.content.as_ref().is_some_and(|c| {
                c.parts()
                    .iter()
                    .any(|p| matches!(p, ContentPart::ToolCall { tool_name, .. } if tool_name == SEND_TOOL))
            })
    })
}

/// Text of the last assistant message that has any.
pub fn last_assistant_text(messages: &[ModelMessage]) -> Option<String> {
    messages
        .iter()
        .rev()
        .filter(|m| m.role == Role::Assistant)
        .map(ModelMessage::text_content)
        .find(|text| !text.is_empty())
}

/// A readable excerpt of the most recent tool result.
///
/// Plain-text tool messages are used directly. Structured results prefer a
/// well-known text field and fall back to the raw JSON.
pub fn last_tool_result_summary(messages: &[ModelMessage]) -> Option<String> {
    for message in messages.iter().rev().filter(|m| m.role == Role::Tool) {
        let text = message.text_content();
        let text = text.trim();
        if !text.is_empty() {
            return Some(truncate(text, TOOL_RESULT_SUMMARY_LIMIT));
        }
        let Some(content) = &message.content else {
            continue;
        };
        for part in content.parts().iter().rev() {
            if let ContentPart::ToolResult { result, .. } = part {
                if let Some(summary) = summarize_tool_result(result) {
                    return Some(summary);
                }
            }
        }
    }
    None
}

fn summarize_tool_result(result: &Value) -> Option<String> {
    match result {
        Value::String(s) if !s.trim().is_empty() => Some(truncate(s.trim(), TOOL_RESULT_SUMMARY_LIMIT)),
        Value::Object(obj) => {
            let field = TOOL_RESULT_TEXT_FIELDS
                .iter()
                .filter_map(|key| obj.get(*key).and_then(Value::as_str))
                .map(str::trim)
                .find(|s| !s.is_empty());
            if let Some(field) = field {
                return Some(truncate(field, TOOL_RESULT_SUMMARY_LIMIT));
            }
            if obj.is_empty() {
                return None;
            }
            Some(truncate(&result.to_string(), TOOL_RESULT_SUMMARY_LIMIT))
        }
        _ => None,
    }
}

/// Text to deliver when the agent did not send anything itself, with its
/// source (`assistant_text` or `tool_result`).
pub fn fallback_delivery_text(messages: &[ModelMessage]) -> Option<(String, &'static str)> {
    if let Some(text) = last_assistant_text(messages).filter(|t| !t.trim().is_empty()) {
        return Some((text, "assistant_text"));
    }
    last_tool_result_summary(messages).map(|text| (text, "tool_result"))
}

/// Evolution log outcome derived from the agent's reply.
pub fn evolution_update(log_id: &str, messages: &[ModelMessage]) -> EvolutionLogUpdate {
    let agent_text = messages
        .iter()
        .filter(|m| m.role == Role::Assistant)
        .map(ModelMessage::text_content)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    let agent_text = agent_text.trim().to_string();

    let lower = agent_text.to_lowercase();
    let status = if EVOLUTION_SKIP_MARKERS.iter().any(|m| lower.contains(m)) {
        EvolutionStatus::Skipped
    } else {
        EvolutionStatus::Completed
    };

    let summary = match agent_text.find("\n\n") {
        Some(idx) if idx > 0 && idx < EVOLUTION_SUMMARY_LIMIT => agent_text[..idx].to_string(),
        _ => truncate(&agent_text, EVOLUTION_SUMMARY_LIMIT),
    };

    EvolutionLogUpdate {
        log_id: log_id.to_string(),
        status,
        changes_summary: Some(summary).filter(|s| !s.is_empty()),
        agent_response: Some(agent_text).filter(|s| !s.is_empty()),
    }
}

pub fn evolution_failure(log_id: &str, err: &FlowError) -> EvolutionLogUpdate {
    EvolutionLogUpdate {
        log_id: log_id.to_string(),
        status: EvolutionStatus::Failed,
        changes_summary: Some(format!("Error: {err}")),
        agent_response: None,
    }
}

#[cfg(test)]
mod tests {
    use flowgate_core::message::ToolCall;
    use serde_json::json;

    use super::*;

    fn tool_result_message(result: Value) -> ModelMessage {
        ModelMessage::with_parts(
            Role::Tool,
            vec![ContentPart::ToolResult {
                tool_call_id: "c1".into(),
                tool_name: "exec".into(),
                result,
            }],
        )
    }

    // ── Send detection ──

    #[test]
    fn send_detected_in_legacy_tool_calls() {
        let msg = ModelMessage::assistant("").with_tool_calls(vec![ToolCall::function("c1", "send", "{}")]);
        assert!(has_send_tool_call(&[msg]));
    }

    #[test]
    fn send_detected_in_tool_call_parts() {
        let msg = ModelMessage::with_parts(
            Role::Assistant,
            vec![ContentPart::ToolCall {
                tool_call_id: "c1".into(),
                tool_name: "send".into(),
                input: json!({"text": "hi"}),
            }],
        );
        assert!(has_send_tool_call(&[msg]));
    }

    #[test]
    fn send_ignored_outside_assistant_messages() {
        let user = ModelMessage::user("").with_tool_calls(vec![ToolCall::function("c1", "send", "{}")]);
        let other_tool = ModelMessage::assistant("").with_tool_calls(vec![ToolCall::function("c2", "exec", "{}")]);
        assert!(!has_send_tool_call(&[user, other_tool]));
    }

    // ── Fallback text ──

    #[test]
    fn fallback_prefers_last_assistant_text() {
        let messages = vec![
            ModelMessage::assistant("first"),
            ModelMessage::tool_result("c1", "tool out"),
            ModelMessage::assistant("final answer"),
        ];
        assert_eq!(
            fallback_delivery_text(&messages),
            Some(("final answer".to_string(), "assistant_text"))
        );
    }

    #[test]
    fn fallback_uses_plain_tool_text() {
        let messages = vec![ModelMessage::assistant(""), ModelMessage::tool_result("c1", "  disk ok  ")];
        assert_eq!(
            fallback_delivery_text(&messages),
            Some(("disk ok".to_string(), "tool_result"))
        );
    }

    #[test]
    fn tool_result_prefers_known_fields() {
        let messages = vec![tool_result_message(json!({"exit_code": 0, "stdout": "42 files"}))];
        assert_eq!(last_tool_result_summary(&messages).as_deref(), Some("42 files"));

        let messages = vec![tool_result_message(json!({"stdout": "  ", "message": "done"}))];
        assert_eq!(last_tool_result_summary(&messages).as_deref(), Some("done"));
    }

    #[test]
    fn tool_result_falls_back_to_raw_json() {
        let messages = vec![tool_result_message(json!({"count": 3}))];
        assert_eq!(last_tool_result_summary(&messages).as_deref(), Some(r#"{"count":3}"#));

        assert!(last_tool_result_summary(&[tool_result_message(json!({}))]).is_none());
        assert!(last_tool_result_summary(&[tool_result_message(Value::Null)]).is_none());
    }

    #[test]
    fn tool_result_summary_is_truncated() {
        let long = "x".repeat(1000);
        let summary = last_tool_result_summary(&[tool_result_message(json!(long))]).unwrap();
        assert_eq!(summary.len(), TOOL_RESULT_SUMMARY_LIMIT + 3);
        assert!(summary.ends_with("..."));
    }

    // ── Evolution log ──

    #[test]
    fn evolution_skipped_on_marker() {
        let update = evolution_update("log-1", &[ModelMessage::assistant("Reviewed memory. No Changes Needed.")]);
        assert_eq!(update.status, EvolutionStatus::Skipped);
        assert_eq!(update.log_id, "log-1");
    }

    #[test]
    fn evolution_summary_is_first_paragraph() {
        let update = evolution_update(
            "log-1",
            &[ModelMessage::assistant("Updated persona.\n\nDetails follow here.")],
        );
        assert_eq!(update.status, EvolutionStatus::Completed);
        assert_eq!(update.changes_summary.as_deref(), Some("Updated persona."));
        assert_eq!(
            update.agent_response.as_deref(),
            Some("Updated persona.\n\nDetails follow here.")
        );
    }

    #[test]
    fn evolution_summary_truncates_long_text() {
        let text = "y".repeat(600);
        let update = evolution_update("log-1", &[ModelMessage::assistant(text)]);
        let summary = update.changes_summary.unwrap();
        assert_eq!(summary.len(), EVOLUTION_SUMMARY_LIMIT + 3);
    }

    #[test]
    fn evolution_without_text_has_no_summary() {
        let update = evolution_update("log-1", &[]);
        assert_eq!(update.status, EvolutionStatus::Completed);
        assert!(update.changes_summary.is_none());
        assert!(update.agent_response.is_none());
    }

    #[test]
    fn evolution_failure_carries_error() {
        let update = evolution_failure("log-2", &FlowError::Validation("boom".into()));
        assert_eq!(update.status, EvolutionStatus::Failed);
        assert_eq!(update.changes_summary.as_deref(), Some("Error: Validation error: boom"));
        assert!(update.agent_response.is_none());
    }
}
