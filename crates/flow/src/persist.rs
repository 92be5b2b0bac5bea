//! Round storage: persisting messages, memory and session extraction, usage.
//!
//! Persistence failures are logged and never fail the turn. Extraction and
//! usage recording run detached.

use std::time::Duration;

use flowgate_core::bot::UsageRecord;
use flowgate_core::error::{FlowError, Result};
use flowgate_core::memory::{AddRequest, NAMESPACE_BOT, NAMESPACE_SOLUTIONS, SCOPE_GLOBAL};
use flowgate_core::message::{ModelMessage, Role};
use flowgate_core::request::{ChatRequest, TokenUsage};
use flowgate_core::store::PersistInput;
use flowgate_gateway::GatewayUsage;
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::context::sanitize_messages;
use crate::resolver::Resolver;
use crate::tasks::{spawn_detached, spawn_detached_with_timeout};

const USAGE_RECORD_TIMEOUT: Duration = Duration::from_secs(5);

impl Resolver {
    /// Persist the user's query ahead of the round (streaming path).
    pub async fn persist_user_message(&self, req: &ChatRequest) -> Result<()> {
        if req.bot_id.trim().is_empty() {
            return Err(FlowError::Validation("bot id is required for persistence".into()));
        }
        let text = req.query.trim();
        if text.is_empty() {
            return Ok(());
        }
        let content = serde_json::to_string(&ModelMessage::user(text))?;
        self.messages
            .persist(PersistInput {
                bot_id: req.bot_id.clone(),
                chat_id: req.chat_id.clone(),
                route_id: req.route_id.clone(),
                sender_channel_identity_id: req.source_channel_identity_id.trim().to_string(),
                sender_user_id: req.user_id.trim().to_string(),
                platform: req.current_channel.clone(),
                external_message_id: req.external_message_id.clone(),
                role: Role::User.to_string(),
                content,
                metadata: route_metadata(req),
                ..Default::default()
            })
            .await?;
        Ok(())
    }

    /// Store a finished round and hand it to memory and session extraction.
    ///
    /// The user query is stored alongside the reply unless the round already
    /// contains it or it was persisted before the round started.
    pub async fn store_round(
        &self,
        req: &ChatRequest,
        trace_id: &str,
        messages: Vec<ModelMessage>,
        usage: Option<GatewayUsage>,
    ) -> Result<()> {
        if req.bot_id.trim().is_empty() {
            return Err(FlowError::Validation("bot id is required for persistence".into()));
        }
        let messages = sanitize_messages(messages);
        let query = req.query.trim();

        let has_query = messages
            .iter()
            .any(|m| m.role == Role::User && m.text_content() == req.query);
        let mut round = Vec::with_capacity(messages.len() + 1);
        if !req.user_message_persisted && !has_query && !query.is_empty() {
            round.push(ModelMessage::user(req.query.clone()));
        }
        for message in messages {
            if req.user_message_persisted && message.role == Role::User && message.text_content().trim() == query {
                continue;
            }
            round.push(message);
        }
        if round.is_empty() {
            warn!(bot_id = %req.bot_id, chat_id = %req.chat_id, "Round is empty, nothing to store");
            return Ok(());
        }

        info!(
            step = "round_stored",
            bot_id = %req.bot_id,
            chat_id = %req.chat_id,
            trace_id = %trace_id,
            message_count = round.len(),
            "Persisting round"
        );
        self.store_messages(req, &round, usage.map(TokenUsage::from)).await;

        let memory_round = if req.user_message_persisted && !query.is_empty() {
            std::iter::once(ModelMessage::user(req.query.clone())).chain(round).collect()
        } else {
            round
        };
        self.extract_session(req, memory_round.clone());
        self.extract_memory(&req.bot_id, memory_round);
        Ok(())
    }

    async fn store_messages(&self, req: &ChatRequest, messages: &[ModelMessage], usage: Option<TokenUsage>) {
        let route = route_metadata(req);
        let usage = usage.filter(|u| !u.is_empty());
        let last_assistant = if usage.is_some() || !req.file_attachments.is_empty() {
            messages.iter().rposition(|m| m.role == Role::Assistant)
        } else {
            None
        };

        for (i, message) in messages.iter().enumerate() {
            let content = match serde_json::to_string(message) {
                Ok(content) => content,
                Err(e) => {
                    warn!(error = %e, "Message serialization failed, skipping");
                    continue;
                }
            };

            let mut input = PersistInput {
                bot_id: req.bot_id.clone(),
                chat_id: req.chat_id.clone(),
                route_id: req.route_id.clone(),
                platform: req.current_channel.clone(),
                role: message.role.to_string(),
                content,
                metadata: route.clone(),
                ..Default::default()
            };
            if message.role == Role::User {
                input.sender_channel_identity_id = req.source_channel_identity_id.trim().to_string();
                input.sender_user_id = req.user_id.trim().to_string();
                input.external_message_id = req.external_message_id.clone();
            } else if !req.external_message_id.trim().is_empty() {
                input.source_reply_to_message_id = req.external_message_id.clone();
            }

            if Some(i) == last_assistant {
                if let Some(usage) = usage {
                    input.metadata.insert(
                        "token_usage".into(),
                        json!({
                            "prompt_tokens": usage.prompt_tokens,
                            "completion_tokens": usage.completion_tokens,
                            "total_tokens": usage.total_tokens,
                        }),
                    );
                }
                if !req.file_attachments.is_empty() {
                    let attachments: Vec<Value> = req
                        .file_attachments
                        .iter()
                        .map(|a| json!({"type": "file", "path": a.path, "name": a.name}))
                        .collect();
                    input.metadata.insert("file_attachments".into(), Value::Array(attachments));
                }
            }

            if let Err(e) = self.messages.persist(input).await {
                warn!(bot_id = %req.bot_id, chat_id = %req.chat_id, error = %e, "Persist message failed");
            }
        }
    }

    /// Extract bot memories, then shared solutions, in the background.
    fn extract_memory(&self, bot_id: &str, messages: Vec<ModelMessage>) {
        let Some(memory) = self.memory.clone() else {
            debug!(bot_id = %bot_id, "No memory service, skipping extraction");
            return;
        };
        let texts: Vec<ModelMessage> = messages
            .iter()
            .filter_map(|m| {
                let text = m.text_content();
                let text = text.trim();
                if text.is_empty() {
                    return None;
                }
                let role = match &m.role {
                    Role::Other(raw) if raw.trim().is_empty() => Role::Assistant,
                    role => role.clone(),
                };
                Some(ModelMessage::text(role, text))
            })
            .collect();
        if texts.is_empty() {
            warn!(bot_id = %bot_id, input_messages = messages.len(), "No text messages to extract memory from");
            return;
        }

        let bot_id = bot_id.to_string();
        spawn_detached_with_timeout("memory_extract", self.background_deadline, async move {
            let req = AddRequest {
                messages: texts.clone(),
                bot_id: bot_id.clone(),
                namespace: NAMESPACE_BOT.into(),
                scope_id: bot_id.clone(),
            };
            match memory.add(req).await {
                Ok(results) => info!(
                    step = "memory_extracted",
                    bot_id = %bot_id,
                    messages = texts.len(),
                    results = results.len(),
                    "Memory extraction completed"
                ),
                Err(e) => warn!(step = "memory_extract_failed", bot_id = %bot_id, error = %e, "Memory extraction failed"),
            }

            spawn_detached("solutions_extract", async move {
                let req = AddRequest {
                    messages: texts,
                    bot_id: String::new(),
                    namespace: NAMESPACE_SOLUTIONS.into(),
                    scope_id: SCOPE_GLOBAL.into(),
                };
                match memory.add(req).await {
                    Ok(results) => debug!(bot_id = %bot_id, results = results.len(), "Solutions extracted"),
                    Err(e) => warn!(bot_id = %bot_id, error = %e, "Solutions extraction failed"),
                }
            });
        });
    }

    fn extract_session(&self, req: &ChatRequest, messages: Vec<ModelMessage>) {
        let Some(extractor) = self.sessions.clone() else {
            return;
        };
        info!(step = "session_queued", bot_id = %req.bot_id, message_count = messages.len(), "Session extraction queued");
        let bot_id = req.bot_id.clone();
        let chat_id = req.chat_id.clone();
        spawn_detached_with_timeout("session_extract", self.background_deadline, async move {
            match extractor.extract_session(&bot_id, &chat_id, &messages).await {
                Ok(output) if !output.is_empty() => {
                    info!(step = "session_extracted", bot_id = %bot_id, chat_id = %chat_id, "Session extraction completed")
                }
                Ok(_) => {}
                Err(e) => warn!(step = "session_extract_failed", bot_id = %bot_id, error = %e, "Session extraction failed"),
            }
        });
    }

    /// Record token usage in the background. Absent or zero usage is skipped.
    pub fn record_usage(&self, bot_id: &str, usage: Option<GatewayUsage>, model: &str, source: &str) {
        let (Some(recorder), Some(usage)) = (self.usage.clone(), usage) else {
            return;
        };
        if usage.total_tokens == 0 {
            return;
        }
        let record = UsageRecord {
            bot_id: bot_id.to_string(),
            model: model.to_string(),
            source: source.to_string(),
            usage: usage.into(),
        };
        spawn_detached_with_timeout("usage_record", USAGE_RECORD_TIMEOUT, async move {
            if let Err(e) = recorder.record(record).await {
                warn!(error = %e, "Record token usage failed");
            }
        });
    }
}

/// `route_id` and `platform` when set.
pub fn route_metadata(req: &ChatRequest) -> Map<String, Value> {
    let mut meta = Map::new();
    if !req.route_id.trim().is_empty() {
        meta.insert("route_id".into(), Value::String(req.route_id.clone()));
    }
    if !req.current_channel.trim().is_empty() {
        meta.insert("platform".into(), Value::String(req.current_channel.clone()));
    }
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_metadata_only_carries_set_fields() {
        let mut req = ChatRequest::new("b", "c", "q");
        assert!(route_metadata(&req).is_empty());

        req.current_channel = "telegram".into();
        let meta = route_metadata(&req);
        assert_eq!(meta.len(), 1);
        assert_eq!(meta["platform"], "telegram");

        req.route_id = "r1".into();
        assert_eq!(route_metadata(&req)["route_id"], "r1");
    }
}
