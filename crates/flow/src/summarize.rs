//! Conversation summaries.
//!
//! History that falls out of the window or the token budget is condensed by
//! the gateway's summarize endpoint and stored per chat. The stored summary
//! is injected at the head of the next request.

use std::time::Duration;

use flowgate_core::message::ModelMessage;
use flowgate_core::model::{ChatModel, LlmProvider};
use flowgate_core::request::ChatRequest;
use flowgate_gateway::{GatewayModelConfig, SummarizeRequest};
use tracing::{debug, info, warn};

use crate::resolver::{Resolver, model_config};
use crate::tasks::spawn_detached_with_timeout;

/// Deadline for one background summarization.
pub const SUMMARIZE_TIMEOUT: Duration = Duration::from_secs(120);

/// Inline attempts made when pruning drops messages.
pub const SYNC_SUMMARY_ATTEMPTS: usize = 3;

/// Prefix of the system message carrying the previous summary into a new
/// summarization.
pub const PREVIOUS_SUMMARY_PREFIX: &str = "Previous conversation summary:\n";

impl Resolver {
    /// The stored summary for a chat, trimmed. Lookup errors count as none.
    pub async fn load_summary(&self, bot_id: &str, chat_id: &str) -> Option<String> {
        match self.bots.summary(bot_id, chat_id).await {
            Ok(Some(summary)) if !summary.trim().is_empty() => Some(summary.trim().to_string()),
            Ok(_) => None,
            Err(e) => {
                debug!(bot_id = %bot_id, chat_id = %chat_id, error = %e, "Summary lookup failed");
                None
            }
        }
    }

    /// Summarize `messages` in the background and store the result.
    ///
    /// The existing summary is folded in so the new one supersedes it.
    pub fn async_summarize(
        &self,
        bot_id: &str,
        chat_id: &str,
        messages: Vec<ModelMessage>,
        model: &ChatModel,
        provider: &LlmProvider,
        token: &str,
    ) {
        if messages.is_empty() {
            return;
        }
        let config = match model_config(model, provider) {
            Ok(config) => config,
            Err(e) => {
                warn!(bot_id = %bot_id, error = %e, "Cannot summarize with this model");
                return;
            }
        };

        let this = self.clone();
        let bot_id = bot_id.to_string();
        let chat_id = chat_id.to_string();
        let token = token.to_string();
        spawn_detached_with_timeout("summarize", SUMMARIZE_TIMEOUT, async move {
            let count = messages.len();
            let mut input = messages;
            if let Some(existing) = this.load_summary(&bot_id, &chat_id).await {
                input.insert(0, ModelMessage::system(format!("{PREVIOUS_SUMMARY_PREFIX}{existing}")));
            }

            let req = SummarizeRequest {
                model: config,
                messages: input,
            };
            let resp = match this.gateway.summarize(&req, &token).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(bot_id = %bot_id, error = %e, "Summarize request failed");
                    return;
                }
            };
            this.record_usage(&bot_id, resp.usage, &req.model.model_id, "summarize");
            if resp.summary.trim().is_empty() {
                return;
            }
            match this.bots.upsert_summary(&bot_id, &chat_id, &resp.summary, count).await {
                Ok(()) => info!(bot_id = %bot_id, chat_id = %chat_id, message_count = count, "Summary stored"),
                Err(e) => warn!(bot_id = %bot_id, error = %e, "Upsert summary failed"),
            }
        });
    }

    /// Summarize inline, retrying up to [`SYNC_SUMMARY_ATTEMPTS`] times. A
    /// blank summary counts as a failure.
    pub async fn summarize_sync(
        &self,
        config: &GatewayModelConfig,
        messages: &[ModelMessage],
        token: &str,
    ) -> Option<String> {
        let req = SummarizeRequest {
            model: config.clone(),
            messages: messages.to_vec(),
        };
        for attempt in 1..=SYNC_SUMMARY_ATTEMPTS {
            match self.gateway.summarize(&req, token).await {
                Ok(resp) if !resp.summary.trim().is_empty() => return Some(resp.summary),
                Ok(_) if attempt < SYNC_SUMMARY_ATTEMPTS => warn!(attempt, "Empty summary, retrying"),
                Err(e) if attempt < SYNC_SUMMARY_ATTEMPTS => warn!(attempt, error = %e, "Sync summarize failed, retrying"),
                _ => {}
            }
        }
        None
    }

    /// Summarize what the pruner dropped: inline first, in the background if
    /// that fails.
    pub(crate) async fn summarize_dropped(
        &self,
        req: &ChatRequest,
        dropped: Vec<ModelMessage>,
        model: &ChatModel,
        provider: &LlmProvider,
        config: &GatewayModelConfig,
    ) {
        match self.summarize_sync(config, &dropped, &req.token).await {
            Some(summary) => {
                info!(
                    step = "summary_stored",
                    bot_id = %req.bot_id,
                    chat_id = %req.chat_id,
                    message_count = dropped.len(),
                    "Dropped messages summarized"
                );
                if let Err(e) = self
                    .bots
                    .upsert_summary(&req.bot_id, &req.chat_id, &summary, dropped.len())
                    .await
                {
                    warn!(bot_id = %req.bot_id, error = %e, "Sync upsert summary failed");
                }
            }
            None => {
                warn!(
                    step = "summary_deferred",
                    bot_id = %req.bot_id,
                    chat_id = %req.chat_id,
                    "Sync summarize failed, continuing in background"
                );
                self.async_summarize(&req.bot_id, &req.chat_id, dropped, model, provider, &req.token);
            }
        }
    }
}
