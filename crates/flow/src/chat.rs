//! Synchronous chat turns.

use std::time::Instant;

use flowgate_core::error::{GatewayError, Result};
use flowgate_core::request::{ChatRequest, ChatResponse};
use flowgate_gateway::{GatewayResponse, extract_file_attachments, is_context_overflow, with_gateway_retry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::{BudgetRatio, prune_messages};
use crate::failover::{cancellable, gateway_failure};
use crate::resolver::{ResolvedContext, Resolver};

impl Resolver {
    /// Resolve, dispatch and store one turn.
    ///
    /// Transient gateway errors are retried. A context overflow is retried
    /// once with a tighter budget; any other failure switches to the model's
    /// fallback when one is configured.
    pub async fn chat(&self, req: ChatRequest, cancel: &CancellationToken) -> Result<ChatResponse> {
        let rc = self.resolve(&req).await?;
        info!(
            step = "llm_request_sent",
            bot_id = %req.bot_id,
            chat_id = %req.chat_id,
            trace_id = %rc.trace_id,
            model = %rc.model.model_id,
            provider = %rc.payload.model.client_type,
            message_count = rc.payload.messages.len(),
            "Chat request sent"
        );

        let started = Instant::now();
        let first = with_gateway_retry(cancel, || self.gateway.chat(&rc.payload, &req.token)).await;
        let (rc, resp) = match first {
            Ok(resp) => (rc, resp),
            Err(err) => self.recover_chat(&req, rc, err, cancel).await?,
        };
        info!(
            step = "llm_response_received",
            bot_id = %req.bot_id,
            trace_id = %rc.trace_id,
            model = %rc.model.model_id,
            message_count = resp.messages.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Chat response received"
        );

        let mut req = req;
        req.file_attachments = extract_file_attachments(&resp.attachments);
        self.store_round(&req, &rc.trace_id, resp.messages.clone(), resp.usage).await?;
        self.record_usage(&req.bot_id, resp.usage, &rc.model.model_id, "chat");

        Ok(ChatResponse {
            messages: resp.messages,
            skills: resp.skills,
            model: rc.model.model_id,
            provider: rc.payload.model.client_type,
            usage: resp.usage.map(Into::into),
        })
    }

    async fn recover_chat(
        &self,
        req: &ChatRequest,
        mut rc: ResolvedContext,
        err: GatewayError,
        cancel: &CancellationToken,
    ) -> Result<(ResolvedContext, GatewayResponse)> {
        if err == GatewayError::Cancelled {
            return Err(gateway_failure(err));
        }

        if is_context_overflow(&err) {
            let messages = std::mem::take(&mut rc.payload.messages);
            let before = messages.len();
            let (messages, _, diag) = prune_messages(messages, rc.model.context_window, BudgetRatio::OVERFLOW);
            warn!(
                step = "context_overflow",
                bot_id = %req.bot_id,
                trace_id = %rc.trace_id,
                error = %err,
                before,
                after = messages.len(),
                budget = diag.budget,
                "Context overflow, retrying with a reduced budget"
            );
            rc.payload.messages = messages;
            let resp = cancellable(cancel, self.gateway.chat(&rc.payload, &req.token))
                .await
                .map_err(gateway_failure)?;
            return Ok((rc, resp));
        }

        let fallback = match self.try_fallback(&rc).await {
            Ok(fallback) => fallback,
            Err(fallback_err) => {
                debug!(trace_id = %rc.trace_id, reason = %fallback_err, "No usable fallback model");
                return Err(gateway_failure(err));
            }
        };
        warn!(
            step = "model_fallback",
            bot_id = %req.bot_id,
            trace_id = %rc.trace_id,
            primary_model = %rc.model.model_id,
            primary_error = %err,
            fallback_model = %fallback.model.model_id,
            "Primary model failed, switching to fallback"
        );
        let resp = with_gateway_retry(cancel, || self.gateway.chat(&fallback.payload, &req.token))
            .await
            .map_err(gateway_failure)?;
        Ok((fallback, resp))
    }
}
