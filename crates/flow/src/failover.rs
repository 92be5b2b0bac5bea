//! Model failover and gateway failure mapping.

use std::future::Future;

use flowgate_core::error::{FlowError, GatewayError, Result};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::resolver::{ResolvedContext, Resolver, model_config};

impl Resolver {
    /// Rebuild `primary` around its model's fallback.
    ///
    /// The payload is reused as-is apart from the model block; the trace id
    /// carries over.
    pub async fn try_fallback(&self, primary: &ResolvedContext) -> Result<ResolvedContext> {
        let fallback_id = primary.model.fallback_model_id.trim();
        if fallback_id.is_empty() {
            return Err(FlowError::Config("no fallback model configured".into()));
        }
        let model = self
            .registry
            .get_by_id(fallback_id)
            .await
            .map_err(|e| FlowError::Config(format!("failed to load fallback model: {e}")))?;
        let provider = self
            .registry
            .provider_by_id(&model.provider_id)
            .await
            .map_err(|e| FlowError::Config(format!("failed to load fallback provider: {e}")))?;

        let mut payload = primary.payload.clone();
        payload.model = model_config(&model, &provider)?;
        debug!(
            trace_id = %primary.trace_id,
            primary = %primary.model.model_id,
            fallback = %model.model_id,
            "Fallback context built"
        );
        Ok(ResolvedContext {
            payload,
            model,
            provider,
            trace_id: primary.trace_id.clone(),
        })
    }
}

/// Surface a gateway failure, with cancellation as its own variant.
pub fn gateway_failure(err: GatewayError) -> FlowError {
    match err {
        GatewayError::Cancelled => FlowError::Cancelled,
        other => FlowError::Gateway(other),
    }
}

/// Run one gateway call unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, call: F) -> std::result::Result<T, GatewayError>
where
    F: Future<Output = std::result::Result<T, GatewayError>>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        result = call => result,
    }
}
