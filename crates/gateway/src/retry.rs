//! Retry policy and error classification for gateway calls.

use std::future::Future;
use std::time::Duration;

use flowgate_core::error::GatewayError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Total attempts, including the first.
pub const MAX_ATTEMPTS: usize = 3;
/// Delay before the first retry; doubles for each further retry.
pub const BASE_DELAY: Duration = Duration::from_millis(300);

const OVERFLOW_KEYWORDS: &[&str] = &[
    "context_length_exceeded",
    "context window",
    "context length",
    "too many tokens",
    "prompt is too long",
    "prompt too long",
    "maximum context",
    "exceeds the model",
    "input too long",
    "token limit",
    "tokens exceed",
];

/// Transient failures: transport errors, timeouts, HTTP 429 and 5xx.
pub fn is_retryable(err: &GatewayError) -> bool {
    match err {
        GatewayError::Network(_) | GatewayError::Timeout(_) => true,
        GatewayError::Http { status, .. } => *status == 429 || *status >= 500,
        GatewayError::Decode(_) | GatewayError::Cancelled => false,
    }
}

fn contains_overflow_keyword(text: &str) -> bool {
    let lower = text.to_lowercase();
    OVERFLOW_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Whether the request was rejected because the prompt exceeded the model's
/// context window.
///
/// HTTP errors qualify only with status 400 or 422 and a matching message.
/// Other errors are classified by their text.
pub fn is_context_overflow(err: &GatewayError) -> bool {
    match err {
        GatewayError::Http { status: 400 | 422, message } => contains_overflow_keyword(message),
        GatewayError::Http { .. } => false,
        GatewayError::Cancelled => false,
        other => contains_overflow_keyword(&other.to_string()),
    }
}

/// Run `op` up to [`MAX_ATTEMPTS`] times, sleeping 300ms then 600ms between
/// attempts. Only [retryable](is_retryable) errors are retried. Cancellation
/// during an attempt or a backoff sleep returns [`GatewayError::Cancelled`].
pub async fn with_gateway_retry<T, F, Fut>(cancel: &CancellationToken, mut op: F) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 0;
    loop {
        if attempt > 0 {
            let delay = BASE_DELAY * (1u32 << (attempt - 1));
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            }
        }

        let outcome = tokio::select! {
            r = op() => r,
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
        };
        let err = match outcome {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        attempt += 1;
        if !is_retryable(&err) || attempt >= MAX_ATTEMPTS {
            return Err(err);
        }
        warn!(attempt, error = %err, "Gateway call failed, retrying");
    }
}
