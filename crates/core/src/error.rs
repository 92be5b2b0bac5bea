//! Error types for the flowgate domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; [`FlowError`] is what the
//! resolver surfaces to callers.

use thiserror::Error;

/// The top-level error type for conversation flow operations.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Missing bot/chat id, blank query, missing schedule command.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No resolvable chat model, unsupported client type, missing collaborator.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// The stream ended after data was forwarded; the reply may be partial.
    #[error("agent gateway stream interrupted, the model may have returned a partial response")]
    StreamInterrupted,

    /// The stream ended before any data was received.
    #[error("agent gateway connection lost before any response was received")]
    ConnectionLost,

    #[error("request cancelled")]
    Cancelled,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using [`FlowError`].
pub type Result<T> = std::result::Result<T, FlowError>;

impl From<StoreError> for FlowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => FlowError::Config(format!("not found: {what}")),
            StoreError::Backend(reason) => FlowError::Persistence(reason),
        }
    }
}

impl From<MemoryError> for FlowError {
    fn from(err: MemoryError) -> Self {
        FlowError::Collaborator(err.to_string())
    }
}

// --- Bounded context errors ---

/// Errors produced by the agent gateway transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// Non-2xx response. `message` is already sanitized.
    #[error("{message} (status: {status})")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse gateway response: {0}")]
    Decode(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("request cancelled")]
    Cancelled,
}

impl GatewayError {
    /// HTTP status code, when this is a typed HTTP error.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Errors raised by persistence collaborators (message store, settings,
/// registry, bot repository).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    #[error("Memory search failed: {0}")]
    Search(String),

    #[error("Memory extraction failed: {0}")]
    Add(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_error_displays_status() {
        let err = FlowError::Gateway(GatewayError::Http {
            status: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn status_only_for_http_errors() {
        assert_eq!(
            GatewayError::Http { status: 502, message: "bad".into() }.status(),
            Some(502)
        );
        assert_eq!(GatewayError::Network("reset".into()).status(), None);
    }

    #[test]
    fn store_not_found_maps_to_config() {
        let err: FlowError = StoreError::NotFound("model gpt-x".into()).into();
        assert!(matches!(err, FlowError::Config(_)));
        let err: FlowError = StoreError::Backend("disk full".into()).into();
        assert!(matches!(err, FlowError::Persistence(_)));
    }

    #[test]
    fn interruption_and_connection_loss_are_distinct() {
        assert_ne!(
            FlowError::StreamInterrupted.to_string(),
            FlowError::ConnectionLost.to_string()
        );
    }
}
