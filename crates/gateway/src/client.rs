//! HTTP client for the agent gateway.
//!
//! Four endpoints are used:
//! - `POST {base}/chat/` synchronous chat
//! - `POST {base}/chat/stream` server-sent events
//! - `POST {base}/chat/trigger-schedule` scheduled and heartbeat runs
//! - `POST {base}/chat/summarize` conversation summarization

use std::time::Duration;

use async_trait::async_trait;
use flowgate_config::GatewayConfig;
use flowgate_core::error::GatewayError;
use flowgate_core::text::truncate;
use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::types::{GatewayRequest, GatewayResponse, SummarizeRequest, SummarizeResponse, TriggerScheduleRequest};

/// Receiver of raw SSE lines from an open gateway stream.
pub type LineStream = mpsc::Receiver<Result<String, GatewayError>>;

/// Transport to the agent gateway.
///
/// [`GatewayClient`] is the HTTP implementation; tests substitute scripted
/// transports.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn chat(&self, payload: &GatewayRequest, token: &str) -> Result<GatewayResponse, GatewayError>;

    async fn trigger_schedule(
        &self,
        payload: &TriggerScheduleRequest,
        token: &str,
    ) -> Result<GatewayResponse, GatewayError>;

    async fn summarize(&self, req: &SummarizeRequest, token: &str) -> Result<SummarizeResponse, GatewayError>;

    /// Open a stream. Non-2xx responses fail here; read errors arrive on
    /// the returned channel, which closes at end of stream.
    async fn open_stream(&self, payload: &GatewayRequest, token: &str) -> Result<LineStream, GatewayError>;
}

/// Extract the user-safe message from a gateway error body.
///
/// Prefers the JSON `error` field, then `message`; otherwise the first 200
/// bytes of the body.
pub fn sanitize_gateway_error(body: &str) -> String {
    if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str::<serde_json::Value>(body) {
        for field in ["error", "message"] {
            if let Some(msg) = obj.get(field).and_then(|v| v.as_str()).filter(|s| !s.is_empty()) {
                return msg.to_string();
            }
        }
    }
    truncate(body, 200)
}

fn map_transport_error(e: reqwest::Error) -> GatewayError {
    if e.is_timeout() {
        GatewayError::Timeout(e.to_string())
    } else if e.is_decode() {
        GatewayError::Decode(e.to_string())
    } else {
        GatewayError::Network(e.to_string())
    }
}

/// reqwest-backed gateway client.
pub struct GatewayClient {
    base_url: String,
    client: reqwest::Client,
    /// No overall timeout: streams live as long as the agent runs
    streaming_client: reqwest::Client,
}

impl GatewayClient {
    /// Create a client. `base_url` is trimmed of trailing slashes.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(format!("Failed to create HTTP client: {e}")))?;
        let streaming_client = reqwest::Client::builder()
            .build()
            .map_err(|e| GatewayError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.into().trim().trim_end_matches('/').to_string(),
            client,
            streaming_client,
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        Self::new(config.normalized_base_url(), config.timeout())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B, R>(&self, path: &str, body: &B, token: &str) -> Result<R, GatewayError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let body = serde_json::to_vec(body).map_err(|e| GatewayError::Decode(e.to_string()))?;
        debug!(url = %url, body_prefix = %truncate(&String::from_utf8_lossy(&body), 200), "Gateway request");

        let mut request = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body);
        if !token.trim().is_empty() {
            request = request.header("Authorization", token);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(map_transport_error)?;

        if !(200..300).contains(&status) {
            let message = sanitize_gateway_error(&text);
            error!(url = %url, status, error_summary = %message, "Gateway error");
            return Err(GatewayError::Http { status, message });
        }

        serde_json::from_str(&text).map_err(|e| {
            error!(body_prefix = %truncate(&text, 300), error = %e, "Gateway response parse failed");
            GatewayError::Decode(e.to_string())
        })
    }
}

#[async_trait]
impl GatewayTransport for GatewayClient {
    async fn chat(&self, payload: &GatewayRequest, token: &str) -> Result<GatewayResponse, GatewayError> {
        self.post_json("/chat/", payload, token).await
    }

    async fn trigger_schedule(
        &self,
        payload: &TriggerScheduleRequest,
        token: &str,
    ) -> Result<GatewayResponse, GatewayError> {
        info!(schedule_id = %payload.schedule.id, "Gateway trigger-schedule request");
        self.post_json("/chat/trigger-schedule", payload, token).await
    }

    async fn summarize(&self, req: &SummarizeRequest, token: &str) -> Result<SummarizeResponse, GatewayError> {
        info!(message_count = req.messages.len(), model = %req.model.model_id, "Gateway summarize request");
        self.post_json("/chat/summarize", req, token).await
    }

    async fn open_stream(&self, payload: &GatewayRequest, token: &str) -> Result<LineStream, GatewayError> {
        let url = format!("{}/chat/stream", self.base_url);
        debug!(url = %url, "Gateway stream request");

        let mut request = self
            .streaming_client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(payload);
        if !token.trim().is_empty() {
            request = request.header("Authorization", token);
        }

        let response = request.send().await.map_err(|e| {
            error!(url = %url, error = %e, "Gateway stream connect failed");
            map_transport_error(e)
        })?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            let message = sanitize_gateway_error(&body);
            error!(url = %url, status, error_summary = %message, "Gateway stream error");
            return Err(GatewayError::Http { status, message });
        }

        let (tx, rx) = mpsc::channel(64);

        // Read the byte stream and emit complete lines
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            // Raw bytes: a multi-byte char may straddle two chunks
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        warn!(error = %e, "Gateway stream read failed");
                        let _ = tx.send(Err(GatewayError::Network(e.to_string()))).await;
                        return;
                    }
                };

                buffer.extend_from_slice(&bytes);

                while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                    let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                    let line = String::from_utf8_lossy(&raw[..line_end]);
                    let line = line.trim_end_matches('\r').to_string();
                    if tx.send(Ok(line)).await.is_err() {
                        return; // receiver dropped
                    }
                }
            }

            if !buffer.is_empty() {
                let line = String::from_utf8_lossy(&buffer).into_owned();
                let _ = tx.send(Ok(line)).await;
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_prefers_error_then_message() {
        assert_eq!(sanitize_gateway_error(r#"{"error":"rate limited","message":"x"}"#), "rate limited");
        assert_eq!(sanitize_gateway_error(r#"{"message":"bad input"}"#), "bad input");
    }

    #[test]
    fn sanitize_truncates_raw_body() {
        let body = "k".repeat(300);
        let out = sanitize_gateway_error(&body);
        assert_eq!(out.len(), 203);
        assert!(out.ends_with("..."));
        assert_eq!(sanitize_gateway_error("oops"), "oops");
    }

    #[test]
    fn sanitize_falls_back_to_body_without_known_fields() {
        let body = r#"{"detail":"nope"}"#;
        assert_eq!(sanitize_gateway_error(body), body);
    }

    #[test]
    fn base_url_is_trimmed() {
        let client = GatewayClient::new("http://gw:8081//", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "http://gw:8081");
    }
}
