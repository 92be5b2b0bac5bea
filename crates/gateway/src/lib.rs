//! Agent gateway client for flowgate.
//!
//! The gateway runs the actual agent loop (model calls, tools, sandbox).
//! This crate speaks its HTTP API: wire [`types`], the reqwest-backed
//! [`GatewayClient`], the [`retry`] policy and [`sse`] stream decoding.

pub mod client;
pub mod retry;
pub mod sse;
pub mod types;

pub use client::{GatewayClient, GatewayTransport, LineStream, sanitize_gateway_error};
pub use retry::{is_context_overflow, is_retryable, with_gateway_retry};
pub use sse::{SseData, SseDecoder, ToolEvent, detect_terminal, parse_attachment_delta, parse_tool_event};
pub use types::{
    GatewayFileAttachment, GatewayIdentity, GatewayModelConfig, GatewayRequest, GatewayResponse, GatewaySchedule,
    GatewaySkill, GatewayUsage, SummarizeRequest, SummarizeResponse, TriggerScheduleRequest,
    extract_file_attachments,
};
