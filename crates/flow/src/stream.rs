//! Streaming chat turns.
//!
//! Gateway `data:` payloads are forwarded verbatim as [`StreamChunk`]s while
//! the reader watches for tool telemetry, file attachments and the terminal
//! payload that carries the final round. The round is stored as soon as the
//! terminal payload arrives, so a client that disconnects afterwards does
//! not lose it.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use flowgate_core::error::{FlowError, GatewayError, Result};
use flowgate_core::request::{ChatRequest, FileAttachment, StreamChunk};
use flowgate_gateway::{
    SseDecoder, ToolEvent, detect_terminal, extract_file_attachments, parse_attachment_delta, parse_tool_event,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::failover::gateway_failure;
use crate::resolver::{ResolvedContext, Resolver};
use crate::tasks::spawn_detached;

/// Buffered chunks between the gateway reader and the consumer.
pub const CHUNK_BUFFER: usize = 64;

/// Per-attempt reader state.
#[derive(Debug, Default)]
struct StreamState {
    decoder: SseDecoder,
    chunks: usize,
    stored: bool,
    forwarding: bool,
    tool_timers: HashMap<String, Instant>,
    attachments: Vec<FileAttachment>,
}

impl StreamState {
    fn new(attachments: Vec<FileAttachment>) -> Self {
        Self {
            forwarding: true,
            attachments,
            ..Default::default()
        }
    }

    /// Log tool lifecycle events and collect announced attachments.
    fn observe(&mut self, req: &ChatRequest, trace_id: &str, data: &str) {
        match parse_tool_event(data) {
            Some(ToolEvent::Started {
                tool_name,
                tool_call_id,
                input,
            }) => {
                info!(
                    step = "tool_call_started",
                    bot_id = %req.bot_id,
                    trace_id = %trace_id,
                    tool_name = %tool_name,
                    tool_call_id = %tool_call_id,
                    input = %input,
                    "Tool call: {tool_name}"
                );
                self.tool_timers.insert(tool_call_id, Instant::now());
            }
            Some(ToolEvent::Completed {
                tool_name,
                tool_call_id,
                result,
            }) => {
                let duration_ms = self
                    .tool_timers
                    .remove(&tool_call_id)
                    .map(|started| started.elapsed().as_millis() as u64)
                    .unwrap_or_default();
                info!(
                    step = "tool_call_completed",
                    bot_id = %req.bot_id,
                    trace_id = %trace_id,
                    tool_name = %tool_name,
                    tool_call_id = %tool_call_id,
                    result = %result,
                    duration_ms,
                    "Tool completed: {tool_name}"
                );
            }
            None => {}
        }

        for attachment in extract_file_attachments(&parse_attachment_delta(data)) {
            if self.attachments.iter().all(|a| a.path != attachment.path) {
                debug!(path = %attachment.path, bot_id = %req.bot_id, "Collected stream attachment");
                self.attachments.push(attachment);
            }
        }
    }

    /// Outcome of a read error, given what the attempt achieved so far.
    fn read_error(&self, err: &GatewayError) -> Result<()> {
        if self.stored {
            warn!(error = %err, chunks = self.chunks, "Stream read error after round stored (ignored)");
            Ok(())
        } else if self.chunks > 0 {
            warn!(error = %err, chunks = self.chunks, "Stream ended after receiving data");
            Err(FlowError::StreamInterrupted)
        } else {
            error!(error = %err, "Stream ended before any data");
            Err(FlowError::ConnectionLost)
        }
    }
}

impl Resolver {
    /// Start a streaming turn.
    ///
    /// Returns at once. Chunks arrive on the first receiver; at most one
    /// error arrives on the second. Both close when the turn is over. The
    /// turn is bounded only by the gateway body and `cancel`.
    pub fn stream_chat(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<StreamChunk>, mpsc::Receiver<FlowError>) {
        self.spawn_stream(req, cancel, None)
    }

    /// Like [`stream_chat`](Self::stream_chat), for callers with nobody
    /// waiting on the other end. Reading stops after the resolver's
    /// background deadline.
    pub fn stream_chat_background(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
    ) -> (mpsc::Receiver<StreamChunk>, mpsc::Receiver<FlowError>) {
        self.spawn_stream(req, cancel, Some(self.background_deadline))
    }

    fn spawn_stream(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
        deadline: Option<Duration>,
    ) -> (mpsc::Receiver<StreamChunk>, mpsc::Receiver<FlowError>) {
        let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_BUFFER);
        let (err_tx, err_rx) = mpsc::channel(1);
        info!(bot_id = %req.bot_id, chat_id = %req.chat_id, "Gateway stream start");

        let this = self.clone();
        spawn_detached("stream_chat", async move {
            if let Err(e) = this.run_stream(req, &chunk_tx, &cancel, deadline).await {
                let _ = err_tx.send(e).await;
            }
        });
        (chunk_rx, err_rx)
    }

    async fn run_stream(
        &self,
        mut req: ChatRequest,
        chunks: &mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
    ) -> Result<()> {
        let mut rc = self.resolve(&req).await.inspect_err(|e| {
            error!(bot_id = %req.bot_id, chat_id = %req.chat_id, error = %e, "Gateway stream resolve failed");
        })?;
        info!(
            step = "stream_started",
            bot_id = %req.bot_id,
            chat_id = %req.chat_id,
            trace_id = %rc.trace_id,
            model = %rc.model.model_id,
            provider = %rc.payload.model.client_type,
            message_count = rc.payload.messages.len(),
            "Stream request sent"
        );

        if !req.user_message_persisted {
            self.persist_user_message(&req).await.inspect_err(|e| {
                error!(bot_id = %req.bot_id, chat_id = %req.chat_id, error = %e, "Persist user message failed");
            })?;
            req.user_message_persisted = true;
        }

        let started = Instant::now();
        let (mut result, forwarded) = self.stream_attempt(&rc, &req, chunks, cancel, deadline).await;

        let retry_fallback = matches!(&result, Err(e) if !matches!(e, FlowError::Cancelled)) && forwarded == 0;
        if retry_fallback {
            if let Ok(fallback) = self.try_fallback(&rc).await {
                warn!(
                    step = "model_fallback",
                    bot_id = %req.bot_id,
                    trace_id = %rc.trace_id,
                    primary_model = %rc.model.model_id,
                    fallback_model = %fallback.model.model_id,
                    "Primary stream failed, switching to fallback"
                );
                let (fallback_result, fallback_forwarded) = self.stream_attempt(&fallback, &req, chunks, cancel, deadline).await;
                if fallback_result.is_ok() || fallback_forwarded > 0 {
                    rc = fallback;
                    result = fallback_result;
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => info!(
                step = "stream_completed",
                bot_id = %req.bot_id,
                trace_id = %rc.trace_id,
                model = %rc.model.model_id,
                duration_ms,
                "Stream completed"
            ),
            Err(e) => error!(
                step = "stream_error",
                bot_id = %req.bot_id,
                trace_id = %rc.trace_id,
                error = %e,
                duration_ms,
                "Stream failed"
            ),
        }
        result
    }

    /// One streaming attempt. Returns the outcome and the number of chunks
    /// received. Without a `deadline` the attempt runs until the body ends.
    async fn stream_attempt(
        &self,
        rc: &ResolvedContext,
        req: &ChatRequest,
        chunks: &mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
        deadline: Option<Duration>,
    ) -> (Result<()>, usize) {
        let mut lines = match self.gateway.open_stream(&rc.payload, &req.token).await {
            Ok(lines) => lines,
            Err(e) => {
                error!(bot_id = %req.bot_id, error = %e, "Gateway stream connect failed");
                return (Err(gateway_failure(e)), 0);
            }
        };

        let mut state = StreamState::new(req.file_attachments.clone());
        let timer = tokio::time::sleep(deadline.unwrap_or_default());
        tokio::pin!(timer);
        let mut timer_armed = deadline.is_some();

        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => return (Err(FlowError::Cancelled), state.chunks),
                _ = &mut timer, if timer_armed => {
                    timer_armed = false;
                    Some(Err(GatewayError::Timeout("stream deadline exceeded".into())))
                }
                line = lines.recv() => line,
            };
            let line = match line {
                None => break,
                Some(Err(e)) => return (state.read_error(&e), state.chunks),
                Some(Ok(line)) => line,
            };
            let Some(sse) = state.decoder.decode(&line) else {
                continue;
            };

            state.chunks += 1;
            if state.forwarding {
                tokio::select! {
                    _ = cancel.cancelled() => return (Err(FlowError::Cancelled), state.chunks),
                    sent = chunks.send(StreamChunk(sse.data.clone())) => {
                        if sent.is_err() {
                            debug!(bot_id = %req.bot_id, "Stream consumer gone, reading on to store the round");
                            state.forwarding = false;
                        }
                    }
                }
            }

            state.observe(req, &rc.trace_id, &sse.data);

            if state.stored {
                continue;
            }
            if let Some(resp) = detect_terminal(&sse.event, &sse.data) {
                self.record_usage(&req.bot_id, resp.usage, &rc.model.model_id, "chat");
                let mut round_req = req.clone();
                round_req.file_attachments = state.attachments.clone();
                if let Err(e) = self.store_round(&round_req, &rc.trace_id, resp.messages, resp.usage).await {
                    return (Err(e), state.chunks);
                }
                state.stored = true;
            }
        }

        if !state.stored {
            warn!(
                bot_id = %req.bot_id,
                chat_id = %req.chat_id,
                chunks = state.chunks,
                "Stream ended without storing round"
            );
        }
        (Ok(()), state.chunks)
    }
}
