//! Recording collaborators: usage ledger, outbound message outbox and
//! session extraction log. Each keeps what it was handed so callers can
//! inspect it afterwards.

use std::sync::Arc;

use async_trait::async_trait;
use flowgate_core::bot::{UsageRecord, UsageRecorder};
use flowgate_core::channel::TriggerMessageSender;
use flowgate_core::error::StoreError;
use flowgate_core::message::ModelMessage;
use flowgate_core::skill::SessionExtractor;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct UsageLedger {
    records: Arc<RwLock<Vec<UsageRecord>>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<UsageRecord> {
        self.records.read().await.clone()
    }

    /// Total tokens recorded for `bot_id`.
    pub async fn total_tokens(&self, bot_id: &str) -> u64 {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.bot_id == bot_id)
            .map(|r| r.usage.total_tokens)
            .sum()
    }
}

#[async_trait]
impl UsageRecorder for UsageLedger {
    async fn record(&self, record: UsageRecord) -> Result<(), StoreError> {
        self.records.write().await.push(record);
        Ok(())
    }
}

/// A message delivered through the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub bot_id: String,
    pub platform: String,
    pub target: String,
    pub text: String,
}

/// Collects trigger deliveries instead of sending them to a platform.
#[derive(Debug, Clone, Default)]
pub struct Outbox {
    sent: Arc<RwLock<Vec<OutboundMessage>>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.read().await.clone()
    }
}

#[async_trait]
impl TriggerMessageSender for Outbox {
    async fn send_text(&self, bot_id: &str, platform: &str, target: &str, text: &str) -> Result<(), StoreError> {
        info!(bot_id = %bot_id, platform = %platform, target = %target, "Outbox delivery");
        self.sent.write().await.push(OutboundMessage {
            bot_id: bot_id.to_string(),
            platform: platform.to_string(),
            target: target.to_string(),
            text: text.to_string(),
        });
        Ok(())
    }
}

/// Remembers each extracted round per chat. The returned session text is
/// the round's visible text, one message per line.
#[derive(Debug, Clone, Default)]
pub struct SessionLog {
    rounds: Arc<RwLock<Vec<(String, Vec<ModelMessage>)>>>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn rounds(&self, chat_id: &str) -> Vec<Vec<ModelMessage>> {
        self.rounds
            .read()
            .await
            .iter()
            .filter(|(c, _)| c == chat_id)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

#[async_trait]
impl SessionExtractor for SessionLog {
    async fn extract_session(
        &self,
        _bot_id: &str,
        chat_id: &str,
        messages: &[ModelMessage],
    ) -> Result<String, StoreError> {
        self.rounds
            .write()
            .await
            .push((chat_id.to_string(), messages.to_vec()));
        Ok(messages
            .iter()
            .map(|m| format!("{}: {}", m.role, m.text_content()))
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
