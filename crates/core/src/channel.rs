//! Outbound delivery to chat platforms.
//!
//! Triggered runs normally reply through the agent's own `send` tool. When the
//! agent does not, the flow delivers its final text through a
//! [`TriggerMessageSender`].

use async_trait::async_trait;

use crate::error::StoreError;

#[async_trait]
pub trait TriggerMessageSender: Send + Sync {
    async fn send_text(&self, bot_id: &str, platform: &str, target: &str, text: &str) -> Result<(), StoreError>;
}
