//! Payloads of scheduled and heartbeat triggers.

use serde::{Deserialize, Serialize};

/// A cron-style schedule firing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulePayload {
    pub id: String,
    pub name: String,
    pub description: String,
    pub pattern: String,
    pub max_calls: Option<i64>,
    /// The instruction the agent executes
    pub command: String,
    pub owner_user_id: String,
    pub platform: String,
    pub reply_target: String,
}

/// A periodic heartbeat (self-evolution) firing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatPayload {
    pub heartbeat_id: String,
    pub prompt: String,
    /// Why the heartbeat fired (`interval`, `manual`, ...)
    pub reason: String,
    pub interval_pattern: String,
    pub owner_user_id: String,
    pub evolution_log_id: String,
}
