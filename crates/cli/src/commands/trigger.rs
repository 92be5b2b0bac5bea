//! `trigger` and `heartbeat`: run a scheduled or self-evolution turn and
//! show what the bot delivered.

use std::path::Path;

use clap::Args;
use flowgate_config::AppConfig;
use flowgate_core::trigger::{HeartbeatPayload, SchedulePayload};

use super::runtime::Runtime;

#[derive(Args, Debug)]
pub struct ScheduleArgs {
    #[arg(long)]
    pub bot: String,

    /// Schedule id
    #[arg(long, default_value = "cli-schedule")]
    pub id: String,

    /// Instruction the agent executes
    #[arg(long)]
    pub command: String,

    #[arg(long, default_value = "")]
    pub name: String,

    /// Platform the result is delivered to
    #[arg(long, default_value = "cli")]
    pub platform: String,

    /// Delivery target on that platform
    #[arg(long, default_value = "")]
    pub reply_target: String,

    #[arg(long, default_value = "")]
    pub owner: String,
}

#[derive(Args, Debug)]
pub struct HeartbeatArgs {
    #[arg(long)]
    pub bot: String,

    #[arg(long)]
    pub prompt: String,

    #[arg(long, default_value = "cli-heartbeat")]
    pub id: String,

    /// Why the heartbeat fired
    #[arg(long, default_value = "manual")]
    pub reason: String,

    /// Evolution log entry to complete when the run ends
    #[arg(long, default_value = "")]
    pub log_id: String,
}

impl From<ScheduleArgs> for SchedulePayload {
    fn from(args: ScheduleArgs) -> Self {
        SchedulePayload {
            id: args.id,
            name: args.name,
            command: args.command,
            owner_user_id: args.owner,
            platform: args.platform,
            reply_target: args.reply_target,
            ..Default::default()
        }
    }
}

impl From<HeartbeatArgs> for HeartbeatPayload {
    fn from(args: HeartbeatArgs) -> Self {
        HeartbeatPayload {
            heartbeat_id: args.id,
            prompt: args.prompt,
            reason: args.reason,
            evolution_log_id: args.log_id,
            ..Default::default()
        }
    }
}

pub async fn run_schedule(config: &AppConfig, fixture: Option<&Path>, args: ScheduleArgs) -> anyhow::Result<()> {
    let runtime = Runtime::build(config, fixture)?;
    let bot_id = args.bot.clone();
    runtime
        .resolver
        .trigger_schedule(&bot_id, args.into(), &runtime.token)
        .await?;

    for msg in runtime.store.outbox.sent().await {
        println!("[{} -> {}:{}] {}", msg.bot_id, msg.platform, msg.target, msg.text);
    }
    eprintln!("tokens used: {}", runtime.store.usage.total_tokens(&bot_id).await);
    Ok(())
}

pub async fn run_heartbeat(config: &AppConfig, fixture: Option<&Path>, args: HeartbeatArgs) -> anyhow::Result<()> {
    let runtime = Runtime::build(config, fixture)?;
    let bot_id = args.bot.clone();
    runtime
        .resolver
        .trigger_heartbeat(&bot_id, args.into(), &runtime.token)
        .await?;

    for update in runtime.store.bots.evolution_logs().await {
        println!("evolution log {}: {:?}", update.log_id, update.status);
        if let Some(summary) = &update.changes_summary {
            println!("{summary}");
        }
    }
    eprintln!("tokens used: {}", runtime.store.usage.total_tokens(&bot_id).await);
    Ok(())
}
