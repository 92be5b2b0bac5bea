//! `chat` and `stream`: one conversation turn against the gateway.

use std::path::Path;
use std::time::Duration;

use clap::Args;
use flowgate_config::AppConfig;
use flowgate_core::message::Role;
use flowgate_core::request::{ChatRequest, ChatResponse};
use flowgate_flow::Debouncer;
use flowgate_flow::debounce::MESSAGE_SEPARATOR;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::runtime::Runtime;

#[derive(Args, Debug)]
pub struct TurnArgs {
    /// Bot to talk to
    #[arg(long)]
    pub bot: String,

    /// Message text. Repeat to send a burst that is merged into one turn.
    #[arg(short, long, required = true)]
    pub message: Vec<String>,

    /// Chat id (defaults to `cli-<bot>`)
    #[arg(long)]
    pub chat: Option<String>,

    /// Explicit model id, bypassing bot and chat settings
    #[arg(long)]
    pub model: Option<String>,

    /// Channel identity of the sender
    #[arg(long, default_value = "cli")]
    pub identity: String,

    /// Channel the message arrived on
    #[arg(long, default_value = "cli")]
    pub channel: String,
}

impl TurnArgs {
    fn chat_id(&self) -> String {
        self.chat.clone().unwrap_or_else(|| format!("cli-{}", self.bot))
    }

    fn request(&self, query: String, token: &str) -> ChatRequest {
        ChatRequest {
            source_channel_identity_id: self.identity.clone(),
            current_channel: self.channel.clone(),
            channels: vec![self.channel.clone()],
            model: self.model.clone().unwrap_or_default(),
            task_type: "chat".into(),
            token: token.to_string(),
            ..ChatRequest::new(self.bot.clone(), self.chat_id(), query)
        }
    }
}

/// Merge a burst of messages through the debouncer. A single message is
/// returned as-is; a zero window joins the burst directly.
pub async fn merge_burst(window: Duration, chat_id: &str, messages: &[String]) -> anyhow::Result<String> {
    if messages.len() == 1 || window.is_zero() {
        return Ok(messages.join(MESSAGE_SEPARATOR));
    }
    let debouncer = Debouncer::new(window);
    let (tx, rx) = oneshot::channel();
    let mut tx = Some(tx);
    for (i, text) in messages.iter().enumerate() {
        let sender = if i + 1 == messages.len() { tx.take() } else { None };
        debouncer.submit(chat_id, text.clone(), move |merged| {
            if let Some(sender) = sender {
                let _ = sender.send(merged);
            }
        });
    }
    Ok(rx.await?)
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_ctrl_c(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling turn");
            token.cancel();
        }
    });
}

pub async fn run(config: &AppConfig, fixture: Option<&Path>, args: TurnArgs) -> anyhow::Result<()> {
    let runtime = Runtime::build(config, fixture)?;
    let window = Duration::from_millis(config.debounce.window_ms);
    let query = merge_burst(window, &args.chat_id(), &args.message).await?;
    let req = args.request(query, &runtime.token);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);
    let resp = runtime.resolver.chat(req, &cancel).await?;
    print_response(&resp);
    Ok(())
}

pub async fn run_stream(config: &AppConfig, fixture: Option<&Path>, args: TurnArgs) -> anyhow::Result<()> {
    let runtime = Runtime::build(config, fixture)?;
    let window = Duration::from_millis(config.debounce.window_ms);
    let query = merge_burst(window, &args.chat_id(), &args.message).await?;
    let req = args.request(query, &runtime.token);

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);
    let (mut chunks, mut errors) = runtime.resolver.stream_chat(req, cancel);
    while let Some(chunk) = chunks.recv().await {
        println!("{chunk}");
    }
    if let Some(err) = errors.recv().await {
        return Err(err.into());
    }
    Ok(())
}

fn print_response(resp: &ChatResponse) {
    for msg in resp.messages.iter().filter(|m| m.role == Role::Assistant) {
        let text = msg.text_content();
        if !text.trim().is_empty() {
            println!("{text}");
        }
    }
    match &resp.usage {
        Some(usage) => eprintln!(
            "[{} via {}] tokens: {} prompt, {} completion, {} total",
            resp.model, resp.provider, usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        ),
        None => eprintln!("[{} via {}]", resp.model, resp.provider),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(messages: &[&str]) -> TurnArgs {
        TurnArgs {
            bot: "bot-1".into(),
            message: messages.iter().map(|m| m.to_string()).collect(),
            chat: None,
            model: None,
            identity: "cli".into(),
            channel: "cli".into(),
        }
    }

    #[test]
    fn request_defaults_chat_id() {
        let req = args(&["hi"]).request("hi".into(), "Bearer t");
        assert_eq!(req.chat_id, "cli-bot-1");
        assert_eq!(req.token, "Bearer t");
        assert_eq!(req.task_type, "chat");
        assert_eq!(req.channels, vec!["cli".to_string()]);
    }

    #[tokio::test]
    async fn single_message_is_not_debounced() {
        let merged = merge_burst(Duration::from_secs(60), "c", &["only".into()]).await.unwrap();
        assert_eq!(merged, "only");
    }

    #[tokio::test(start_paused = true)]
    async fn burst_is_merged() {
        let merged = merge_burst(Duration::from_millis(200), "c", &["one".into(), "two".into()])
            .await
            .unwrap();
        assert_eq!(merged, format!("one{MESSAGE_SEPARATOR}two"));
    }

    #[tokio::test]
    async fn zero_window_joins_directly() {
        let merged = merge_burst(Duration::ZERO, "c", &["one".into(), "two".into()]).await.unwrap();
        assert_eq!(merged, format!("one{MESSAGE_SEPARATOR}two"));
    }
}
