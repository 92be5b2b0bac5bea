//! Request resolution: from a [`ChatRequest`] to a bounded gateway payload.
//!
//! [`Resolver::resolve`] selects the model, loads history within the time
//! window, injects the stored summary, memory and knowledge context, prunes
//! everything to the token budget and attaches skills, persona prompts and
//! identity. The dispatch paths (`chat`, `stream_chat`, triggers) all start
//! here.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flowgate_config::ResolverConfig;
use flowgate_core::bot::{BotPrompts, BotRepository, UsageRecorder};
use flowgate_core::channel::TriggerMessageSender;
use flowgate_core::error::{FlowError, Result};
use flowgate_core::memory::MemoryService;
use flowgate_core::message::{ModelMessage, Role};
use flowgate_core::model::{ChatModel, LlmProvider, ModelRegistry, ModelType, normalize_client_type};
use flowgate_core::request::ChatRequest;
use flowgate_core::settings::{BotSettings, ConversationSettings, ConversationSettingsReader, SettingsReader};
use flowgate_core::skill::{KnowledgeContextLoader, SessionExtractor, SkillLoader};
use flowgate_core::store::{MessageStore, StoredMessage};
use flowgate_core::text::truncate;
use flowgate_gateway::{GatewayIdentity, GatewayModelConfig, GatewayRequest, GatewaySkill, GatewayTransport};
use flowgate_memory::{MemoryContextAssembler, MemoryQuery};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context::{BudgetRatio, limit_history_turns, prune_messages, sanitize_messages};
use crate::skills::filter_relevant_skills;

/// History window used when neither the request nor the bot sets one.
pub const DEFAULT_MAX_CONTEXT_MINUTES: i64 = 24 * 60;
pub const DEFAULT_DM_HISTORY_LIMIT: i64 = 20;
pub const DEFAULT_CHANNEL_HISTORY_LIMIT: i64 = 10;
pub const DEFAULT_TIMEZONE: &str = "UTC";

/// Prefix of the synthetic user message carrying the stored summary.
pub const SUMMARY_PREFIX: &str = "[Previous conversation summary]\n\n";

const FALLBACK_DISPLAY_NAME: &str = "User";
const DEFAULT_EVOLUTION_HISTORY_LIMIT: i64 = 10;
const DEFAULT_BACKGROUND_DEADLINE: Duration = Duration::from_secs(600);

/// Everything needed to dispatch one turn.
///
/// Owned by a single call. Failover builds a new context sharing the trace id.
#[derive(Debug, Clone)]
pub struct ResolvedContext {
    pub payload: GatewayRequest,
    pub model: ChatModel,
    pub provider: LlmProvider,
    pub trace_id: String,
}

/// The conversation flow resolver.
///
/// Holds no mutable state of its own; cloning is cheap and clones share all
/// collaborators.
#[derive(Clone)]
pub struct Resolver {
    pub(crate) settings: Arc<dyn SettingsReader>,
    pub(crate) conversations: Option<Arc<dyn ConversationSettingsReader>>,
    pub(crate) registry: Arc<dyn ModelRegistry>,
    pub(crate) messages: Arc<dyn MessageStore>,
    pub(crate) bots: Arc<dyn BotRepository>,
    pub(crate) gateway: Arc<dyn GatewayTransport>,
    pub(crate) memory: Option<Arc<dyn MemoryService>>,
    pub(crate) skill_loader: Option<Arc<dyn SkillLoader>>,
    pub(crate) knowledge: Option<Arc<dyn KnowledgeContextLoader>>,
    pub(crate) sessions: Option<Arc<dyn SessionExtractor>>,
    pub(crate) trigger_sender: Option<Arc<dyn TriggerMessageSender>>,
    pub(crate) usage: Option<Arc<dyn UsageRecorder>>,
    pub(crate) timezone: String,
    pub(crate) skill_candidate_limit: usize,
    pub(crate) evolution_history_limit: i64,
    pub(crate) background_deadline: Duration,
}

/// Builder for [`Resolver`]. Required collaborators go to
/// [`Resolver::builder`], optional ones through `with_*`.
pub struct ResolverBuilder {
    resolver: Resolver,
}

impl Resolver {
    pub fn builder(
        settings: Arc<dyn SettingsReader>,
        registry: Arc<dyn ModelRegistry>,
        messages: Arc<dyn MessageStore>,
        bots: Arc<dyn BotRepository>,
        gateway: Arc<dyn GatewayTransport>,
    ) -> ResolverBuilder {
        ResolverBuilder {
            resolver: Resolver {
                settings,
                conversations: None,
                registry,
                messages,
                bots,
                gateway,
                memory: None,
                skill_loader: None,
                knowledge: None,
                sessions: None,
                trigger_sender: None,
                usage: None,
                timezone: DEFAULT_TIMEZONE.into(),
                skill_candidate_limit: 0,
                evolution_history_limit: DEFAULT_EVOLUTION_HISTORY_LIMIT,
                background_deadline: DEFAULT_BACKGROUND_DEADLINE,
            },
        }
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }
}

impl ResolverBuilder {
    pub fn with_conversation_settings(mut self, reader: Arc<dyn ConversationSettingsReader>) -> Self {
        self.resolver.conversations = Some(reader);
        self
    }

    /// Long-term memory used for context injection and extraction.
    pub fn with_memory(mut self, memory: Arc<dyn MemoryService>) -> Self {
        self.resolver.memory = Some(memory);
        self
    }

    pub fn with_skill_loader(mut self, loader: Arc<dyn SkillLoader>) -> Self {
        self.resolver.skill_loader = Some(loader);
        self
    }

    pub fn with_knowledge_loader(mut self, loader: Arc<dyn KnowledgeContextLoader>) -> Self {
        self.resolver.knowledge = Some(loader);
        self
    }

    pub fn with_session_extractor(mut self, extractor: Arc<dyn SessionExtractor>) -> Self {
        self.resolver.sessions = Some(extractor);
        self
    }

    /// Channel delivery for trigger runs whose agent never called `send`.
    pub fn with_trigger_sender(mut self, sender: Arc<dyn TriggerMessageSender>) -> Self {
        self.resolver.trigger_sender = Some(sender);
        self
    }

    pub fn with_usage_recorder(mut self, recorder: Arc<dyn UsageRecorder>) -> Self {
        self.resolver.usage = Some(recorder);
        self
    }

    /// IANA timezone sent to the agent. Blank means UTC.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        let timezone = timezone.into();
        self.resolver.timezone = if timezone.trim().is_empty() {
            DEFAULT_TIMEZONE.into()
        } else {
            timezone.trim().to_string()
        };
        self
    }

    /// Max usable skills per request; 0 sends all of them.
    pub fn with_skill_candidate_limit(mut self, limit: usize) -> Self {
        self.resolver.skill_candidate_limit = limit;
        self
    }

    /// History turns loaded for heartbeat runs.
    pub fn with_evolution_history_limit(mut self, limit: i64) -> Self {
        self.resolver.evolution_history_limit = limit;
        self
    }

    /// Outer deadline for streams and detached background work.
    pub fn with_background_deadline(mut self, deadline: Duration) -> Self {
        self.resolver.background_deadline = deadline;
        self
    }

    /// Apply the `[resolver]` config section.
    pub fn with_config(self, config: &ResolverConfig) -> Self {
        self.with_timezone(config.timezone.clone())
            .with_skill_candidate_limit(config.skill_candidate_limit)
            .with_evolution_history_limit(config.evolution_history_limit)
    }

    pub fn build(self) -> Resolver {
        self.resolver
    }
}

impl Resolver {
    /// Assemble the gateway payload for `req`.
    pub async fn resolve(&self, req: &ChatRequest) -> Result<ResolvedContext> {
        let trace_id = Uuid::new_v4().to_string();
        info!(
            step = "user_message_received",
            bot_id = %req.bot_id,
            chat_id = %req.chat_id,
            trace_id = %trace_id,
            query = %truncate(&req.query, 200),
            "Resolving request"
        );

        if req.query.trim().is_empty() {
            return Err(FlowError::Validation("query is required".into()));
        }
        if req.bot_id.trim().is_empty() {
            return Err(FlowError::Validation("bot id is required".into()));
        }
        if req.chat_id.trim().is_empty() {
            return Err(FlowError::Validation("chat id is required".into()));
        }

        let bot_settings = self.settings.get_bot(&req.bot_id).await?;
        let chat_settings = match &self.conversations {
            Some(reader) => reader.get_settings(&req.chat_id).await?,
            None => ConversationSettings::default(),
        };

        let (model, provider) = self.select_chat_model(req, &bot_settings, &chat_settings).await?;
        let model_config = model_config(&model, &provider)?;
        let max_context_minutes = first_positive(&[
            req.max_context_load_time,
            bot_settings.max_context_load_time,
            DEFAULT_MAX_CONTEXT_MINUTES,
        ]);
        let history_limit = history_limit(req, &bot_settings);

        let mut messages = Vec::new();
        if req.max_context_load_time >= 0 {
            let history = self.load_messages(&req.chat_id, max_context_minutes).await?;
            messages = limit_history_turns(history, history_limit);
            info!(
                step = "history_loaded",
                bot_id = %req.bot_id,
                chat_id = %req.chat_id,
                trace_id = %trace_id,
                count = messages.len(),
                history_limit,
                window_minutes = max_context_minutes,
                "History loaded"
            );

            if messages.len() >= proactive_threshold(history_limit) && messages.len() > 6 {
                let older = messages[..messages.len() / 2].to_vec();
                info!(
                    step = "summary_requested",
                    bot_id = %req.bot_id,
                    chat_id = %req.chat_id,
                    count = older.len(),
                    "Proactively summarizing older history"
                );
                self.async_summarize(&req.bot_id, &req.chat_id, older, &model, &provider, &req.token);
            }
        }

        if let Some(summary) = self.load_summary(&req.bot_id, &req.chat_id).await {
            info!(step = "summary_loaded", bot_id = %req.bot_id, length = summary.len(), "Injecting conversation summary");
            messages.insert(0, ModelMessage::user(format!("{SUMMARY_PREFIX}{summary}")));
        }

        if let Some(memory) = &self.memory {
            let query = MemoryQuery {
                bot_id: &req.bot_id,
                chat_id: &req.chat_id,
                query: &req.query,
                context_window: model.context_window,
            };
            match MemoryContextAssembler::new(memory.clone()).assemble(query).await {
                Some(memory_message) => {
                    info!(step = "memory_searched", bot_id = %req.bot_id, trace_id = %trace_id, injected = true, "Memory context injected");
                    messages.push(memory_message);
                }
                None => debug!(step = "memory_searched", bot_id = %req.bot_id, injected = false, "No memory context"),
            }
        }

        if let Some(loader) = &self.knowledge {
            match loader.load_context(&req.bot_id, &req.query).await {
                Ok(text) if !text.trim().is_empty() => {
                    info!(step = "knowledge_loaded", bot_id = %req.bot_id, length = text.len(), "Knowledge context injected");
                    messages.push(ModelMessage::system(text));
                }
                Ok(_) => debug!(bot_id = %req.bot_id, "No knowledge context"),
                Err(e) => warn!(bot_id = %req.bot_id, error = %e, "Knowledge context load failed"),
            }
        }

        messages.extend(req.messages.iter().cloned());
        let messages = sanitize_messages(messages);

        let before = messages.len();
        let all_messages = messages.clone();
        let (messages, trims, diag) = prune_messages(messages, model.context_window, BudgetRatio::NORMAL);
        info!(
            step = "token_budget_calculated",
            bot_id = %req.bot_id,
            trace_id = %trace_id,
            context_window = model.context_window,
            budget = diag.budget,
            estimated_before = diag.estimated_total_before,
            estimated_after = diag.estimated_total_after,
            pruned = diag.pruned,
            "Token budget applied"
        );
        if !trims.is_empty() {
            for trim in &trims {
                debug!(
                    tool_call_id = %trim.tool_call_id,
                    original_chars = trim.original_chars,
                    trimmed_chars = trim.trimmed_chars,
                    "Tool result trimmed"
                );
            }
            info!(step = "tool_results_trimmed", bot_id = %req.bot_id, count = trims.len(), "Tool results soft-trimmed");
        }
        if messages.len() < before {
            let dropped = all_messages[..before - messages.len()].to_vec();
            info!(
                step = "context_pruned",
                bot_id = %req.bot_id,
                chat_id = %req.chat_id,
                dropped = dropped.len(),
                kept = messages.len(),
                "Messages dropped to fit the budget"
            );
            self.summarize_dropped(req, dropped, &model, &provider, &model_config).await;
        }

        let skills = dedup(&req.skills);
        let usable_skills = self.load_usable_skills(req).await;
        let container_id = self.resolve_container_id(&req.bot_id, &req.container_id).await;
        let prompts = match self.bots.prompts(&req.bot_id).await {
            Ok(prompts) => prompts,
            Err(e) => {
                debug!(bot_id = %req.bot_id, error = %e, "Bot prompts unavailable, using defaults");
                BotPrompts::default()
            }
        };
        let display_name = self.resolve_display_name(req).await;

        let mut payload = GatewayRequest {
            model: model_config,
            background_model: None,
            active_context_time: max_context_minutes,
            language: bot_settings.language.clone(),
            timezone: self.timezone.clone(),
            channels: req.channels.clone(),
            current_channel: req.current_channel.clone(),
            allowed_actions: req.allowed_actions.clone(),
            messages,
            skills,
            usable_skills,
            query: req.query.clone(),
            identity: GatewayIdentity {
                bot_id: req.bot_id.clone(),
                container_id,
                channel_identity_id: req.source_channel_identity_id.trim().to_string(),
                display_name,
                current_platform: req.current_channel.clone(),
                conversation_type: req.conversation_type.trim().to_string(),
                reply_target: req.reply_target.trim().to_string(),
                session_token: req.chat_token.clone(),
            },
            attachments: Vec::new(),
            bot_identity: prompts.identity,
            bot_soul: prompts.soul,
            bot_task: prompts.task,
            allow_self_evolution: prompts.allow_self_evolution,
        };
        payload.background_model = self.background_model(&bot_settings, &model).await;

        info!(
            step = "prompt_built",
            bot_id = %req.bot_id,
            trace_id = %trace_id,
            model = %model.model_id,
            message_count = payload.messages.len(),
            skills = payload.usable_skills.len(),
            "Gateway payload resolved"
        );
        Ok(ResolvedContext {
            payload,
            model,
            provider,
            trace_id,
        })
    }

    /// Request model > background model (background tasks) > chat setting >
    /// bot chat model.
    async fn select_chat_model(
        &self,
        req: &ChatRequest,
        bot: &BotSettings,
        chat: &ConversationSettings,
    ) -> Result<(ChatModel, LlmProvider)> {
        let provider_filter = req.provider.trim();
        let mut model_id = req.model.trim().to_string();
        if model_id.is_empty() && provider_filter.is_empty() {
            let background = if req.is_background_task() {
                bot.background_model_id.trim()
            } else {
                ""
            };
            model_id = [background, chat.model_id.trim(), bot.chat_model_id.trim()]
                .into_iter()
                .find(|id| !id.is_empty())
                .unwrap_or_default()
                .to_string();
        }
        if model_id.is_empty() {
            return Err(FlowError::Config(
                "chat model not configured: specify model in request or bot settings".into(),
            ));
        }

        if provider_filter.is_empty() {
            return self.fetch_chat_model(&model_id).await;
        }

        let candidates = self.registry.list_by_client_type(provider_filter, ModelType::Chat).await?;
        let model = candidates
            .into_iter()
            .filter(|m| m.model_type == ModelType::Chat)
            .find(|m| m.model_id == model_id)
            .ok_or_else(|| {
                FlowError::Config(format!(
                    "chat model {model_id:?} not found for provider {provider_filter:?}"
                ))
            })?;
        let provider = self.registry.provider_by_id(&model.provider_id).await?;
        Ok((model, provider))
    }

    pub(crate) async fn fetch_chat_model(&self, model_id: &str) -> Result<(ChatModel, LlmProvider)> {
        let model = self.registry.get_by_model_id(model_id).await?;
        if model.model_type != ModelType::Chat {
            return Err(FlowError::Config(format!("model {model_id:?} is not a chat model")));
        }
        let provider = self.registry.provider_by_id(&model.provider_id).await?;
        Ok((model, provider))
    }

    /// Attached when configured, distinct from the chat model, resolvable and
    /// of a supported client type.
    async fn background_model(&self, bot: &BotSettings, chat_model: &ChatModel) -> Option<GatewayModelConfig> {
        let id = bot.background_model_id.trim();
        if id.is_empty() || id == chat_model.model_id {
            return None;
        }
        match self.fetch_chat_model(id).await {
            Ok((model, provider)) => model_config(&model, &provider).ok(),
            Err(e) => {
                debug!(model = %id, error = %e, "Background model unavailable");
                None
            }
        }
    }

    async fn load_messages(&self, chat_id: &str, minutes: i64) -> Result<Vec<ModelMessage>> {
        let since = chrono::Duration::try_minutes(minutes)
            .and_then(|window| Utc::now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let rows = self.messages.list_since(chat_id, since).await?;
        Ok(rows.into_iter().map(decode_stored_message).collect())
    }

    async fn load_usable_skills(&self, req: &ChatRequest) -> Vec<GatewaySkill> {
        let Some(loader) = &self.skill_loader else {
            return Vec::new();
        };
        let entries = match loader.load_skills(&req.bot_id).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(bot_id = %req.bot_id, error = %e, "Failed to load usable skills");
                return Vec::new();
            }
        };
        let skills: Vec<GatewaySkill> = entries
            .into_iter()
            .map(|entry| GatewaySkill {
                description: if entry.description.trim().is_empty() {
                    entry.name.clone()
                } else {
                    entry.description
                },
                name: entry.name,
                content: entry.content,
                metadata: entry.metadata,
            })
            .collect();

        let loaded = skills.len();
        let skills = filter_relevant_skills(skills, &req.query, self.skill_candidate_limit);
        if skills.len() < loaded {
            info!(
                step = "skills_filtered",
                bot_id = %req.bot_id,
                before = loaded,
                after = skills.len(),
                "Skills filtered by relevance"
            );
        }
        skills
    }

    /// Explicit id, then the bot's bound container, then `mcp-<bot>`.
    async fn resolve_container_id(&self, bot_id: &str, explicit: &str) -> String {
        if !explicit.trim().is_empty() {
            return explicit.trim().to_string();
        }
        match self.bots.container_id(bot_id).await {
            Ok(Some(id)) if !id.trim().is_empty() => return id,
            Ok(_) => {}
            Err(e) => debug!(bot_id = %bot_id, error = %e, "Container lookup failed"),
        }
        warn!(bot_id = %bot_id, "No container found for bot, using fallback");
        format!("mcp-{bot_id}")
    }

    async fn resolve_display_name(&self, req: &ChatRequest) -> String {
        if !req.display_name.trim().is_empty() {
            return req.display_name.trim().to_string();
        }
        let identity = req.source_channel_identity_id.trim();
        if identity.is_empty() {
            return FALLBACK_DISPLAY_NAME.into();
        }
        match self.bots.display_name(identity).await {
            Ok(Some(name)) if !name.trim().is_empty() => name.trim().to_string(),
            _ => FALLBACK_DISPLAY_NAME.into(),
        }
    }
}

/// Gateway model block for `model` served by `provider`.
pub(crate) fn model_config(model: &ChatModel, provider: &LlmProvider) -> Result<GatewayModelConfig> {
    let client_type = normalize_client_type(&provider.client_type)
        .ok_or_else(|| FlowError::Config(format!("unsupported client type: {:?}", provider.client_type)))?;
    Ok(GatewayModelConfig {
        model_id: model.model_id.clone(),
        client_type,
        input: model.input.clone(),
        api_key: provider.api_key.clone(),
        base_url: provider.base_url.clone(),
        reasoning: model.reasoning,
        max_tokens: model.max_tokens,
    })
}

/// Stored rows hold a JSON message; legacy rows hold plain text. The row's
/// role always wins.
fn decode_stored_message(row: StoredMessage) -> ModelMessage {
    let role = Role::parse(&row.role);
    match serde_json::from_str::<ModelMessage>(&row.content) {
        Ok(mut message) => {
            message.role = role;
            message
        }
        Err(e) => {
            debug!(chat_id = %row.chat_id, error = %e, "Stored content is not a message, treating as raw text");
            ModelMessage::text(role, row.content)
        }
    }
}

fn first_positive(values: &[i64]) -> i64 {
    values.iter().copied().find(|v| *v > 0).unwrap_or_default()
}

fn history_limit(req: &ChatRequest, bot: &BotSettings) -> i64 {
    let direct = req.is_direct_conversation();
    let mut limit = if direct {
        DEFAULT_DM_HISTORY_LIMIT
    } else {
        DEFAULT_CHANNEL_HISTORY_LIMIT
    };
    if direct && bot.dm_history_limit > 0 {
        limit = bot.dm_history_limit;
    }
    if !direct && bot.channel_history_limit > 0 {
        limit = bot.channel_history_limit;
    }
    if req.history_limit_override > 0 {
        limit = req.history_limit_override;
    }
    limit
}

/// History length at which older turns are summarized ahead of time.
fn proactive_threshold(history_limit: i64) -> usize {
    ((history_limit as f64 * 0.8) as i64).max(4) as usize
}

/// Trimmed, non-blank, first occurrence wins.
fn dedup(items: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(items.len());
    for item in items {
        let item = item.trim();
        if !item.is_empty() && !out.iter().any(|existing| existing == item) {
            out.push(item.to_string());
        }
    }
    out
}
