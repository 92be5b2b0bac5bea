//! Wires a [`Resolver`] from configuration and a store fixture.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use flowgate_config::AppConfig;
use flowgate_flow::Resolver;
use flowgate_gateway::GatewayClient;
use flowgate_memory::{CachedMemoryService, InMemoryMemoryService};
use flowgate_store::{Fixture, InMemoryStore};
use tracing::info;

/// A resolver plus the store it reads from, so commands can report what
/// was recorded after a turn.
pub struct Runtime {
    pub resolver: Resolver,
    pub store: InMemoryStore,
    /// Forwarded to the gateway as the `Authorization` header
    pub token: String,
}

impl Runtime {
    pub fn build(config: &AppConfig, fixture_override: Option<&Path>) -> anyhow::Result<Self> {
        let path = fixture_override
            .or(config.fixture.as_deref())
            .context("no store fixture: pass --fixture or set `fixture` in the config")?;
        let fixture = Fixture::load(path)?;
        let store = InMemoryStore::from_fixture(&fixture);

        let gateway = GatewayClient::from_config(&config.gateway)?;
        let memory = CachedMemoryService::new(
            Arc::new(InMemoryMemoryService::new()),
            Duration::from_secs(config.memory.cache_ttl_secs),
            config.memory.cache_capacity,
        );

        let resolver = Resolver::builder(
            Arc::new(store.bots.clone()),
            store.registry.clone(),
            Arc::new(store.messages.clone()),
            Arc::new(store.bots.clone()),
            Arc::new(gateway),
        )
        .with_config(&config.resolver)
        .with_timezone(config.timezone())
        .with_background_deadline(config.gateway.stream_deadline())
        .with_conversation_settings(Arc::new(store.bots.clone()))
        .with_skill_loader(Arc::new(store.bots.clone()))
        .with_knowledge_loader(Arc::new(store.bots.clone()))
        .with_memory(Arc::new(memory))
        .with_session_extractor(Arc::new(store.sessions.clone()))
        .with_trigger_sender(Arc::new(store.outbox.clone()))
        .with_usage_recorder(Arc::new(store.usage.clone()))
        .build();

        info!(
            fixture = %path.display(),
            gateway = %config.gateway.normalized_base_url(),
            "Runtime ready"
        );

        Ok(Self {
            resolver,
            store,
            token: config
                .gateway
                .token
                .as_deref()
                .map(bearer)
                .unwrap_or_default(),
        })
    }
}

/// Adds the `Bearer ` scheme unless the token already carries one.
pub fn bearer(token: &str) -> String {
    let token = token.trim();
    if token.is_empty() || token.contains(' ') {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}
