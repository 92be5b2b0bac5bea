//! In-memory collaborators for flowgate.
//!
//! Everything the resolver reaches through a trait has an implementation
//! here, seeded from a [`Fixture`]. State lives behind `Arc<RwLock<..>>` so
//! clones handed to the resolver and kept by the caller see the same data.
//! Nothing is written to disk.

pub mod bots;
pub mod fixture;
pub mod messages;
pub mod recorders;
pub mod registry;

use std::sync::Arc;

pub use bots::{InMemoryBotStore, SummaryRecord};
pub use fixture::{BotFixture, ChatFixture, Fixture, FixtureError, IdentityFixture};
pub use messages::{InMemoryMessageStore, MessageRecord};
pub use recorders::{OutboundMessage, Outbox, SessionLog, UsageLedger};
pub use registry::InMemoryRegistry;

/// One of each in-memory collaborator, built from the same fixture.
#[derive(Debug, Clone)]
pub struct InMemoryStore {
    pub bots: InMemoryBotStore,
    pub registry: Arc<InMemoryRegistry>,
    pub messages: InMemoryMessageStore,
    pub usage: UsageLedger,
    pub outbox: Outbox,
    pub sessions: SessionLog,
}

impl InMemoryStore {
    pub fn from_fixture(fixture: &Fixture) -> Self {
        tracing::debug!(
            bots = fixture.bots.len(),
            models = fixture.models.len(),
            providers = fixture.providers.len(),
            "In-memory store loaded"
        );
        Self {
            bots: InMemoryBotStore::from_fixture(fixture),
            registry: Arc::new(InMemoryRegistry::new(fixture.models.clone(), fixture.providers.clone())),
            messages: InMemoryMessageStore::new(),
            usage: UsageLedger::new(),
            outbox: Outbox::new(),
            sessions: SessionLog::new(),
        }
    }
}
