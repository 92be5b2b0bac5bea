//! # flowgate Core
//!
//! Domain types, collaborator traits, and error definitions for the flowgate
//! conversation flow runtime. This crate has **no framework dependencies**;
//! it defines the model every other crate builds on.
//!
//! Persistence, memory, skills and delivery are reached only through the
//! narrow async traits declared here, so the flow can be driven against
//! in-memory or mock implementations.

pub mod bot;
pub mod channel;
pub mod error;
pub mod memory;
pub mod message;
pub mod model;
pub mod request;
pub mod settings;
pub mod skill;
pub mod store;
pub mod text;
pub mod trigger;

// Re-export key types at crate root for ergonomics
pub use bot::{BotPrompts, BotRepository, EvolutionLogUpdate, EvolutionStatus, UsageRecord, UsageRecorder};
pub use channel::TriggerMessageSender;
pub use error::{FlowError, GatewayError, MemoryError, Result, StoreError};
pub use memory::{AddRequest, MemoryItem, MemoryService, SearchRequest};
pub use message::{ContentPart, MessageContent, ModelMessage, Role, ToolCall, ToolFunction};
pub use model::{ChatModel, LlmProvider, ModelRegistry, ModelType, normalize_client_type};
pub use request::{ChatRequest, ChatResponse, FileAttachment, StreamChunk, TokenUsage};
pub use settings::{BotSettings, ConversationSettings, ConversationSettingsReader, SettingsReader};
pub use skill::{KnowledgeContextLoader, SessionExtractor, SkillEntry, SkillLoader};
pub use store::{MessageStore, PersistInput, StoredMessage};
pub use trigger::{HeartbeatPayload, SchedulePayload};
