//! The conversation flow resolver.
//!
//! Every turn follows the same path:
//!
//! 1. **Resolve** the model, history, summary, memory and skills into a
//!    bounded gateway payload
//! 2. **Dispatch** it to the agent gateway (sync, streaming or trigger) with
//!    retry, model failover and context overflow recovery
//! 3. **Reconcile** the returned round into the message store, long-term
//!    memory and usage records
//!
//! Background work (summaries, memory extraction, usage) runs detached
//! through [`tasks`] and never fails the turn.

pub mod chat;
pub mod context;
pub mod debounce;
pub mod failover;
pub mod persist;
pub mod resolver;
pub mod skills;
pub mod stream;
pub mod summarize;
pub mod tasks;
pub mod trigger;

pub use context::{BudgetRatio, PruneDiagnostics, ToolTrimDiagnostic};
pub use debounce::Debouncer;
pub use resolver::{ResolvedContext, Resolver, ResolverBuilder};
pub use trigger::TriggerParams;
