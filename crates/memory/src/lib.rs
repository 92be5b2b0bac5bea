//! Long-term memory retrieval for flowgate.
//!
//! The [`MemoryContextAssembler`] builds the memory context message for a
//! turn on top of any [`MemoryService`](flowgate_core::memory::MemoryService).
//! [`CachedMemoryService`] adds a TTL/capacity bounded search cache and
//! [`InMemoryMemoryService`] is a simple keyword-scored backend.

pub mod cache;
pub mod context;
pub mod in_memory;
pub mod keywords;
pub mod rank;
pub mod rrf;

pub use cache::CachedMemoryService;
pub use context::{MEMORY_CONTEXT_HEADER, MemoryContextAssembler, MemoryContextItem, MemoryQuery};
pub use in_memory::InMemoryMemoryService;
pub use keywords::{extract_keywords, is_trivial_query};
pub use rank::{apply_mmr, apply_temporal_decay};
pub use rrf::rrf_merge;
