//! Memory context assembly.
//!
//! Turns a user query into at most one `system` message of relevant memories:
//! hybrid retrieval (primary search plus keyword expansion fused with RRF),
//! score filtering and dedupe, shared solutions, temporal decay, MMR
//! diversification and a char budget derived from the model's context window.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use flowgate_core::memory::{
    MemoryItem, MemoryService, NAMESPACE_BOT, NAMESPACE_SOLUTIONS, SCOPE_GLOBAL, SearchRequest,
};
use flowgate_core::message::ModelMessage;
use flowgate_core::text::{estimate_chars_per_token, prefix_at_boundary};
use tracing::{debug, info, warn};

use crate::keywords::{extract_keywords, is_trivial_query};
use crate::rank::{MMR_LAMBDA, apply_mmr, apply_temporal_decay};
use crate::rrf::rrf_merge;

pub const MEMORY_CONTEXT_HEADER: &str = "Relevant memory context (use when helpful):\n";

const LIMIT_PER_SCOPE: usize = 4;
const MAX_ITEMS: usize = 8;
const MIN_SCORE: f64 = 0.1;
const SOLUTIONS_LIMIT: usize = 2;
const SOLUTIONS_MIN_SCORE: f64 = 0.3;
const DEFAULT_CONTEXT_WINDOW: i64 = 128_000;
const BUDGET_SHARE: f64 = 0.05;
const MIN_BUDGET_TOKENS: usize = 500;
const MIN_ITEM_CHARS: usize = 80;
const MAX_ITEM_CHARS: usize = 500;

/// A retrieved memory tagged with the namespace it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryContextItem {
    pub namespace: String,
    pub item: MemoryItem,
}

impl MemoryContextItem {
    pub fn new(namespace: impl Into<String>, item: MemoryItem) -> Self {
        Self {
            namespace: namespace.into(),
            item,
        }
    }
}

/// The identifying parts of a turn needed for memory retrieval.
#[derive(Debug, Clone, Copy)]
pub struct MemoryQuery<'a> {
    pub bot_id: &'a str,
    pub chat_id: &'a str,
    pub query: &'a str,
    pub context_window: i64,
}

/// Builds the memory context message for a turn.
#[derive(Clone)]
pub struct MemoryContextAssembler {
    service: Arc<dyn MemoryService>,
}

impl MemoryContextAssembler {
    pub fn new(service: Arc<dyn MemoryService>) -> Self {
        Self { service }
    }

    /// Assemble the memory context message, or `None` when nothing relevant
    /// fits. Never fails: search errors degrade to no context.
    pub async fn assemble(&self, q: MemoryQuery<'_>) -> Option<ModelMessage> {
        self.assemble_at(q, Utc::now()).await
    }

    pub async fn assemble_at(&self, q: MemoryQuery<'_>, now: DateTime<Utc>) -> Option<ModelMessage> {
        if q.query.trim().is_empty() || q.bot_id.trim().is_empty() || q.chat_id.trim().is_empty() {
            return None;
        }
        if is_trivial_query(q.query) {
            debug!(bot_id = %q.bot_id, "Trivial query, skipping memory search");
            return None;
        }

        let candidates = self.retrieve(q).await?;
        let mut results = self.filter_and_extend(q, candidates).await;
        if results.is_empty() {
            return None;
        }

        let pre_decay_count = results.len();
        apply_temporal_decay(&mut results, now);
        let results = apply_mmr(results, MMR_LAMBDA);

        let (payload, injected) = render(&results, q.context_window);
        info!(
            step = "memory_filtered",
            bot_id = %q.bot_id,
            chat_id = %q.chat_id,
            pre_decay_count,
            injected,
            "Memory pipeline completed"
        );
        payload.map(ModelMessage::system)
    }

    /// Primary search plus keyword expansion, fused when both produce results.
    async fn retrieve(&self, q: MemoryQuery<'_>) -> Option<Vec<MemoryItem>> {
        let primary = match self.service.search(bot_search(q, q.query)).await {
            Ok(items) => items,
            Err(e) => {
                warn!(
                    namespace = NAMESPACE_BOT,
                    query = %flowgate_core::text::truncate(q.query, 100),
                    error = %e,
                    "Memory search for context failed"
                );
                return None;
            }
        };

        let keywords = extract_keywords(q.query);
        if keywords.is_empty() || keywords == q.query.to_lowercase() {
            return Some(primary);
        }
        match self.service.search(bot_search(q, &keywords)).await {
            Ok(expanded) if !expanded.is_empty() => {
                let merged = rrf_merge(&primary, &expanded, LIMIT_PER_SCOPE * 2);
                info!(
                    step = "query_expanded",
                    bot_id = %q.bot_id,
                    expanded_keywords = %keywords,
                    primary_results = primary.len(),
                    keyword_results = expanded.len(),
                    merged_total = merged.len(),
                    "Query expanded with keywords"
                );
                Some(merged)
            }
            Ok(_) => Some(primary),
            Err(e) => {
                debug!(error = %e, "Keyword expansion search failed");
                Some(primary)
            }
        }
    }

    /// Drop low scores and duplicates, then append shared solutions.
    async fn filter_and_extend(&self, q: MemoryQuery<'_>, candidates: Vec<MemoryItem>) -> Vec<MemoryContextItem> {
        let total = candidates.len();
        let mut seen: HashSet<String> = HashSet::new();
        let mut results = Vec::new();

        for item in candidates {
            if item.score < MIN_SCORE {
                continue;
            }
            let id = item.id.trim();
            let key = if id.is_empty() {
                format!("{NAMESPACE_BOT}:{}", item.memory.trim())
            } else {
                id.to_string()
            };
            if seen.insert(key) {
                results.push(MemoryContextItem::new(NAMESPACE_BOT, item));
            }
        }

        let solutions = SearchRequest {
            query: q.query.to_string(),
            bot_id: String::new(),
            namespace: NAMESPACE_SOLUTIONS.into(),
            scope_id: SCOPE_GLOBAL.into(),
            limit: SOLUTIONS_LIMIT,
        };
        if let Ok(items) = self.service.search(solutions).await {
            for item in items {
                if item.score < SOLUTIONS_MIN_SCORE {
                    continue;
                }
                let id = item.id.trim().to_string();
                if id.is_empty() || !seen.insert(id) {
                    continue;
                }
                results.push(MemoryContextItem::new(NAMESPACE_SOLUTIONS, item));
            }
        }

        if total > 0 || !results.is_empty() {
            info!(
                step = "memory_filtered",
                bot_id = %q.bot_id,
                total_candidates = total,
                passed = results.len(),
                min_score_threshold = MIN_SCORE,
                "Memory relevance filtering applied"
            );
        }
        results
    }
}

fn bot_search(q: MemoryQuery<'_>, query: &str) -> SearchRequest {
    SearchRequest {
        query: query.to_string(),
        bot_id: q.bot_id.to_string(),
        namespace: NAMESPACE_BOT.into(),
        scope_id: q.bot_id.to_string(),
        limit: LIMIT_PER_SCOPE,
    }
}

/// Trimmed text cut to `max` bytes on a char boundary, with `...` when cut.
fn snippet(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.len() <= max {
        return trimmed.to_string();
    }
    format!("{}...", prefix_at_boundary(trimmed, max).trim())
}

/// Char budget for the memory block of a model with `context_window` tokens.
pub fn memory_budget_chars(context_window: i64, items: &[MemoryContextItem]) -> usize {
    let window = if context_window <= 0 {
        DEFAULT_CONTEXT_WINDOW
    } else {
        context_window
    };
    let tokens = ((window as f64 * BUDGET_SHARE) as usize).max(MIN_BUDGET_TOKENS);
    let sample: String = items.iter().map(|e| e.item.memory.as_str()).collect::<Vec<_>>().join(" ");
    (tokens as f64 * estimate_chars_per_token(&sample)) as usize
}

/// Render up to [`MAX_ITEMS`] items as `- [ns] snippet` lines within the
/// budget. Returns the payload (if any line fit) and the number injected.
fn render(items: &[MemoryContextItem], context_window: i64) -> (Option<String>, usize) {
    let items = &items[..items.len().min(MAX_ITEMS)];
    let budget = memory_budget_chars(context_window, items);
    let per_item = (budget / items.len().max(1)).clamp(MIN_ITEM_CHARS, MAX_ITEM_CHARS);

    let mut out = String::from(MEMORY_CONTEXT_HEADER);
    let mut used = 0usize;
    let mut injected = 0usize;
    for entry in items {
        let text = entry.item.memory.trim();
        if text.is_empty() {
            continue;
        }
        let snippet = snippet(text, per_item);
        let cost = snippet.len() + entry.namespace.len() + 6;
        if used + cost > budget {
            break;
        }
        out.push_str("- [");
        out.push_str(&entry.namespace);
        out.push_str("] ");
        out.push_str(&snippet);
        out.push('\n');
        used += cost;
        injected += 1;
    }

    if injected == 0 {
        return (None, 0);
    }
    (Some(out.trim().to_string()), injected)
}
