//! Token budget pruning.
//!
//! Keeps the outgoing message list inside a share of the model's context
//! window:
//!
//! 1. Oversized tool results are soft-trimmed to head + tail.
//! 2. If the estimate still exceeds the budget, the newest six messages are
//!    protected and older ones are dropped oldest first.
//! 3. Tool-call pairing is repaired so no provider sees an orphaned
//!    tool result or an unanswered, empty tool call.

use std::collections::HashSet;

use flowgate_core::message::{MessageContent, ModelMessage, Role};
use flowgate_core::text::{prefix_at_boundary, suffix_at_boundary};
use serde::{Deserialize, Serialize};

use super::tokens::{
    estimate_chars_per_token, estimate_string_tokens, estimate_tokens, estimate_tokens_raw,
    with_margin,
};

/// Context window assumed when the model does not declare one.
pub const DEFAULT_CONTEXT_WINDOW: i64 = 128_000;
/// Tokens reserved for the system prompt the gateway adds on its side.
pub const GATEWAY_SYSTEM_PROMPT_ESTIMATE: usize = 2000;
pub const MIN_BUDGET: usize = 4096;
pub const PROTECTED_TAIL: usize = 6;

const TOOL_RESULT_CONTEXT_SHARE: f64 = 0.3;
const TOOL_RESULT_HARD_MAX_CHARS: usize = 400_000;
const TOOL_RESULT_HEAD_CHARS: usize = 1500;
const TOOL_RESULT_TAIL_CHARS: usize = 1500;
const TOOL_RESULT_MIN_KEEP_CHARS: usize = TOOL_RESULT_HEAD_CHARS + TOOL_RESULT_TAIL_CHARS;
const TOOL_SAMPLE_PER_MESSAGE: usize = 500;
const TOOL_SAMPLE_TARGET: usize = 1500;
const TRIM_MARKER: &str = "[... content trimmed, original ";

/// Share of the remaining window given to conversation messages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetRatio(f64);

impl BudgetRatio {
    pub const NORMAL: BudgetRatio = BudgetRatio(0.6);
    /// Used when the gateway rejected the request for context overflow.
    pub const OVERFLOW: BudgetRatio = BudgetRatio(0.4);

    /// Ratios outside `(0, 1]` fall back to [`BudgetRatio::OVERFLOW`].
    pub fn new(ratio: f64) -> Self {
        if ratio > 0.0 && ratio <= 1.0 { BudgetRatio(ratio) } else { BudgetRatio::OVERFLOW }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for BudgetRatio {
    fn default() -> Self {
        BudgetRatio::NORMAL
    }
}

/// One soft-trimmed tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolTrimDiagnostic {
    pub tool_call_id: String,
    pub original_chars: usize,
    pub trimmed_chars: usize,
}

/// What the pruner saw and did. Logged, never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneDiagnostics {
    pub system_tokens: usize,
    pub gateway_estimate: usize,
    pub total_system_tokens: usize,
    pub budget: usize,
    pub estimated_total_before: usize,
    pub estimated_total_after: usize,
    pub protected_tail: usize,
    pub pruned: bool,
}

fn effective_window(window: i64) -> i64 {
    if window <= 0 { DEFAULT_CONTEXT_WINDOW } else { window }
}

/// First 500 bytes of every tool message, until 1500 bytes are collected.
fn sample_tool_results(messages: &[ModelMessage]) -> String {
    let mut sample = String::new();
    for msg in messages.iter().filter(|m| m.role == Role::Tool) {
        let text = msg.text_content();
        sample.push_str(prefix_at_boundary(&text, TOOL_SAMPLE_PER_MESSAGE));
        if sample.len() >= TOOL_SAMPLE_TARGET {
            break;
        }
    }
    sample
}

/// Shorten tool results that exceed 30% of the window (in characters,
/// CJK-aware) to their first and last 1500 bytes.
pub fn soft_trim_tool_results(messages: Vec<ModelMessage>, window: i64) -> (Vec<ModelMessage>, Vec<ToolTrimDiagnostic>) {
    let window = effective_window(window);
    let cpt = estimate_chars_per_token(&sample_tool_results(&messages));
    let max_chars = ((window as f64 * TOOL_RESULT_CONTEXT_SHARE * cpt) as usize)
        .clamp(TOOL_RESULT_MIN_KEEP_CHARS, TOOL_RESULT_HARD_MAX_CHARS);

    let mut trims = Vec::new();
    let out = messages
        .into_iter()
        .map(|msg| {
            if msg.role != Role::Tool {
                return msg;
            }
            let text = msg.text_content();
            if text.len() <= max_chars || text.contains(TRIM_MARKER) {
                return msg;
            }
            let trimmed = format!(
                "{}\n\n{TRIM_MARKER}{} chars ...]\n\n{}",
                prefix_at_boundary(&text, TOOL_RESULT_HEAD_CHARS),
                text.len(),
                suffix_at_boundary(&text, TOOL_RESULT_TAIL_CHARS),
            );
            trims.push(ToolTrimDiagnostic {
                tool_call_id: msg.tool_call_id.clone(),
                original_chars: text.len(),
                trimmed_chars: trimmed.len(),
            });
            ModelMessage {
                role: msg.role,
                content: Some(MessageContent::Text(trimmed)),
                tool_call_id: msg.tool_call_id,
                tool_calls: Vec::new(),
                name: msg.name,
            }
        })
        .collect();
    (out, trims)
}

/// Unserializable system messages count nothing here.
fn system_tokens(messages: &[ModelMessage]) -> usize {
    let raw: usize = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .filter_map(|m| serde_json::to_string(m).ok())
        .map(|json| estimate_string_tokens(&json))
        .sum();
    with_margin(raw)
}

/// Prune `messages` to fit `ratio` of the window left after system prompts.
///
/// Returns the kept messages, any tool-result trims, and diagnostics.
/// Running the pruner on its own output changes nothing.
pub fn prune_messages(
    messages: Vec<ModelMessage>,
    window: i64,
    ratio: BudgetRatio,
) -> (Vec<ModelMessage>, Vec<ToolTrimDiagnostic>, PruneDiagnostics) {
    let window = effective_window(window);
    let (messages, trims) = soft_trim_tool_results(messages, window);

    let system = system_tokens(&messages);
    let total_system = system + GATEWAY_SYSTEM_PROMPT_ESTIMATE;
    let budget = (((window - total_system as i64) as f64 * ratio.value()).max(0.0) as usize).max(MIN_BUDGET);

    // Every candidate result is a suffix of `messages`, so estimates come
    // from per-message raw counts.
    let raw: Vec<usize> = messages.iter().map(estimate_tokens_raw).collect();
    let range_estimate = |from: usize, to: usize| with_margin(raw[from..to].iter().sum());
    let n = messages.len();

    let total = range_estimate(0, n);
    let mut diag = PruneDiagnostics {
        system_tokens: system,
        gateway_estimate: GATEWAY_SYSTEM_PROMPT_ESTIMATE,
        total_system_tokens: total_system,
        budget,
        estimated_total_before: total,
        ..Default::default()
    };

    if total <= budget {
        diag.estimated_total_after = total;
        return (messages, trims, diag);
    }

    diag.pruned = true;
    let tail_len = PROTECTED_TAIL.min(n);
    diag.protected_tail = tail_len;
    let split = n - tail_len;

    let protected_tokens = range_estimate(split, n);
    let start = if protected_tokens >= budget {
        let mut start = split;
        while n - start > 1 && range_estimate(start, n) > budget {
            start += 1;
        }
        start
    } else if split == 0 {
        0
    } else {
        let remaining = budget - protected_tokens;
        let mid = split / 2;
        let new_tokens = range_estimate(mid, split);

        let mut start = 0;
        while start < mid && range_estimate(start, mid) + new_tokens > remaining {
            start += 1;
        }
        while n - start > tail_len + 1 && range_estimate(start, n) > budget {
            start += 1;
        }
        start
    };

    let result = repair_tool_pairing(messages.into_iter().skip(start).collect());
    diag.estimated_total_after = estimate_tokens(&result);
    (result, trims, diag)
}

/// Remove tool results whose call is gone, and empty assistant tool calls
/// none of whose results survived.
pub fn repair_tool_pairing(messages: Vec<ModelMessage>) -> Vec<ModelMessage> {
    let mut use_ids: HashSet<String> = HashSet::new();
    let mut result_ids: HashSet<String> = HashSet::new();
    for msg in &messages {
        match msg.role {
            Role::Tool if !msg.tool_call_id.trim().is_empty() => {
                result_ids.insert(msg.tool_call_id.clone());
            }
            Role::Assistant => use_ids.extend(msg.assistant_tool_call_ids()),
            _ => {}
        }
    }

    messages
        .into_iter()
        .filter(|msg| match msg.role {
            Role::Tool if !msg.tool_call_id.trim().is_empty() => use_ids.contains(&msg.tool_call_id),
            Role::Assistant => {
                let ids = msg.assistant_tool_call_ids();
                ids.is_empty() || msg.has_content() || ids.iter().any(|id| result_ids.contains(id))
            }
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::message::{ContentPart, ToolCall};
    use serde_json::json;

    fn tool_use(id: &str) -> ModelMessage {
        ModelMessage::new(Role::Assistant, None).with_tool_calls(vec![ToolCall::function(id, "exec", "{}")])
    }

    fn conversation(turns: usize, size: usize) -> Vec<ModelMessage> {
        (0..turns)
            .flat_map(|i| {
                [
                    ModelMessage::user(format!("{i} {}", "q".repeat(size))),
                    ModelMessage::assistant(format!("{i} {}", "a".repeat(size))),
                ]
            })
            .collect()
    }

    // ── Soft trim ──

    #[test]
    fn large_tool_result_is_trimmed_at_small_window() {
        let msgs = vec![ModelMessage::tool_result("call_1", "x".repeat(10_000))];
        let (out, trims) = soft_trim_tool_results(msgs, 8000);

        assert_eq!(trims.len(), 1);
        assert_eq!(trims[0].original_chars, 10_000);
        assert_eq!(trims[0].tool_call_id, "call_1");
        let text = out[0].text_content();
        assert!(text.contains("[... content trimmed, original 10000 chars ...]"));
        assert_eq!(text.len(), trims[0].trimmed_chars);
        assert_eq!(out[0].tool_call_id, "call_1");
    }

    #[test]
    fn small_tool_results_and_other_roles_untouched() {
        let msgs = vec![
            ModelMessage::tool_result("c", "short"),
            ModelMessage::assistant("y".repeat(50_000)),
        ];
        let (out, trims) = soft_trim_tool_results(msgs.clone(), 8000);
        assert!(trims.is_empty());
        assert_eq!(out, msgs);
    }

    #[test]
    fn trim_is_char_boundary_safe() {
        let msgs = vec![ModelMessage::tool_result("c", "日本語".repeat(2000))];
        let (out, trims) = soft_trim_tool_results(msgs, 4000);
        assert_eq!(trims.len(), 1);
        assert!(out[0].text_content().starts_with('日'));
    }

    #[test]
    fn trimming_twice_is_stable() {
        let msgs = vec![ModelMessage::tool_result("c", "z".repeat(20_000))];
        let (once, _) = soft_trim_tool_results(msgs, 1000);
        let (twice, trims) = soft_trim_tool_results(once.clone(), 1000);
        assert!(trims.is_empty());
        assert_eq!(once, twice);
    }

    // ── Budget ──

    #[test]
    fn within_budget_is_unchanged() {
        let msgs = conversation(3, 20);
        let (out, trims, diag) = prune_messages(msgs.clone(), 128_000, BudgetRatio::NORMAL);
        assert_eq!(out, msgs);
        assert!(trims.is_empty());
        assert!(!diag.pruned);
        assert_eq!(diag.estimated_total_before, diag.estimated_total_after);
        assert_eq!(diag.gateway_estimate, GATEWAY_SYSTEM_PROMPT_ESTIMATE);
    }

    #[test]
    fn budget_has_a_floor() {
        let (_, _, diag) = prune_messages(vec![ModelMessage::user("x")], 1000, BudgetRatio::NORMAL);
        assert_eq!(diag.budget, MIN_BUDGET);
    }

    #[test]
    fn budget_respected_after_pruning() {
        let msgs = conversation(200, 400);
        let (out, _, diag) = prune_messages(msgs, 16_000, BudgetRatio::NORMAL);
        assert!(diag.pruned);
        assert_eq!(diag.protected_tail, PROTECTED_TAIL);
        assert!(diag.estimated_total_after <= diag.budget);
        assert!(out.len() >= PROTECTED_TAIL);
        // newest message survives
        assert!(out.last().unwrap().text_content().starts_with("199 "));
    }

    #[test]
    fn overflow_ratio_prunes_harder() {
        let msgs = conversation(200, 400);
        let (normal, _, _) = prune_messages(msgs.clone(), 32_000, BudgetRatio::NORMAL);
        let (overflow, _, diag) = prune_messages(msgs, 32_000, BudgetRatio::OVERFLOW);
        assert!(overflow.len() < normal.len());
        assert_eq!(diag.budget, ((32_000 - 2000) as f64 * 0.4) as usize);
    }

    #[test]
    fn oversized_tail_keeps_at_least_one_message() {
        let msgs = vec![
            ModelMessage::user("a".repeat(40_000)),
            ModelMessage::assistant("b".repeat(40_000)),
        ];
        let (out, _, diag) = prune_messages(msgs, 8000, BudgetRatio::NORMAL);
        assert_eq!(out.len(), 1);
        assert_eq!(diag.protected_tail, 2);
    }

    #[test]
    fn pruning_is_idempotent() {
        let msgs = conversation(120, 300);
        let (once, _, _) = prune_messages(msgs, 20_000, BudgetRatio::NORMAL);
        let (twice, trims, diag) = prune_messages(once.clone(), 20_000, BudgetRatio::NORMAL);
        assert_eq!(once, twice);
        assert!(trims.is_empty());
        assert!(!diag.pruned);
    }

    #[test]
    fn system_tokens_reduce_budget() {
        let mut msgs = vec![ModelMessage::system("s".repeat(7000))];
        msgs.extend(conversation(2, 10));
        let (_, _, diag) = prune_messages(msgs, 128_000, BudgetRatio::NORMAL);
        assert!(diag.system_tokens >= 2000);
        assert_eq!(diag.total_system_tokens, diag.system_tokens + 2000);
    }

    // ── Tool pairing ──

    #[test]
    fn orphaned_tool_result_removed() {
        let msgs = vec![ModelMessage::tool_result("gone", "output"), ModelMessage::user("hi")];
        let out = repair_tool_pairing(msgs);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].role, Role::User);
    }

    #[test]
    fn unanswered_empty_tool_call_removed() {
        let with_text = tool_use("c2");
        let with_text = ModelMessage {
            content: Some(MessageContent::Text("let me check".into())),
            ..with_text
        };
        let msgs = vec![tool_use("c1"), with_text, ModelMessage::user("next")];
        let out = repair_tool_pairing(msgs);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text_content(), "let me check");
    }

    #[test]
    fn pairs_from_content_parts_are_kept() {
        let call = ModelMessage::with_parts(
            Role::Assistant,
            vec![ContentPart::tool_call("p1", "search", json!({"q": "x"}))],
        );
        let result = ModelMessage::tool_result("p1", "found");
        let out = repair_tool_pairing(vec![call.clone(), result.clone()]);
        assert_eq!(out, vec![call, result]);
    }

    #[test]
    fn pairing_invariant_holds_after_prune() {
        let mut msgs = Vec::new();
        for i in 0..60 {
            let id = format!("call_{i}");
            msgs.push(ModelMessage::user(format!("run {i} {}", "u".repeat(300))));
            msgs.push(tool_use(&id));
            msgs.push(ModelMessage::tool_result(id, "r".repeat(300)));
            msgs.push(ModelMessage::assistant(format!("done {i}")));
        }
        let (out, _, _) = prune_messages(msgs, 12_000, BudgetRatio::NORMAL);

        let uses: HashSet<String> = out.iter().flat_map(|m| m.assistant_tool_call_ids()).collect();
        let results: HashSet<String> = out
            .iter()
            .filter(|m| m.role == Role::Tool)
            .map(|m| m.tool_call_id.clone())
            .collect();
        assert!(results.iter().all(|id| uses.contains(id)));
        for m in out.iter().filter(|m| m.role == Role::Assistant && !m.has_content()) {
            assert!(m.assistant_tool_call_ids().iter().any(|id| results.contains(id)));
        }
    }
}
