//! Context preparation for a gateway request.
//!
//! | Step | Module |
//! |------|--------|
//! | Drop unsupported or empty messages | [`sanitize`] |
//! | Cap history to the last N user turns | [`sanitize`] |
//! | Estimate tokens (CJK-aware) | [`tokens`] |
//! | Trim tool results, prune to budget, repair tool pairing | [`prune`] |

pub mod prune;
pub mod sanitize;
pub mod tokens;

pub use prune::{
    BudgetRatio, PruneDiagnostics, ToolTrimDiagnostic, prune_messages, repair_tool_pairing, soft_trim_tool_results,
};
pub use sanitize::{limit_history_turns, sanitize_messages};
pub use tokens::{estimate_chars_per_token, estimate_string_tokens, estimate_tokens};
