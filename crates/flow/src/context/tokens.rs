//! Token estimation utilities.
//!
//! A character heuristic that is aware of CJK text: ~1.5 chars per token for
//! CJK, ~3.5 for everything else. Message estimates are taken over the JSON
//! wire form and carry a 1.2x safety margin.

use flowgate_core::message::ModelMessage;
use flowgate_core::text::{CJK_CHARS_PER_TOKEN, OTHER_CHARS_PER_TOKEN, is_cjk};

pub use flowgate_core::text::estimate_chars_per_token;

/// Multiplier applied to summed message estimates.
pub const TOKEN_SAFETY_MARGIN: f64 = 1.2;

/// Cost of a message that cannot be serialized.
const UNSERIALIZABLE_MESSAGE_TOKENS: usize = 100;

/// Estimate the token count for a string. Rounds down.
pub fn estimate_string_tokens(s: &str) -> usize {
    let (cjk, other) = s.chars().fold((0usize, 0usize), |(cjk, other), c| {
        if is_cjk(c) { (cjk + 1, other) } else { (cjk, other + 1) }
    });
    (cjk as f64 / CJK_CHARS_PER_TOKEN + other as f64 / OTHER_CHARS_PER_TOKEN) as usize
}

/// Tokens of one message's JSON form, without the safety margin.
pub fn estimate_tokens_raw(message: &ModelMessage) -> usize {
    match serde_json::to_string(message) {
        Ok(raw) => estimate_string_tokens(&raw),
        Err(_) => UNSERIALIZABLE_MESSAGE_TOKENS,
    }
}

/// Apply [`TOKEN_SAFETY_MARGIN`] to a raw token sum. Rounds down.
pub fn with_margin(raw: usize) -> usize {
    (raw as f64 * TOKEN_SAFETY_MARGIN) as usize
}

/// Estimate tokens for a slice of messages, including the safety margin.
pub fn estimate_tokens(messages: &[ModelMessage]) -> usize {
    with_margin(messages.iter().map(estimate_tokens_raw).sum())
}
