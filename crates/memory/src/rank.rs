//! Post-retrieval ranking: temporal decay and maximal marginal relevance.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDateTime, Utc};
use flowgate_core::text::jaccard;

use crate::context::MemoryContextItem;

/// Scores halve every this many days since the last update.
pub const DECAY_HALF_LIFE_DAYS: f64 = 30.0;

/// Default relevance/diversity trade-off for [`apply_mmr`].
pub const MMR_LAMBDA: f64 = 0.7;

/// Parse an RFC3339 or `YYYY-MM-DDTHH:MM:SS` (assumed UTC) timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S").map(|t| t.and_utc()))
        .ok()
}

/// Multiply each score by `exp(-ln2 / half_life * age_days)`.
///
/// Age is measured from `updated_at`, falling back to `created_at`. Future
/// timestamps count as age zero; items without a parsable timestamp keep
/// their score.
pub fn apply_temporal_decay(items: &mut [MemoryContextItem], now: DateTime<Utc>) {
    for entry in items.iter_mut() {
        let stamp = if entry.item.updated_at.is_empty() {
            &entry.item.created_at
        } else {
            &entry.item.updated_at
        };
        let Some(at) = parse_timestamp(stamp) else {
            continue;
        };
        let age_days = ((now - at).num_milliseconds() as f64 / 86_400_000.0).max(0.0);
        let decay = (-std::f64::consts::LN_2 / DECAY_HALF_LIFE_DAYS * age_days).exp();
        entry.item.score *= decay;
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase().split_whitespace().map(str::to_string).collect()
}

/// Reorder by maximal marginal relevance.
///
/// The first item is always selected first. Each following pick maximizes
/// `lambda * score - (1 - lambda) * max_similarity_to_selected`, using
/// Jaccard similarity over lowercased whitespace tokens. Ties go to the
/// earlier candidate.
pub fn apply_mmr(items: Vec<MemoryContextItem>, lambda: f64) -> Vec<MemoryContextItem> {
    if items.len() <= 1 {
        return items;
    }

    let sets: Vec<HashSet<String>> = items.iter().map(|e| word_set(&e.item.memory)).collect();
    let mut selected: Vec<usize> = vec![0];
    let mut remaining: Vec<usize> = (1..items.len()).collect();

    while !remaining.is_empty() {
        let mut best: Option<(usize, f64)> = None;
        for (pos, &cand) in remaining.iter().enumerate() {
            let max_sim = selected
                .iter()
                .map(|&sel| jaccard(&sets[cand], &sets[sel]))
                .fold(0.0, f64::max);
            let mmr = lambda * items[cand].item.score - (1.0 - lambda) * max_sim;
            if best.is_none_or(|(_, b)| mmr > b) {
                best = Some((pos, mmr));
            }
        }
        let Some((pos, _)) = best else { break };
        selected.push(remaining.remove(pos));
    }

    let mut slots: Vec<Option<MemoryContextItem>> = items.into_iter().map(Some).collect();
    selected.into_iter().filter_map(|i| slots[i].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use flowgate_core::memory::MemoryItem;

    fn ctx(id: &str, text: &str, score: f64) -> MemoryContextItem {
        MemoryContextItem::new("bot", MemoryItem::new(id, text, score))
    }

    #[test]
    fn decay_halves_at_half_life() {
        let now = Utc::now();
        let mut items = vec![ctx("a", "x", 1.0)];
        items[0].item.updated_at = (now - Duration::days(30)).to_rfc3339();
        apply_temporal_decay(&mut items, now);
        assert!((items[0].item.score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn decay_is_monotonic_in_age() {
        let now = Utc::now();
        let mut items = vec![ctx("new", "x", 1.0), ctx("old", "y", 1.0)];
        items[0].item.created_at = (now - Duration::days(1)).format("%Y-%m-%dT%H:%M:%S").to_string();
        items[1].item.created_at = (now - Duration::days(90)).to_rfc3339();
        apply_temporal_decay(&mut items, now);
        assert!(items[0].item.score > items[1].item.score);
        assert!(items[0].item.score <= 1.0);
    }

    #[test]
    fn decay_prefers_updated_at() {
        let now = Utc::now();
        let mut items = vec![ctx("a", "x", 1.0)];
        items[0].item.created_at = (now - Duration::days(300)).to_rfc3339();
        items[0].item.updated_at = now.to_rfc3339();
        apply_temporal_decay(&mut items, now);
        assert!((items[0].item.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn decay_clamps_future_and_skips_unparsable() {
        let now = Utc::now();
        let mut items = vec![ctx("future", "x", 0.8), ctx("bad", "y", 0.8), ctx("none", "z", 0.8)];
        items[0].item.updated_at = (now + Duration::days(5)).to_rfc3339();
        items[1].item.updated_at = "yesterday".into();
        apply_temporal_decay(&mut items, now);
        for it in &items {
            assert!((it.item.score - 0.8).abs() < 1e-9);
        }
    }

    #[test]
    fn mmr_seeds_with_first_item() {
        let items = vec![ctx("a", "alpha beta", 0.1), ctx("b", "gamma", 0.9)];
        let out = apply_mmr(items, MMR_LAMBDA);
        assert_eq!(out[0].item.id, "a");
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn mmr_penalizes_near_duplicates() {
        let items = vec![
            ctx("a", "user prefers dark mode in editor", 1.0),
            ctx("b", "user prefers dark mode in editor", 0.9),
            ctx("c", "deploys happen on friday", 0.85),
        ];
        let out = apply_mmr(items, MMR_LAMBDA);
        let ids: Vec<&str> = out.iter().map(|e| e.item.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c", "b"]);
    }

    #[test]
    fn mmr_single_item_unchanged() {
        let out = apply_mmr(vec![ctx("a", "x", 1.0)], MMR_LAMBDA);
        assert_eq!(out.len(), 1);
    }
}
