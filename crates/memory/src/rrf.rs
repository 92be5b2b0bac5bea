//! Reciprocal Rank Fusion (RRF) for merging ranked memory result lists.

use std::collections::HashMap;

use flowgate_core::memory::MemoryItem;

/// Standard RRF constant. Larger values flatten the contribution of rank.
pub const RRF_K: f64 = 60.0;

/// Fused scores are scaled so they are comparable with raw search scores.
const RRF_SCORE_SCALE: f64 = 100.0;

/// Merge two ranked result lists.
///
/// Each entry's fused score is the sum of `1/(k + rank + 1)` across both lists,
/// scaled by 100. Entries are keyed by id, or by their text when the id is
/// empty; the first-seen copy of an entry is kept. The result is sorted by
/// fused score descending with ties kept in first-seen order, then truncated
/// to `cap`.
pub fn rrf_merge(primary: &[MemoryItem], secondary: &[MemoryItem], cap: usize) -> Vec<MemoryItem> {
    // Insertion-ordered: (fused_score, first_seen_item)
    let mut fused: Vec<(f64, MemoryItem)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for list in [primary, secondary] {
        for (rank, item) in list.iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f64 + 1.0);
            let key = if item.id.is_empty() {
                item.memory.clone()
            } else {
                item.id.clone()
            };
            match index.get(&key) {
                Some(&i) => fused[i].0 += contribution,
                None => {
                    index.insert(key, fused.len());
                    fused.push((contribution, item.clone()));
                }
            }
        }
    }

    // sort_by is stable, so equal scores keep first-seen order
    fused.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    fused.truncate(cap);
    fused
        .into_iter()
        .map(|(score, mut item)| {
            item.score = score * RRF_SCORE_SCALE;
            item
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> MemoryItem {
        MemoryItem::new(id, format!("Content for {id}"), 0.5)
    }

    #[test]
    fn rrf_merges_two_lists() {
        let primary = vec![item("a"), item("b"), item("c")];
        let secondary = vec![item("b"), item("d"), item("a")];

        let merged = rrf_merge(&primary, &secondary, 10);

        assert_eq!(merged.len(), 4);
        // "a" and "b" appear in both lists, so they should be ranked highest
        let top_ids: Vec<&str> = merged.iter().take(2).map(|e| e.id.as_str()).collect();
        assert!(top_ids.contains(&"a"));
        assert!(top_ids.contains(&"b"));
    }

    #[test]
    fn rrf_respects_cap() {
        let primary = vec![item("a"), item("b"), item("c")];
        let secondary = vec![item("d"), item("e"), item("f")];
        assert_eq!(rrf_merge(&primary, &secondary, 2).len(), 2);
    }

    #[test]
    fn rrf_ties_keep_first_seen_order() {
        let primary = vec![item("a")];
        let secondary = vec![item("b")];
        let merged = rrf_merge(&primary, &secondary, 8);
        assert_eq!(merged[0].id, "a");
        assert_eq!(merged[1].id, "b");

        let again = rrf_merge(&primary, &secondary, 8);
        assert_eq!(merged, again);
    }

    #[test]
    fn rrf_scores_are_scaled() {
        let merged = rrf_merge(&[item("a")], &[item("a")], 8);
        let expected = 2.0 / 61.0 * 100.0;
        assert!((merged[0].score - expected).abs() < 1e-9);
    }

    #[test]
    fn rrf_keys_by_text_when_id_missing() {
        let mut x = MemoryItem::new("", "likes tea", 0.9);
        x.created_at = "first".into();
        let mut y = MemoryItem::new("", "likes tea", 0.2);
        y.created_at = "second".into();
        let merged = rrf_merge(&[x], &[y], 8);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].created_at, "first");
    }

    #[test]
    fn rrf_empty_inputs() {
        assert!(rrf_merge(&[], &[], 8).is_empty());
    }
}
