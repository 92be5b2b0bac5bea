//! Text helpers shared by token estimation and snippet building.

use std::collections::HashSet;

/// Characters per token for CJK text.
pub const CJK_CHARS_PER_TOKEN: f64 = 1.5;
/// Characters per token for everything else.
pub const OTHER_CHARS_PER_TOKEN: f64 = 3.5;

const CHARS_PER_TOKEN_SAMPLE: usize = 500;

/// Whether `c` is a CJK ideograph, kana, hangul, CJK punctuation or a
/// full-width form.
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32,
        0x4E00..=0x9FFF
        | 0x3400..=0x4DBF
        | 0x3000..=0x303F
        | 0xFF00..=0xFFEF
        | 0xAC00..=0xD7AF
        | 0x3040..=0x309F
        | 0x30A0..=0x30FF)
}

/// Average characters per token, estimated from the CJK ratio of the first
/// 500 characters of `text`.
pub fn estimate_chars_per_token(text: &str) -> f64 {
    let (total, cjk) = text
        .chars()
        .take(CHARS_PER_TOKEN_SAMPLE)
        .fold((0usize, 0usize), |(t, c), ch| (t + 1, c + usize::from(is_cjk(ch))));
    if total == 0 {
        return OTHER_CHARS_PER_TOKEN;
    }
    let ratio = cjk as f64 / total as f64;
    CJK_CHARS_PER_TOKEN * ratio + OTHER_CHARS_PER_TOKEN * (1.0 - ratio)
}

/// Longest prefix of `s` that is at most `max_bytes` long and ends on a char
/// boundary.
pub fn prefix_at_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Longest suffix of `s` that is at most `max_bytes` long and starts on a
/// char boundary.
pub fn suffix_at_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

/// Jaccard similarity of two token sets; 0 when either is empty.
pub fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Truncate to `max_bytes` (char-safe), appending `...` when cut.
pub fn truncate(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    format!("{}...", prefix_at_boundary(s, max_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cjk_ranges() {
        assert!(is_cjk('中'));
        assert!(is_cjk('の'));
        assert!(is_cjk('カ'));
        assert!(is_cjk('한'));
        assert!(is_cjk('。'));
        assert!(is_cjk('！'));
        assert!(!is_cjk('a'));
        assert!(!is_cjk('é'));
    }

    #[test]
    fn chars_per_token_blends_by_ratio() {
        assert_eq!(estimate_chars_per_token(""), 3.5);
        assert_eq!(estimate_chars_per_token("hello"), 3.5);
        assert_eq!(estimate_chars_per_token("你好世界"), 1.5);
        let mixed = estimate_chars_per_token("ab中文");
        assert!((mixed - 2.5).abs() < 1e-9);
    }

    #[test]
    fn boundaries_respect_multibyte_chars() {
        let s = "héllo";
        assert_eq!(prefix_at_boundary(s, 2), "h");
        assert_eq!(suffix_at_boundary(s, 5), "éllo");
        assert_eq!(suffix_at_boundary(s, 4), "llo");
    }

    #[test]
    fn jaccard_overlap() {
        let a: HashSet<&str> = ["a", "b", "c"].into();
        let b: HashSet<&str> = ["b", "c", "d"].into();
        assert!((jaccard(&a, &b) - 0.5).abs() < 1e-9);
        assert_eq!(jaccard(&a, &HashSet::new()), 0.0);
    }

    #[test]
    fn truncate_appends_ellipsis() {
        assert_eq!(truncate("abcdef", 3), "abc...");
        assert_eq!(truncate("abc", 3), "abc");
        assert_eq!(truncate("中文字", 4), "中...");
    }
}
