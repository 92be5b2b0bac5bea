//! Query classification and keyword expansion.

/// Queries at most this many chars may be trivial.
const TRIVIAL_QUERY_MAX_CHARS: usize = 15;

const TRIVIAL_QUERIES: &[&str] = &[
    "hi", "hello", "hey", "yo", "ok", "okay", "k", "yes", "no", "yep", "nope", "yeah", "nah",
    "thanks", "thank you", "thx", "ty", "bye", "goodbye", "好", "好的", "嗯", "嗯嗯", "哦",
    "是的", "对", "你好", "谢谢", "再见", "行", "可以", "👍", "👌", "🙏",
];

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "being", "have", "has", "had",
    "do", "does", "did", "will", "would", "could", "should", "may", "might", "shall", "can",
    "to", "of", "in", "for", "on", "with", "at", "by", "from", "as", "into", "about", "like",
    "and", "or", "but", "if", "then", "else", "it", "its", "this", "that", "these", "those",
    "i", "me", "my", "we", "our", "you", "your", "he", "she", "they", "them", "his", "her",
    "what", "which", "who", "when", "where", "how", "not", "no", "so", "up", "out", "just",
    "的", "了", "是", "在", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "上", "也",
    "很", "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好", "自己", "这", "他", "她",
    "吗", "吧", "呢", "啊", "哦", "嗯", "把", "被", "让", "跟", "给", "从",
];

const WORD_PUNCTUATION: &str = ".,!?;:\"'()[]{}。，！？；：“”‘’（）【】";

/// Greetings, acknowledgements and similar short replies that never warrant
/// a memory lookup.
pub fn is_trivial_query(query: &str) -> bool {
    let q = query.trim();
    if q.chars().count() > TRIVIAL_QUERY_MAX_CHARS {
        return false;
    }
    let lower = q.to_lowercase();
    TRIVIAL_QUERIES.contains(&lower.as_str())
}

/// Content words of `query`, lowercased and space-joined. Empty when nothing
/// but stop words and punctuation remain.
pub fn extract_keywords(query: &str) -> String {
    query
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c| WORD_PUNCTUATION.contains(c)))
        .filter(|w| w.len() >= 2 && !STOP_WORDS.contains(w))
        .collect::<Vec<_>>()
        .join(" ")
}
