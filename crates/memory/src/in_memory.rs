//! In-memory memory service, useful for testing and ephemeral sessions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use flowgate_core::error::MemoryError;
use flowgate_core::memory::{AddRequest, MemoryItem, MemoryService, SearchRequest};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Record {
    namespace: String,
    scope_id: String,
    item: MemoryItem,
}

/// Stores memories in a Vec, scoped by namespace and scope id.
///
/// Search scores are the share of query words found in the memory text, so
/// results are deterministic and easy to reason about in tests.
#[derive(Clone, Default)]
pub struct InMemoryMemoryService {
    records: Arc<RwLock<Vec<Record>>>,
}

impl InMemoryMemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a memory directly, bypassing extraction.
    pub async fn insert(&self, namespace: &str, scope_id: &str, mut item: MemoryItem) {
        if item.id.is_empty() {
            item.id = Uuid::new_v4().to_string();
        }
        self.records.write().await.push(Record {
            namespace: namespace.into(),
            scope_id: scope_id.into(),
            item,
        });
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

fn keyword_score(query_words: &[String], text: &str) -> f64 {
    if query_words.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let hits = query_words.iter().filter(|w| lower.contains(w.as_str())).count();
    hits as f64 / query_words.len() as f64
}

#[async_trait]
impl MemoryService for InMemoryMemoryService {
    async fn search(&self, req: SearchRequest) -> Result<Vec<MemoryItem>, MemoryError> {
        let words: Vec<String> = req.query.to_lowercase().split_whitespace().map(str::to_string).collect();
        let records = self.records.read().await;

        let mut results: Vec<MemoryItem> = records
            .iter()
            .filter(|r| r.namespace == req.namespace && r.scope_id == req.scope_id)
            .filter_map(|r| {
                let score = keyword_score(&words, &r.item.memory);
                (score > 0.0).then(|| MemoryItem {
                    score,
                    ..r.item.clone()
                })
            })
            .collect();

        results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(req.limit);
        Ok(results)
    }

    async fn add(&self, req: AddRequest) -> Result<Vec<MemoryItem>, MemoryError> {
        let now = Utc::now().to_rfc3339();
        let mut added = Vec::new();
        let mut records = self.records.write().await;
        for msg in &req.messages {
            let text = msg.text_content();
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            let item = MemoryItem {
                id: Uuid::new_v4().to_string(),
                memory: text.to_string(),
                score: 0.0,
                created_at: now.clone(),
                updated_at: now.clone(),
            };
            records.push(Record {
                namespace: req.namespace.clone(),
                scope_id: req.scope_id.clone(),
                item: item.clone(),
            });
            added.push(item);
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowgate_core::message::ModelMessage;

    fn search(query: &str, namespace: &str, scope: &str) -> SearchRequest {
        SearchRequest {
            query: query.into(),
            bot_id: scope.into(),
            namespace: namespace.into(),
            scope_id: scope.into(),
            limit: 10,
        }
    }

    #[tokio::test]
    async fn add_and_search_by_keyword() {
        let mem = InMemoryMemoryService::new();
        mem.add(AddRequest {
            messages: vec![
                ModelMessage::user("Rust is great for systems programming"),
                ModelMessage::assistant("Python is great for scripting"),
                ModelMessage::assistant("   "),
            ],
            bot_id: "b".into(),
            namespace: "bot".into(),
            scope_id: "b".into(),
        })
        .await
        .unwrap();
        assert_eq!(mem.count().await, 2);

        let results = mem.search(search("rust systems", "bot", "b")).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].memory.contains("Rust"));
        assert!((results[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn search_is_scoped() {
        let mem = InMemoryMemoryService::new();
        mem.insert("bot", "b1", MemoryItem::new("", "likes green tea", 0.0)).await;
        mem.insert("solutions", "global", MemoryItem::new("s", "green tea recipe", 0.0)).await;

        let bot = mem.search(search("green tea", "bot", "b2")).await.unwrap();
        assert!(bot.is_empty());
        let shared = mem.search(search("green tea", "solutions", "global")).await.unwrap();
        assert_eq!(shared[0].id, "s");
    }

    #[tokio::test]
    async fn search_ranks_by_overlap_and_limits() {
        let mem = InMemoryMemoryService::new();
        mem.insert("bot", "b", MemoryItem::new("half", "deploy notes", 0.0)).await;
        mem.insert("bot", "b", MemoryItem::new("full", "deploy plan friday", 0.0)).await;
        let mut req = search("deploy plan", "bot", "b");
        req.limit = 1;
        let results = mem.search(req).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "full");
    }
}
