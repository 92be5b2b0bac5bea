//! TTL + capacity bounded cache in front of a [`MemoryService`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use flowgate_core::error::MemoryError;
use flowgate_core::memory::{AddRequest, MemoryItem, MemoryService, SearchRequest};
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry {
    inserted: Instant,
    items: Vec<MemoryItem>,
}

/// Caches search results by (query, bot, namespace, scope, limit).
///
/// Entries expire after `ttl`. When the cache is full, the oldest tenth of
/// the entries (at least one) is evicted. `add` invalidates every entry in the
/// same namespace and scope so new memories are visible immediately.
pub struct CachedMemoryService {
    inner: Arc<dyn MemoryService>,
    ttl: Duration,
    capacity: usize,
    entries: Mutex<HashMap<SearchRequest, CacheEntry>>,
}

impl CachedMemoryService {
    pub fn new(inner: Arc<dyn MemoryService>, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner,
            ttl,
            capacity: capacity.max(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live (possibly expired, not yet purged) entries.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &SearchRequest) -> Option<Vec<MemoryItem>> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => Some(entry.items.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn store(&self, key: SearchRequest, items: Vec<MemoryItem>) {
        let Ok(mut entries) = self.entries.lock() else {
            return;
        };
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            evict_oldest(&mut entries, (self.capacity / 10).max(1));
        }
        entries.insert(
            key,
            CacheEntry {
                inserted: Instant::now(),
                items,
            },
        );
    }

    fn invalidate(&self, namespace: &str, scope_id: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|k, _| !(k.namespace == namespace && k.scope_id == scope_id));
        }
    }
}

fn evict_oldest(entries: &mut HashMap<SearchRequest, CacheEntry>, count: usize) {
    let mut by_age: Vec<(Instant, SearchRequest)> =
        entries.iter().map(|(k, v)| (v.inserted, k.clone())).collect();
    by_age.sort_by_key(|(at, _)| *at);
    for (_, key) in by_age.into_iter().take(count) {
        entries.remove(&key);
    }
    debug!(evicted = count, "Memory search cache evicted oldest entries");
}

#[async_trait]
impl MemoryService for CachedMemoryService {
    async fn search(&self, req: SearchRequest) -> Result<Vec<MemoryItem>, MemoryError> {
        if let Some(hit) = self.lookup(&req) {
            return Ok(hit);
        }
        let items = self.inner.search(req.clone()).await?;
        self.store(req, items.clone());
        Ok(items)
    }

    async fn add(&self, req: AddRequest) -> Result<Vec<MemoryItem>, MemoryError> {
        let (namespace, scope) = (req.namespace.clone(), req.scope_id.clone());
        let result = self.inner.add(req).await;
        self.invalidate(&namespace, &scope);
        result
    }
}
