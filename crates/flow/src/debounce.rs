//! Burst merging for group conversations.
//!
//! Messages arriving for the same key (usually a chat id) within the window
//! are joined and dispatched once. Each submit restarts the window; the
//! callback from the most recent submit receives the merged text.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

/// Inserted between merged messages.
pub const MESSAGE_SEPARATOR: &str = "\n---\n";

type Execute = Box<dyn FnOnce(String) + Send + 'static>;

struct PendingGroup {
    texts: Vec<String>,
    execute: Execute,
    generation: u64,
}

#[derive(Clone)]
pub struct Debouncer {
    window: Duration,
    pending: Arc<Mutex<HashMap<String, PendingGroup>>>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingGroup>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Buffer `text` under `key`. With a zero window `execute` runs at once
    /// with `text` alone.
    pub fn submit<F>(&self, key: impl Into<String>, text: impl Into<String>, execute: F)
    where
        F: FnOnce(String) + Send + 'static,
    {
        let key = key.into();
        let text = text.into();
        if self.window.is_zero() {
            execute(text);
            return;
        }

        let generation = {
            let mut pending = self.lock();
            let group = pending.entry(key.clone()).or_insert_with(|| PendingGroup {
                texts: Vec::new(),
                execute: Box::new(|_| {}),
                generation: 0,
            });
            group.texts.push(text);
            group.execute = Box::new(execute);
            group.generation += 1;
            group.generation
        };

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.window).await;
            let ready = {
                let mut pending = this.lock();
                match pending.get(&key) {
                    Some(group) if group.generation == generation => pending.remove(&key),
                    _ => None,
                }
            };
            if let Some(group) = ready {
                debug!(key = %key, merged = group.texts.len(), "Debounce window closed");
                (group.execute)(group.texts.join(MESSAGE_SEPARATOR));
            }
        });
    }

    /// Drop buffered messages for `key` without dispatching them.
    pub fn flush(&self, key: &str) {
        self.lock().remove(key);
    }

    /// Keys with buffered messages, sorted.
    pub fn pending(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }
}
