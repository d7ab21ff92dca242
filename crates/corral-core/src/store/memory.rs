//! In-memory discovery store
//!
//! Backs the test suite and single-node local runs. Expiry is lazy:
//! deadlines are checked against the tokio clock at read time, so tests
//! driving paused time exercise real TTL behavior.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::keys;
use crate::store::DiscoveryStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live_value(&self, now: Instant) -> Option<&str> {
        match self.expires_at {
            Some(deadline) if deadline <= now => None,
            _ => Some(&self.value),
        }
    }
}

/// Process-local store with TTL expiry.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    watchers: Mutex<HashMap<String, watch::Sender<Option<String>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn notify(&self, key: &str, value: Option<String>) {
        let watchers = self.watchers.lock().expect("watcher lock poisoned");
        if let Some(tx) = watchers.get(key) {
            let _ = tx.send(value);
        }
    }

    /// Remove a key outright. Test helper for simulating expiry-like
    /// disappearance without waiting out a TTL.
    pub fn remove(&self, key: &str) {
        self.entries
            .lock()
            .expect("entry lock poisoned")
            .remove(key);
        self.notify(key, None);
    }
}

#[async_trait]
impl DiscoveryStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("entry lock poisoned");
        match entries.get(key) {
            Some(entry) => match entry.live_value(now) {
                Some(value) => Ok(Some(value.to_string())),
                None => {
                    entries.remove(key);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().expect("entry lock poisoned").insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<BTreeMap<String, String>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().expect("entry lock poisoned");
        let mut children = BTreeMap::new();
        for (key, entry) in entries.iter() {
            if !key.starts_with(prefix) {
                continue;
            }
            if let Some(value) = entry.live_value(now) {
                children.insert(keys::basename(key).to_string(), value.to_string());
            }
        }
        Ok(children)
    }

    async fn watch(&self, key: &str) -> Result<watch::Receiver<Option<String>>, StoreError> {
        let initial = self.get(key).await?;
        let mut watchers = self.watchers.lock().expect("watcher lock poisoned");
        let rx = watchers
            .entry(key.to_string())
            .or_insert_with(|| watch::channel(initial).0)
            .subscribe();
        Ok(rx)
    }
}
