//! In-memory document store.
//!
//! Expiry follows `tokio::time::Instant`, so tests running with a paused
//! clock see TTLs lapse exactly when virtual time passes them.

use crate::store::{
    DocumentStore, IndexConsistency, IndexDefinition, IndexRow, Result, StoreError, Ttl,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// Document store held entirely in process memory.
#[derive(Default)]
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Entry>>,
    indexes: RwLock<HashMap<(String, String), IndexDefinition>>,
    index_installs: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live (unexpired) document exists at `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.docs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Keys of all live documents, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .docs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of times an index definition has been installed.
    pub fn index_installs(&self) -> usize {
        self.index_installs.load(Ordering::SeqCst)
    }

    /// Drop documents whose TTL has elapsed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        let before = docs.len();
        docs.retain(|_, entry| entry.is_live(now));
        before - docs.len()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn upsert(&self, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        let expires_at = ttl.as_duration().map(|d| Instant::now() + d);
        self.docs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Value> {
        let now = Instant::now();
        self.docs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.docs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }

    // Every write is visible immediately, so consistency has no effect here.
    // Expired documents are dropped before the scan, as a TTL store would.
    async fn query_index(
        &self,
        namespace: &str,
        name: &str,
        _consistency: IndexConsistency,
    ) -> Result<Vec<IndexRow>> {
        let definition = self
            .indexes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("index {}/{}", namespace, name)))?;

        self.purge_expired();
        let now = Instant::now();
        let mut rows: Vec<IndexRow> = self
            .docs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(_, entry)| entry.is_live(now))
            .filter_map(|(key, entry)| definition.emit(key, &entry.value))
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn install_index(&self, definition: &IndexDefinition) -> Result<()> {
        self.indexes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                (definition.namespace.clone(), definition.name.clone()),
                definition.clone(),
            );
        self.index_installs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
