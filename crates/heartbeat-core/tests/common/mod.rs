//! Shared helpers for heartbeat-core integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use heartbeat_core::store::Result;
use heartbeat_core::{
    DocumentStore, HeartbeatConfig, HeartbeatDoc, InMemoryStore, IndexConsistency,
    IndexDefinition, IndexRow, KeySpace, StoreError, Ttl,
};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const PREFIX: &str = "it_";

pub fn config(node: &str) -> HeartbeatConfig {
    HeartbeatConfig::new("mem://", "default", PREFIX, node)
}

pub fn keys() -> KeySpace {
    KeySpace::new(PREFIX)
}

/// In-memory store that records writes and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: InMemoryStore,
    upserts: Mutex<Vec<(String, Ttl)>>,
    failing_gets: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<String>>,
    failing_upserts: Mutex<HashSet<String>>,
    failing_queries: AtomicBool,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every upsert seen so far, as `(key, ttl)`.
    pub fn upserts(&self) -> Vec<(String, Ttl)> {
        self.upserts.lock().unwrap().clone()
    }

    pub fn upserts_for(&self, key: &str) -> Vec<Ttl> {
        self.upserts()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, ttl)| ttl)
            .collect()
    }

    pub fn fail_get(&self, key: &str) {
        self.failing_gets.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_delete(&self, key: &str) {
        self.failing_deletes.lock().unwrap().insert(key.to_string());
    }

    pub fn fail_upsert(&self, key: &str) {
        self.failing_upserts.lock().unwrap().insert(key.to_string());
    }

    /// Make every index query fail until healed.
    pub fn fail_queries(&self) {
        self.failing_queries.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.failing_queries.store(false, Ordering::SeqCst);
        self.failing_gets.lock().unwrap().clear();
        self.failing_deletes.lock().unwrap().clear();
        self.failing_upserts.lock().unwrap().clear();
    }

    /// Write a liveness record for `node` with no expiry record.
    pub async fn plant_liveness(&self, node: &str) {
        self.inner
            .upsert(
                &keys().heartbeat_key(node),
                HeartbeatDoc::liveness(node).to_value().unwrap(),
                Ttl::NONE,
            )
            .await
            .unwrap();
    }

    /// Write an expiry record for `node`.
    pub async fn plant_expiry(&self, node: &str, ttl: Ttl) {
        self.inner
            .upsert(
                &keys().timeout_key(node),
                HeartbeatDoc::expiry(node).to_value().unwrap(),
                ttl,
            )
            .await
            .unwrap();
    }

    pub fn has_liveness(&self, node: &str) -> bool {
        self.inner.contains_key(&keys().heartbeat_key(node))
    }

    pub fn has_expiry(&self, node: &str) -> bool {
        self.inner.contains_key(&keys().timeout_key(node))
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn upsert(&self, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        self.upserts.lock().unwrap().push((key.to_string(), ttl));
        if self.failing_upserts.lock().unwrap().contains(key) {
            return Err(StoreError::Unavailable(format!("upsert {}", key)));
        }
        self.inner.upsert(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Value> {
        if self.failing_gets.lock().unwrap().contains(key) {
            return Err(StoreError::Unavailable(format!("get {}", key)));
        }
        self.inner.get(key).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        if self.failing_deletes.lock().unwrap().contains(key) {
            return Err(StoreError::Unavailable(format!("delete {}", key)));
        }
        self.inner.delete(key).await
    }

    async fn query_index(
        &self,
        namespace: &str,
        name: &str,
        consistency: IndexConsistency,
    ) -> Result<Vec<IndexRow>> {
        if self.failing_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("query {}/{}", namespace, name)));
        }
        self.inner.query_index(namespace, name, consistency).await
    }

    async fn install_index(&self, definition: &IndexDefinition) -> Result<()> {
        self.inner.install_index(definition).await
    }
}

/// Handler that records every stale node it is told about.
#[derive(Clone, Default)]
pub struct StaleLog {
    calls: Arc<Mutex<Vec<String>>>,
}

impl StaleLog {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_for(&self, node: &str) -> usize {
        self.calls().iter().filter(|n| n.as_str() == node).count()
    }
}

impl heartbeat_core::StaleHeartbeatHandler for StaleLog {
    fn stale_heartbeat_detected(&self, node_id: &str) {
        self.calls.lock().unwrap().push(node_id.to_string());
    }
}
