//! DocumentStore trait abstraction for the shared heartbeat store.
//!
//! Implementations:
//! - `InMemoryStore` - For testing and single-process clusters
//! - `FileStore` (in heartbeat-daemon) - A directory shared by every node
//!
//! The protocol only needs keyed upsert with an optional TTL, get, delete,
//! and an index query. Anything that offers those can carry heartbeats.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(String),
}

impl StoreError {
    /// Whether the store reported that the key does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Document lifetime in the store's native unit (whole seconds).
///
/// Zero means the document never expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ttl(u32);

impl Ttl {
    pub const NONE: Ttl = Ttl(0);

    pub const fn from_secs(secs: u32) -> Self {
        Self(secs)
    }

    pub const fn as_secs(&self) -> u32 {
        self.0
    }

    pub const fn is_none(&self) -> bool {
        self.0 == 0
    }

    /// Lifetime as a duration, or `None` for documents that never expire.
    pub fn as_duration(&self) -> Option<Duration> {
        (!self.is_none()).then(|| Duration::from_secs(u64::from(self.0)))
    }
}

/// How current the index must be when queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexConsistency {
    /// Ask the store to bring the index up to date before answering
    #[default]
    Fresh,
    /// Accept whatever the index currently holds
    Stale,
}

/// Definition of a secondary index.
///
/// Emits one row per document whose `match_field` equals `match_value`,
/// carrying the document id and the string found at `emit_field`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    /// Design namespace the index lives in
    pub namespace: String,
    /// Index name within the namespace
    pub name: String,
    /// Key of the document recording the installed version
    pub version_key: String,
    /// Definition version; a change forces redefinition
    pub version: u64,
    pub match_field: String,
    pub match_value: String,
    pub emit_field: String,
}

impl IndexDefinition {
    /// Apply the index map to one document.
    pub fn emit(&self, id: &str, doc: &Value) -> Option<IndexRow> {
        let matched = doc
            .get(&self.match_field)
            .and_then(Value::as_str)
            .is_some_and(|v| v == self.match_value);
        if !matched {
            return None;
        }

        Some(IndexRow {
            id: id.to_string(),
            value: doc
                .get(&self.emit_field)
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }
}

/// One row returned by an index query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRow {
    /// Id of the document that produced the row
    pub id: String,
    /// Emitted value (`None` when the document lacks the field)
    pub value: Option<String>,
}

/// Outcome of [`DocumentStore::define_index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexUpdate {
    /// The definition was (re)installed
    Defined,
    /// The installed version already matched, nothing was written
    Unchanged,
}

/// Keyed document store with TTL expiry and a queryable index.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create or replace a document. `Ttl::NONE` means no expiry.
    async fn upsert(&self, key: &str, value: Value, ttl: Ttl) -> Result<()>;

    /// Read a document. Missing and expired documents yield `StoreError::NotFound`.
    async fn get(&self, key: &str) -> Result<Value>;

    /// Delete a document. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Query every row of an installed index.
    ///
    /// Results may lag recent writes, even when `Fresh` is requested.
    async fn query_index(
        &self,
        namespace: &str,
        name: &str,
        consistency: IndexConsistency,
    ) -> Result<Vec<IndexRow>>;

    /// Install (or replace) an index definition unconditionally.
    async fn install_index(&self, definition: &IndexDefinition) -> Result<()>;

    /// Install an index unless the same version is already recorded.
    ///
    /// The version lives in an ordinary document at `definition.version_key`,
    /// so every node sharing the store sees the same answer.
    async fn define_index(&self, definition: &IndexDefinition) -> Result<IndexUpdate> {
        match self.get(&definition.version_key).await {
            Ok(installed) if installed.as_u64() == Some(definition.version) => {
                return Ok(IndexUpdate::Unchanged);
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        self.install_index(definition).await?;
        self.upsert(
            &definition.version_key,
            Value::from(definition.version),
            Ttl::NONE,
        )
        .await?;
        Ok(IndexUpdate::Defined)
    }
}

/// Opens a store handle for an endpoint and bucket.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    type Store: DocumentStore + 'static;

    async fn connect(&self, store_url: &str, bucket: &str) -> Result<Self::Store>;
}

/// Lazily connected store handle shared by every heartbeater in the process.
///
/// The first caller of [`SharedStore::get`] connects; concurrent first
/// callers wait for that single connection instead of opening their own.
pub struct SharedStore<C: StoreConnector> {
    connector: C,
    store_url: String,
    bucket: String,
    store: OnceCell<Arc<C::Store>>,
}

impl<C: StoreConnector> SharedStore<C> {
    pub fn new(connector: C, store_url: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            connector,
            store_url: store_url.into(),
            bucket: bucket.into(),
            store: OnceCell::new(),
        }
    }

    /// Get the store handle, connecting on first use.
    ///
    /// A failed connection is not cached; the next call tries again.
    pub async fn get(&self) -> Result<Arc<C::Store>> {
        let store = self
            .store
            .get_or_try_init(|| async {
                info!("Connecting to store {} (bucket {})", self.store_url, self.bucket);
                self.connector
                    .connect(&self.store_url, &self.bucket)
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(Arc::clone(store))
    }

    pub fn is_connected(&self) -> bool {
        self.store.initialized()
    }

    pub fn store_url(&self) -> &str {
        &self.store_url
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}
