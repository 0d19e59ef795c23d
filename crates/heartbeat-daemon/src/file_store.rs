//! Directory-backed document store.
//!
//! Every node that mounts the same directory sees the same documents, which
//! is all the heartbeat protocol needs from a shared store.
//!
//! Layout under `<endpoint>/<bucket>/`:
//! - `docs/<hex(key)>.json` - `{ "value": ..., "expires_at_ms": ..., "ttl_ms": ... }`
//! - `indexes/<namespace>.<name>.json` - an installed [`IndexDefinition`]
//!
//! There is no background reaper. Each index scan removes documents that
//! expired more than one TTL ago, plus temp files abandoned by crashed writers.

use async_trait::async_trait;
use heartbeat_core::store::Result;
use heartbeat_core::{
    DocumentStore, IndexConsistency, IndexDefinition, IndexRow, StoreConnector, StoreError, Ttl,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;
use tracing::{debug, warn};

const DOCS_DIR: &str = "docs";
const INDEXES_DIR: &str = "indexes";

/// Temp files older than this belong to a writer that died mid-write.
const ABANDONED_TEMP_AGE: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize, Deserialize)]
struct StoredDoc {
    value: Value,
    /// Wall clock expiry in unix milliseconds; absent for documents without a TTL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at_ms: Option<u64>,
    /// TTL the document was written with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ttl_ms: Option<u64>,
}

impl StoredDoc {
    fn is_live(&self, now_ms: u64) -> bool {
        self.expires_at_ms.is_none_or(|at| now_ms < at)
    }

    /// Expired for longer than its own TTL. A live owner would have
    /// rewritten it several times over by now.
    fn is_purgeable(&self, now_ms: u64) -> bool {
        self.expires_at_ms
            .is_some_and(|at| now_ms >= at.saturating_add(self.ttl_ms.unwrap_or(0)))
    }
}

/// Document store rooted at `<endpoint>/<bucket>`.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open the bucket directory under an existing endpoint directory.
    ///
    /// The endpoint must already exist; the bucket is created on demand.
    pub async fn open(endpoint: impl AsRef<Path>, bucket: &str) -> Result<Self> {
        let endpoint = endpoint.as_ref();
        validate_bucket(bucket)?;

        let is_dir = fs::metadata(endpoint)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(StoreError::Unavailable(format!(
                "endpoint {} is not a directory",
                endpoint.display()
            )));
        }

        let root = endpoint.join(bucket);
        for dir in [DOCS_DIR, INDEXES_DIR] {
            fs::create_dir_all(root.join(dir))
                .await
                .map_err(|e| StoreError::Io(e.to_string()))?;
        }

        debug!("Opened file store at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn doc_path(&self, key: &str) -> PathBuf {
        self.root
            .join(DOCS_DIR)
            .join(format!("{}.json", hex::encode(key)))
    }

    fn index_path(&self, namespace: &str, name: &str) -> PathBuf {
        self.root
            .join(INDEXES_DIR)
            .join(format!("{}.{}.json", namespace, name))
    }

    /// Read a stored document, `None` if the file does not exist.
    async fn read_doc(path: &Path) -> Result<Option<StoredDoc>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    async fn write_doc(&self, key: &str, doc: &StoredDoc) -> Result<()> {
        let content = serde_json::to_vec(doc)?;
        atomic_write(&self.doc_path(key), &content)
            .await
            .map_err(|e| StoreError::Io(e.to_string()))
    }

    /// Key and document for every live document on disk.
    async fn live_docs(&self) -> Result<Vec<(String, Value)>> {
        let now = now_ms();
        let mut docs = Vec::new();

        let mut dir = fs::read_dir(self.root.join(DOCS_DIR))
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| StoreError::Io(e.to_string()))?
        {
            let file_name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = file_name.strip_suffix(".json") else {
                if file_name.ends_with(".tmp") {
                    remove_if_abandoned(&entry).await;
                }
                continue;
            };
            let Some(key) = hex::decode(stem)
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
            else {
                warn!("Ignoring unrecognised file in store: {}", file_name);
                continue;
            };

            match Self::read_doc(&entry.path()).await {
                Ok(Some(doc)) if doc.is_live(now) => docs.push((key, doc.value)),
                Ok(Some(doc)) if doc.is_purgeable(now) => {
                    remove_expired(&entry.path(), &key).await;
                }
                // Recently expired, or deleted since the directory was listed
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable document {}: {}", key, e),
            }
        }

        Ok(docs)
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    async fn upsert(&self, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        let ttl_ms = ttl.as_duration().map(|d| d.as_millis() as u64);
        self.write_doc(key, &StoredDoc {
            value,
            expires_at_ms: ttl_ms.map(|ms| now_ms().saturating_add(ms)),
            ttl_ms,
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Value> {
        match Self::read_doc(&self.doc_path(key)).await? {
            Some(doc) if doc.is_live(now_ms()) => Ok(doc.value),
            _ => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.doc_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    /// Scans every document; the consistency hint has no effect since the
    /// index is computed on read.
    async fn query_index(
        &self,
        namespace: &str,
        name: &str,
        _consistency: IndexConsistency,
    ) -> Result<Vec<IndexRow>> {
        let definition: IndexDefinition = match fs::read(self.index_path(namespace, name)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(format!("index {}/{}", namespace, name)));
            }
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        let mut rows: Vec<IndexRow> = self
            .live_docs()
            .await?
            .iter()
            .filter_map(|(key, value)| definition.emit(key, value))
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn install_index(&self, definition: &IndexDefinition) -> Result<()> {
        let content = serde_json::to_vec_pretty(definition)?;
        atomic_write(
            &self.index_path(&definition.namespace, &definition.name),
            &content,
        )
        .await
        .map_err(|e| StoreError::Io(e.to_string()))
    }
}

/// Opens [`FileStore`]s. Accepts plain paths and `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStoreConnector;

#[async_trait]
impl StoreConnector for FileStoreConnector {
    type Store = FileStore;

    async fn connect(&self, store_url: &str, bucket: &str) -> Result<FileStore> {
        let path = store_url.strip_prefix("file://").unwrap_or(store_url);
        FileStore::open(path, bucket).await
    }
}

fn validate_bucket(bucket: &str) -> Result<()> {
    let invalid = bucket.is_empty()
        || bucket == "."
        || bucket == ".."
        || bucket.contains(['/', '\\']);
    if invalid {
        return Err(StoreError::Unavailable(format!(
            "invalid bucket name: {:?}",
            bucket
        )));
    }
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

async fn remove_expired(path: &Path, key: &str) {
    match fs::remove_file(path).await {
        Ok(()) => debug!("Purged expired document {}", key),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to purge expired document {}: {}", key, e),
    }
}

async fn remove_if_abandoned(entry: &fs::DirEntry) {
    let age = entry
        .metadata()
        .await
        .ok()
        .and_then(|m| m.modified().ok())
        .and_then(|t| t.elapsed().ok());
    if age.is_none_or(|age| age < ABANDONED_TEMP_AGE) {
        return;
    }

    let path = entry.path();
    match fs::remove_file(&path).await {
        Ok(()) => debug!("Removed abandoned temp file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove temp file {}: {}", path.display(), e),
    }
}

/// Write to a temp file, then rename over the target.
async fn atomic_write(path: &Path, content: &[u8]) -> std::io::Result<()> {
    let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

    if let Err(e) = fs::write(&temp_path, content).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    if let Err(e) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(e);
    }
    Ok(())
}
