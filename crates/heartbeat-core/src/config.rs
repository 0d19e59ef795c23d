use crate::keys::KeySpace;

/// Connection and identity settings for one heartbeat participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Store endpoint (address, URL or path, interpreted by the connector)
    pub store_url: String,
    /// Bucket or namespace inside the store
    pub bucket: String,
    /// Prepended to every key; isolates heartbeat groups sharing a bucket
    pub key_prefix: String,
    /// Opaque identifier unique to this node (an address works)
    pub node_id: String,
}

impl HeartbeatConfig {
    pub fn new(
        store_url: impl Into<String>,
        bucket: impl Into<String>,
        key_prefix: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            store_url: store_url.into(),
            bucket: bucket.into(),
            key_prefix: key_prefix.into(),
            node_id: node_id.into(),
        }
    }

    /// Check that every required field is present. The key prefix may be empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_url.trim().is_empty() {
            return Err(ConfigError::MissingStoreUrl);
        }
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::MissingBucket);
        }
        if self.node_id.trim().is_empty() {
            return Err(ConfigError::MissingNodeId);
        }
        Ok(())
    }

    pub fn key_space(&self) -> KeySpace {
        KeySpace::new(self.key_prefix.clone())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("store endpoint is not set")]
    MissingStoreUrl,
    #[error("bucket name is not set")]
    MissingBucket,
    #[error("node id is not set")]
    MissingNodeId,
}
