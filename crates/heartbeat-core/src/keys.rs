//! Key naming for heartbeat documents.
//!
//! The key layout is the wire contract between nodes, so every component
//! derives keys through [`KeySpace`] rather than formatting them inline.

/// Document type tag of a liveness record.
pub const DOC_TYPE_HEARTBEAT: &str = "heartbeat";

/// Document type tag of an expiry record.
pub const DOC_TYPE_HEARTBEAT_TIMEOUT: &str = "heartbeat_timeout";

/// Key derivation for one logical heartbeat group.
///
/// The prefix isolates groups that share a single store.
///
/// # Examples
/// ```
/// use heartbeat_core::KeySpace;
///
/// let keys = KeySpace::new("cluster1/");
/// assert_eq!(keys.heartbeat_key("node-a"), "cluster1/heartbeat:node-a");
/// assert_eq!(keys.timeout_key("node-a"), "cluster1/heartbeat_timeout:node-a");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key of the liveness record owned by `node_id`.
    pub fn heartbeat_key(&self, node_id: &str) -> String {
        format!("{}{}:{}", self.prefix, DOC_TYPE_HEARTBEAT, node_id)
    }

    /// Key of the expiry record owned by `node_id`.
    pub fn timeout_key(&self, node_id: &str) -> String {
        format!("{}{}:{}", self.prefix, DOC_TYPE_HEARTBEAT_TIMEOUT, node_id)
    }

    /// Key holding the installed version of the heartbeat index.
    pub fn index_version_key(&self) -> String {
        format!("{}ddocVersion", self.prefix)
    }
}
