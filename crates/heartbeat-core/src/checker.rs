//! Heartbeat checker: detects peers whose expiry record has lapsed.
//!
//! A peer is stale when its liveness record is still enumerated by the index
//! but its expiry record no longer exists. No timestamps are compared; the
//! store's TTL does the timing.
//!
//! Per poll cycle:
//! 1. Query the index for every liveness record
//! 2. Skip our own record, and skip (without deleting) rows with no owner
//! 3. Look up each peer's expiry record
//! 4. Missing: call the handler once, then delete the peer's liveness record
//! 5. Any other read error aborts the rest of the cycle

use crate::events::{EventBus, HeartbeatEvent};
use crate::keys::KeySpace;
use crate::store::{DocumentStore, IndexConsistency, IndexDefinition, IndexUpdate, StoreError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Callback for peers that stopped sending heartbeats.
///
/// Called from the checker task, one node at a time.
pub trait StaleHeartbeatHandler: Send + Sync {
    fn stale_heartbeat_detected(&self, node_id: &str);
}

impl<F> StaleHeartbeatHandler for F
where
    F: Fn(&str) + Send + Sync,
{
    fn stale_heartbeat_detected(&self, node_id: &str) {
        self(node_id)
    }
}

/// Tuning for the checker's index queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckerOptions {
    /// Consistency requested from the index on each poll
    pub consistency: IndexConsistency,
}

/// Summary of one completed poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckReport {
    /// Peers whose expiry record was looked up
    pub evaluated: usize,
    /// Peers whose expiry record was present
    pub alive: usize,
    /// Peers reported stale, in enumeration order
    pub stale: Vec<String>,
    /// Index rows without an owning node id
    pub skipped_malformed: usize,
    /// Stale liveness records that could not be deleted
    pub delete_failures: usize,
}

/// Polls the store for stale peers.
pub struct HeartbeatChecker<S> {
    store: Arc<S>,
    keys: KeySpace,
    node_id: String,
    index: IndexDefinition,
    options: CheckerOptions,
    events: Arc<EventBus>,
}

impl<S: DocumentStore> HeartbeatChecker<S> {
    pub fn new(
        store: Arc<S>,
        keys: KeySpace,
        node_id: String,
        index: IndexDefinition,
        options: CheckerOptions,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            store,
            keys,
            node_id,
            index,
            options,
            events,
        }
    }

    pub fn index(&self) -> &IndexDefinition {
        &self.index
    }

    /// Make sure the liveness index exists at the current version.
    pub async fn ensure_index(&self) -> Result<IndexUpdate, StoreError> {
        let update = self.store.define_index(&self.index).await?;
        match update {
            IndexUpdate::Defined => {
                info!(
                    "Defined index {}/{} (version {})",
                    self.index.namespace, self.index.name, self.index.version
                );
                self.events.emit(HeartbeatEvent::IndexDefined {
                    name: self.index.name.clone(),
                    version: self.index.version,
                });
            }
            IndexUpdate::Unchanged => {
                debug!(
                    "Index {}/{} already at version {}",
                    self.index.namespace, self.index.name, self.index.version
                );
            }
        }
        Ok(update)
    }

    /// Run one poll cycle.
    ///
    /// Returns an error, without evaluating the remaining peers, when the
    /// index query or an expiry lookup fails for any reason besides NotFound.
    pub async fn check_stale_heartbeats(
        &self,
        handler: &dyn StaleHeartbeatHandler,
    ) -> Result<CheckReport, StoreError> {
        let rows = self
            .store
            .query_index(&self.index.namespace, &self.index.name, self.options.consistency)
            .await?;

        let mut report = CheckReport::default();
        let mut seen = HashSet::new();

        for row in rows {
            if row.value.as_deref() == Some(self.node_id.as_str()) {
                continue;
            }
            let node_id = match row.value.as_deref() {
                Some(id) if !id.is_empty() => id,
                _ => {
                    warn!("Skipping invalid heartbeat record: {}", row.id);
                    report.skipped_malformed += 1;
                    self.events.emit(HeartbeatEvent::MalformedSkipped {
                        record_id: row.id.clone(),
                    });
                    continue;
                }
            };
            // A lagging index can list the same record twice.
            if !seen.insert(node_id.to_string()) {
                continue;
            }

            report.evaluated += 1;
            match self.store.get(&self.keys.timeout_key(node_id)).await {
                Ok(_) => report.alive += 1,
                Err(e) if e.is_not_found() => {
                    self.on_stale(node_id, handler, &mut report).await;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    async fn on_stale(
        &self,
        node_id: &str,
        handler: &dyn StaleHeartbeatHandler,
        report: &mut CheckReport,
    ) {
        info!("Stale heartbeat detected for node {}", node_id);
        handler.stale_heartbeat_detected(node_id);
        self.events.emit(HeartbeatEvent::StaleDetected {
            node_id: node_id.to_string(),
        });

        // Remove the liveness record so later cycles don't fire again.
        let key = self.keys.heartbeat_key(node_id);
        if let Err(e) = self.store.delete(&key).await {
            warn!("Failed to delete heartbeat doc: {} err: {}", key, e);
            report.delete_failures += 1;
            self.events.emit(HeartbeatEvent::DeleteFailed {
                node_id: node_id.to_string(),
                error: e.to_string(),
            });
        }

        report.stale.push(node_id.to_string());
    }

    /// One scheduled tick: poll, then report the outcome. Never fails.
    pub(crate) async fn tick(&self, handler: &dyn StaleHeartbeatHandler) {
        match self.check_stale_heartbeats(handler).await {
            Ok(report) => {
                debug!(
                    "Checked {} peer(s): {} alive, {} stale, {} malformed",
                    report.evaluated,
                    report.alive,
                    report.stale.len(),
                    report.skipped_malformed
                );
            }
            Err(e) => {
                error!("Error checking for stale heartbeats: {}", e);
                self.events.emit(HeartbeatEvent::CheckFailed {
                    error: e.to_string(),
                });
            }
        }
    }
}
