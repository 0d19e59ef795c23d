//! Heartbeat sender: keeps this node's liveness visible to the cluster.
//!
//! Each tick writes the liveness record (no TTL) and then the expiry record
//! with a TTL of twice the send interval, so one missed tick never lets the
//! expiry record lapse.

use crate::error::HeartbeatError;
use crate::events::{EventBus, HeartbeatEvent};
use crate::keys::KeySpace;
use crate::record::HeartbeatDoc;
use crate::store::{DocumentStore, StoreError, Ttl};
use crate::task::TaskKind;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Shortest send interval whose doubled TTL is at least one second.
pub const MIN_SEND_INTERVAL: Duration = Duration::from_millis(500);

/// Expiry TTL for a send interval: twice the interval in whole seconds,
/// rounded up.
///
/// Intervals under [`MIN_SEND_INTERVAL`] are rejected rather than producing a
/// zero TTL, which the store would read as "never expires".
pub fn ttl_for_interval(interval: Duration) -> Result<Ttl, HeartbeatError> {
    if interval < MIN_SEND_INTERVAL {
        return Err(HeartbeatError::InvalidInterval {
            kind: TaskKind::Sender,
            interval,
            reason: "expiry TTL (2x interval) must be at least one second",
        });
    }

    let ttl_ms = interval.as_millis().saturating_mul(2);
    let secs = ttl_ms.div_ceil(1000);
    let secs = u32::try_from(secs).map_err(|_| HeartbeatError::InvalidInterval {
        kind: TaskKind::Sender,
        interval,
        reason: "expiry TTL does not fit the store's TTL range",
    })?;
    Ok(Ttl::from_secs(secs))
}

/// Writes this node's heartbeat records.
pub struct HeartbeatSender<S> {
    store: Arc<S>,
    keys: KeySpace,
    node_id: String,
    events: Arc<EventBus>,
}

impl<S: DocumentStore> HeartbeatSender<S> {
    pub fn new(store: Arc<S>, keys: KeySpace, node_id: String, events: Arc<EventBus>) -> Self {
        Self {
            store,
            keys,
            node_id,
            events,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Write both heartbeat records once.
    ///
    /// The expiry write is attempted even when the liveness write fails.
    /// Returns the first error encountered.
    pub async fn send_heartbeat(&self, ttl: Ttl) -> Result<(), StoreError> {
        let liveness = self.upsert_heartbeat_doc().await;
        if let Err(e) = &liveness {
            warn!("Failed to write liveness record for {}: {}", self.node_id, e);
        }

        let expiry = self.upsert_timeout_doc(ttl).await;
        if let Err(e) = &expiry {
            warn!("Failed to write expiry record for {}: {}", self.node_id, e);
        }

        liveness.and(expiry)
    }

    /// One scheduled tick: send, then report the outcome. Never fails.
    pub(crate) async fn tick(&self, ttl: Ttl) {
        match self.send_heartbeat(ttl).await {
            Ok(()) => {
                debug!("Sent heartbeat for {} (ttl {}s)", self.node_id, ttl.as_secs());
                self.events.emit(HeartbeatEvent::HeartbeatSent {
                    node_id: self.node_id.clone(),
                    ttl_secs: ttl.as_secs(),
                });
            }
            Err(e) => {
                error!("Error sending heartbeat: {}", e);
                self.events.emit(HeartbeatEvent::SendFailed {
                    node_id: self.node_id.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    async fn upsert_heartbeat_doc(&self) -> Result<(), StoreError> {
        let doc = HeartbeatDoc::liveness(self.node_id.as_str()).to_value()?;
        self.store
            .upsert(&self.keys.heartbeat_key(&self.node_id), doc, Ttl::NONE)
            .await
    }

    async fn upsert_timeout_doc(&self, ttl: Ttl) -> Result<(), StoreError> {
        let doc = HeartbeatDoc::expiry(self.node_id.as_str()).to_value()?;
        self.store
            .upsert(&self.keys.timeout_key(&self.node_id), doc, ttl)
            .await
    }
}
