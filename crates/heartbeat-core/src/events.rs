//! Event infrastructure for heartbeat monitoring.
//!
//! Background ticks never return errors to the caller that started them.
//! Instead they log through `tracing` and publish a [`HeartbeatEvent`] here,
//! so embedders can count failures or surface them elsewhere.
//!
//! Delivery is a bounded broadcast: emitting never blocks a tick, and a
//! subscriber that falls behind loses the oldest events rather than stalling
//! the sender or checker.

use serde::Serialize;
use tokio::sync::broadcast::{self, error::TryRecvError};

/// Events emitted by the sender and checker tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HeartbeatEvent {
    /// Both heartbeat records were written.
    HeartbeatSent {
        #[serde(rename = "nodeId")]
        node_id: String,
        /// Lifetime given to the expiry record, in seconds.
        #[serde(rename = "ttlSecs")]
        ttl_secs: u32,
    },
    /// A send tick failed; the sender keeps ticking.
    SendFailed {
        #[serde(rename = "nodeId")]
        node_id: String,
        error: String,
    },
    /// A peer's expiry record was gone.
    StaleDetected {
        #[serde(rename = "nodeId")]
        node_id: String,
    },
    /// An index row had no owning node and was skipped.
    MalformedSkipped {
        #[serde(rename = "recordId")]
        record_id: String,
    },
    /// A stale peer's liveness record could not be deleted.
    DeleteFailed {
        #[serde(rename = "nodeId")]
        node_id: String,
        error: String,
    },
    /// A poll cycle was aborted; the next tick starts over.
    CheckFailed { error: String },
    /// The heartbeat index was installed at this version.
    IndexDefined { name: String, version: u64 },
}


/// Events buffered per subscriber before the oldest are dropped.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Fan-out point for the events of one heartbeater.
pub struct EventBus {
    sender: broadcast::Sender<HeartbeatEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Receive every event emitted from now on. Dropping the subscription
    /// unsubscribes.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            missed: 0,
        }
    }

    /// Publish an event. With no subscribers the event is discarded.
    pub fn emit(&self, event: HeartbeatEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// One subscriber's view of the bus.
pub struct Subscription {
    receiver: broadcast::Receiver<HeartbeatEvent>,
    missed: u64,
}

impl Subscription {
    /// Wait for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<HeartbeatEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => self.missed += n,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next already-buffered event, without waiting.
    pub fn try_recv(&mut self) -> Option<HeartbeatEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(n)) => self.missed += n,
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Every buffered event, oldest first.
    pub fn drain(&mut self) -> Vec<HeartbeatEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Events dropped because this subscriber fell behind.
    pub fn missed(&self) -> u64 {
        self.missed
    }
}
