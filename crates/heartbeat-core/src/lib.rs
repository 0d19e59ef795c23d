//! heartbeat-core: Decentralized failure detection over a shared document store.
//!
//! Every node periodically writes two records into the store:
//! - a liveness record (`<prefix>heartbeat:<node>`) with no expiry
//! - an expiry record (`<prefix>heartbeat_timeout:<node>`) that lives for twice the send interval
//!
//! Every checking node enumerates liveness records through a secondary index.
//! A liveness record whose expiry record is gone marks a stale peer: the
//! handler is called back and the liveness record is deleted.
//!
//! There is no coordinator and no peer-to-peer traffic. The store's own TTL
//! expiry is the staleness signal, so clocks across nodes never need to agree.

pub mod checker;
pub mod config;
pub mod error;
pub mod events;
pub mod heartbeater;
pub mod keys;
pub mod memory_store;
pub mod record;
pub mod sender;
pub mod store;
pub mod task;

pub use checker::{CheckReport, CheckerOptions, HeartbeatChecker, StaleHeartbeatHandler};
pub use config::{ConfigError, HeartbeatConfig};
pub use error::{HeartbeatError, Result};
pub use events::{EventBus, HeartbeatEvent, Subscription};
pub use heartbeater::Heartbeater;
pub use keys::KeySpace;
pub use memory_store::InMemoryStore;
pub use record::{DocKind, HeartbeatDoc};
pub use sender::{HeartbeatSender, ttl_for_interval};
pub use store::{
    DocumentStore, IndexConsistency, IndexDefinition, IndexRow, IndexUpdate, SharedStore,
    StoreConnector, StoreError, Ttl,
};
pub use task::{CancelToken, PeriodicTask, TaskKind};
