//! Heartbeater: the protocol surface exposed to applications.
//!
//! Owns at most one sender task and one checker task. The two run
//! independently and only meet through the shared store.

use crate::checker::{CheckReport, CheckerOptions, HeartbeatChecker, StaleHeartbeatHandler};
use crate::config::HeartbeatConfig;
use crate::error::{HeartbeatError, Result};
use crate::events::EventBus;
use crate::record::heartbeat_index;
use crate::sender::{HeartbeatSender, ttl_for_interval};
use crate::store::{DocumentStore, IndexUpdate, SharedStore, StoreConnector};
use crate::task::{PeriodicTask, TaskKind};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info};

/// Sends this node's heartbeats and checks peers' heartbeats.
///
/// `start_*` methods spawn onto the current tokio runtime and must be called
/// from within one.
pub struct Heartbeater<S: DocumentStore> {
    config: HeartbeatConfig,
    store: Arc<S>,
    sender: Arc<HeartbeatSender<S>>,
    checker: Arc<HeartbeatChecker<S>>,
    events: Arc<EventBus>,
    send_task: Mutex<Option<PeriodicTask>>,
    check_task: Mutex<Option<PeriodicTask>>,
}

impl<S: DocumentStore + 'static> Heartbeater<S> {
    /// Validate the configuration and obtain the shared store handle.
    ///
    /// Fails if the store cannot be reached; no heartbeater exists without one.
    pub async fn connect<C>(config: HeartbeatConfig, shared: &SharedStore<C>) -> Result<Self>
    where
        C: StoreConnector<Store = S>,
    {
        config.validate()?;
        let store = shared.get().await?;
        info!(
            "Heartbeater for node {} connected to {} (bucket {})",
            config.node_id,
            shared.store_url(),
            shared.bucket()
        );
        Self::with_store(config, store)
    }

    /// Build around an already established store handle.
    pub fn with_store(config: HeartbeatConfig, store: Arc<S>) -> Result<Self> {
        Self::with_options(config, store, CheckerOptions::default())
    }

    pub fn with_options(
        config: HeartbeatConfig,
        store: Arc<S>,
        options: CheckerOptions,
    ) -> Result<Self> {
        config.validate()?;

        let keys = config.key_space();
        let events = Arc::new(EventBus::new());
        let sender = HeartbeatSender::new(
            Arc::clone(&store),
            keys.clone(),
            config.node_id.clone(),
            Arc::clone(&events),
        );
        let checker = HeartbeatChecker::new(
            Arc::clone(&store),
            keys.clone(),
            config.node_id.clone(),
            heartbeat_index(&keys),
            options,
            Arc::clone(&events),
        );

        Ok(Self {
            config,
            store,
            sender: Arc::new(sender),
            checker: Arc::new(checker),
            events,
            send_task: Mutex::new(None),
            check_task: Mutex::new(None),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn config(&self) -> &HeartbeatConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Event bus carrying tick outcomes from both background tasks.
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn is_sending(&self) -> bool {
        lock(&self.send_task).is_some()
    }

    pub fn is_checking(&self) -> bool {
        lock(&self.check_task).is_some()
    }

    /// Start writing heartbeats every `interval`.
    ///
    /// The expiry record lives for twice the interval, see [`ttl_for_interval`].
    pub fn start_sending_heartbeats(&self, interval: Duration) -> Result<()> {
        let ttl = ttl_for_interval(interval)?;

        let mut slot = lock(&self.send_task);
        if slot.is_some() {
            error!("start_sending_heartbeats called while already sending");
            return Err(HeartbeatError::AlreadyRunning(TaskKind::Sender));
        }

        let sender = Arc::clone(&self.sender);
        *slot = Some(PeriodicTask::spawn(TaskKind::Sender, interval, move || {
            let sender = Arc::clone(&sender);
            async move { sender.tick(ttl).await }
        }));

        info!("Sending heartbeats every {:?} (expiry ttl {}s)", interval, ttl.as_secs());
        Ok(())
    }

    /// Stop the sender. A second call without a new start is an error.
    pub async fn stop_sending_heartbeats(&self) -> Result<()> {
        let task = lock(&self.send_task).take();
        stop_task(task, TaskKind::Sender).await
    }

    /// Define the heartbeat index, then poll for stale peers every `stale_threshold`.
    ///
    /// Index setup errors are returned here; errors during polling are only
    /// logged and published on the event bus.
    pub async fn start_checking_heartbeats(
        &self,
        stale_threshold: Duration,
        handler: impl StaleHeartbeatHandler + 'static,
    ) -> Result<()> {
        if stale_threshold.is_zero() {
            return Err(HeartbeatError::InvalidInterval {
                kind: TaskKind::Checker,
                interval: stale_threshold,
                reason: "stale threshold must be positive",
            });
        }
        if self.is_checking() {
            error!("start_checking_heartbeats called while already checking");
            return Err(HeartbeatError::AlreadyRunning(TaskKind::Checker));
        }

        self.checker.ensure_index().await?;

        let mut slot = lock(&self.check_task);
        if slot.is_some() {
            error!("start_checking_heartbeats raced with another start");
            return Err(HeartbeatError::AlreadyRunning(TaskKind::Checker));
        }

        let checker = Arc::clone(&self.checker);
        let handler: Arc<dyn StaleHeartbeatHandler> = Arc::new(handler);
        *slot = Some(PeriodicTask::spawn(
            TaskKind::Checker,
            stale_threshold,
            move || {
                let checker = Arc::clone(&checker);
                let handler = Arc::clone(&handler);
                async move { checker.tick(handler.as_ref()).await }
            },
        ));

        info!("Checking heartbeats every {:?}", stale_threshold);
        Ok(())
    }

    /// Stop the checker. A second call without a new start is an error.
    pub async fn stop_checking_heartbeats(&self) -> Result<()> {
        let task = lock(&self.check_task).take();
        stop_task(task, TaskKind::Checker).await
    }

    /// Write both heartbeat records right now, outside the schedule.
    pub async fn send_once(&self, interval: Duration) -> Result<()> {
        let ttl = ttl_for_interval(interval)?;
        self.sender.send_heartbeat(ttl).await?;
        Ok(())
    }

    /// Run one poll cycle right now, outside the schedule.
    pub async fn check_once(&self, handler: &dyn StaleHeartbeatHandler) -> Result<CheckReport> {
        Ok(self.checker.check_stale_heartbeats(handler).await?)
    }

    /// Define the heartbeat index without starting the checker.
    pub async fn ensure_index(&self) -> Result<IndexUpdate> {
        Ok(self.checker.ensure_index().await?)
    }
}

async fn stop_task(task: Option<PeriodicTask>, kind: TaskKind) -> Result<()> {
    match task {
        Some(task) => {
            task.stop().await;
            info!("Stopped {}", kind);
            Ok(())
        }
        None => {
            error!("Stop requested but {} is not running", kind);
            Err(HeartbeatError::NotRunning(kind))
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::InMemoryStore;
    use crate::store::StoreError;
    use async_trait::async_trait;

    fn config(node: &str) -> HeartbeatConfig {
        HeartbeatConfig::new("mem://", "default", "test_", node)
    }

    struct UnreachableConnector;

    #[async_trait]
    impl StoreConnector for UnreachableConnector {
        type Store = InMemoryStore;

        async fn connect(
            &self,
            store_url: &str,
            _bucket: &str,
        ) -> crate::store::Result<InMemoryStore> {
            Err(StoreError::Unavailable(format!("cannot reach {}", store_url)))
        }
    }

    #[tokio::test]
    async fn test_connect_fails_without_store() {
        let shared = SharedStore::new(UnreachableConnector, "mem://down", "default");
        let result = Heartbeater::connect(config("a"), &shared).await;
        assert!(matches!(
            result,
            Err(HeartbeatError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = Heartbeater::with_store(config(""), Arc::new(InMemoryStore::new()));
        assert!(matches!(result, Err(HeartbeatError::Config(_))));
    }

    #[tokio::test]
    async fn test_double_stop_is_an_error() {
        let hb = Heartbeater::with_store(config("a"), Arc::new(InMemoryStore::new())).unwrap();

        hb.start_sending_heartbeats(Duration::from_secs(1)).unwrap();
        assert!(hb.is_sending());
        hb.stop_sending_heartbeats().await.unwrap();
        assert!(!hb.is_sending());

        assert!(matches!(
            hb.stop_sending_heartbeats().await,
            Err(HeartbeatError::NotRunning(TaskKind::Sender))
        ));
    }

    #[tokio::test]
    async fn test_stop_without_start_is_an_error() {
        let hb = Heartbeater::with_store(config("a"), Arc::new(InMemoryStore::new())).unwrap();

        assert!(matches!(
            hb.stop_checking_heartbeats().await,
            Err(HeartbeatError::NotRunning(TaskKind::Checker))
        ));
        assert!(matches!(
            hb.stop_sending_heartbeats().await,
            Err(HeartbeatError::NotRunning(TaskKind::Sender))
        ));
    }

    #[tokio::test]
    async fn test_double_start_is_an_error() {
        let hb = Heartbeater::with_store(config("a"), Arc::new(InMemoryStore::new())).unwrap();

        hb.start_sending_heartbeats(Duration::from_secs(1)).unwrap();
        assert!(matches!(
            hb.start_sending_heartbeats(Duration::from_secs(2)),
            Err(HeartbeatError::AlreadyRunning(TaskKind::Sender))
        ));

        hb.start_checking_heartbeats(Duration::from_secs(1), |_: &str| {})
            .await
            .unwrap();
        assert!(matches!(
            hb.start_checking_heartbeats(Duration::from_secs(1), |_: &str| {})
                .await,
            Err(HeartbeatError::AlreadyRunning(TaskKind::Checker))
        ));

        hb.stop_sending_heartbeats().await.unwrap();
        hb.stop_checking_heartbeats().await.unwrap();
    }

    #[tokio::test]
    async fn test_restart_after_stop() {
        let hb = Heartbeater::with_store(config("a"), Arc::new(InMemoryStore::new())).unwrap();

        hb.start_sending_heartbeats(Duration::from_secs(1)).unwrap();
        hb.stop_sending_heartbeats().await.unwrap();
        hb.start_sending_heartbeats(Duration::from_secs(1)).unwrap();
        hb.stop_sending_heartbeats().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_intervals_rejected() {
        let hb = Heartbeater::with_store(config("a"), Arc::new(InMemoryStore::new())).unwrap();

        assert!(matches!(
            hb.start_sending_heartbeats(Duration::from_millis(100)),
            Err(HeartbeatError::InvalidInterval { .. })
        ));
        assert!(!hb.is_sending());

        assert!(matches!(
            hb.start_checking_heartbeats(Duration::ZERO, |_: &str| {}).await,
            Err(HeartbeatError::InvalidInterval {
                kind: TaskKind::Checker,
                ..
            })
        ));
        assert!(!hb.is_checking());
    }
}
