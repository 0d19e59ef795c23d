//! Cancellable periodic tasks.
//!
//! Each task owns a one-shot cancellation signal. Cancelling consumes the
//! [`CancelToken`], so a task can only be cancelled once; callers that hold
//! the task in an `Option` report a second stop as an error instead.

use std::fmt::{self, Display, Formatter};
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error};

/// Which protocol loop a task drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Sender,
    Checker,
}

impl Display for TaskKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Sender => write!(f, "heartbeat sender"),
            TaskKind::Checker => write!(f, "heartbeat checker"),
        }
    }
}

/// Single-use cancellation signal.
pub struct CancelToken(oneshot::Sender<()>);

impl CancelToken {
    /// Create a token and the receiver it wakes.
    pub fn pair() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self(tx), rx)
    }

    /// Fire the signal. Consumes the token.
    pub fn cancel(self) {
        // The receiver is gone only if the task already exited.
        let _ = self.0.send(());
    }
}

/// A background loop that runs `tick` once per period until cancelled.
///
/// The first tick fires one full period after spawning. A tick that overruns
/// the period delays the following ones rather than bursting to catch up.
/// Dropping the task without calling [`PeriodicTask::stop`] also ends the
/// loop, since the cancellation channel closes.
pub struct PeriodicTask {
    kind: TaskKind,
    period: Duration,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn the loop on the current tokio runtime.
    ///
    /// # Panics
    /// Panics if `period` is zero or if called outside a tokio runtime.
    pub fn spawn<F, Fut>(kind: TaskKind, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cancel, mut cancelled) = CancelToken::pair();

        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!("{} started (every {:?})", kind, period);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancelled => break,
                    _ = ticker.tick() => tick().await,
                }
            }

            debug!("{} stopped", kind);
        });

        Self {
            kind,
            period,
            cancel,
            handle,
        }
    }

    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Cancel the loop and wait for it to exit.
    ///
    /// A tick already in progress runs to completion; no tick starts afterwards.
    pub async fn stop(self) {
        let Self {
            kind,
            cancel,
            handle,
            ..
        } = self;

        cancel.cancel();
        if let Err(e) = handle.await
            && e.is_panic()
        {
            error!("{} panicked: {}", kind, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(period: Duration) -> (PeriodicTask, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let task = PeriodicTask::spawn(TaskKind::Sender, period, move || {
            let count = Arc::clone(&count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        (task, count)
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_after_one_period() {
        let (task, count) = counting_task(Duration::from_millis(1000));

        time::sleep(Duration::from_millis(999)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        task.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_stopped() {
        let (task, count) = counting_task(Duration::from_millis(1000));

        time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        task.stop().await;
        time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_ends_loop() {
        let (task, count) = counting_task(Duration::from_millis(100));
        time::sleep(Duration::from_millis(250)).await;
        drop(task);

        let seen = count.load(Ordering::SeqCst);
        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_tick_delays_schedule() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let task = PeriodicTask::spawn(TaskKind::Checker, Duration::from_millis(100), move || {
            let count = Arc::clone(&count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                time::sleep(Duration::from_millis(250)).await;
            }
        });

        // Ticks start at 100, 350 (delayed), 600: never more than one in flight.
        time::sleep(Duration::from_millis(700)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        task.stop().await;
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(TaskKind::Sender.to_string(), "heartbeat sender");
        assert_eq!(TaskKind::Checker.to_string(), "heartbeat checker");
    }
}
