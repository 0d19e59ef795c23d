use crate::config::ConfigError;
use crate::store::StoreError;
use crate::task::TaskKind;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid {kind} interval {interval:?}: {reason}")]
    InvalidInterval {
        kind: TaskKind,
        interval: Duration,
        reason: &'static str,
    },

    #[error("{0} is already running")]
    AlreadyRunning(TaskKind),

    #[error("{0} is not running (never started or already stopped)")]
    NotRunning(TaskKind),
}

pub type Result<T> = std::result::Result<T, HeartbeatError>;
