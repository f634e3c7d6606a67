//! Error types returned by the public scheduler API.

use thiserror::Error;

/// Failure modes surfaced across `forkjoin`'s public entry points.
///
/// Mirrors the four error kinds from the error-handling design: invalid
/// configuration and resource exhaustion are always returned here; the
/// remaining "programmer error" kinds (double-publish, stale id use) are
/// checked where cheap and returned as errors too, rather than left as UB.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(&'static str),

    #[error("task pool {pool} is full (capacity {capacity})")]
    PoolExhausted { pool: u32, capacity: u32 },

    #[error("permits-list chunk could not be committed")]
    ChunkCommitFailed,

    #[error("failed to spawn worker thread: {0}")]
    ThreadSpawnFailed(std::io::Error),

    #[error("failed to reserve backing memory for pool {pool}")]
    ReserveFailed { pool: u32 },

    #[error("task id is stale or invalid")]
    StaleTaskId,

    #[error("task has already been published")]
    AlreadyPublished,

    #[error("closure of {size} bytes exceeds the {limit}-byte inline task buffer")]
    ClosureTooLarge { size: usize, limit: usize },

    #[error("no pool is registered for role {0:?} at index {1}")]
    NoSuchPool(crate::config::Role, usize),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
