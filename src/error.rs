//! Error types.
//!
//! Every user-visible failure happens at construction time: building the
//! engine, registering jobs, or planning. Steady-state frames never return
//! recoverable errors; degraded tuning is handled internally.

use crate::job::JobId;
use crate::task::TaskDescriptor;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A planning pass admitted no job while jobs were still unassigned.
    #[error("phase planning made no progress with {remaining} job(s) unassigned")]
    PlanStalled { remaining: usize },

    #[error("plan needs more than {limit} phases")]
    TooManyPhases { limit: usize },

    #[error("{what} capacity {capacity} is not a power of two")]
    CapacityNotPowerOfTwo { what: &'static str, capacity: usize },

    #[error("job registry is full (capacity {capacity})")]
    RegistryFull { capacity: usize },

    #[error("job {0} is already registered")]
    DuplicateJob(JobId),

    #[error("execute_frame called before build_plan")]
    PlanNotBuilt,

    #[error("engine needs at least one worker")]
    NoWorkers,

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{count} engine thread(s) panicked")]
    ThreadPanicked { count: usize },

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

/// Returned by [`LocalQueue::push`](crate::deque::LocalQueue::push) when the
/// queue already holds `capacity` records. The rejected record is handed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("work queue is full, rejected task for job {}", .0.job)]
pub struct QueueFull(pub TaskDescriptor);

/// Failure reported by an [`Oracle`](crate::oracle::Oracle). Always recoverable:
/// the tuner publishes the fallback strategy instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("oracle is not available")]
    Unavailable,
    #[error("oracle produced an invalid strategy: {0}")]
    InvalidStrategy(String),
    #[error("oracle panicked")]
    Panicked,
}
