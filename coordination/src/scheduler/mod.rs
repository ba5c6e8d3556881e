//! Job scheduler
//!
//! Admission with idempotency and content-hash deduplication, weighted
//! priority lanes, a concurrency and memory gate, exponential retry backoff
//! and a dead-letter list.
//!
//! ```text
//! enqueue ──▶ lanes [3][2][1] ──pump──▶ runner task ──▶ completed
//!                 ▲                          │
//!                 └──── retry timer ◀────────┤ failure
//!                                            └──▶ dead-letter / failed
//! ```
//!
//! All queue state lives behind one mutex. Enqueue, pump, completion,
//! retry timers and cancellation are synchronous critical sections over it,
//! so a late completion can never race a cancellation.

pub mod admission;
pub mod lanes;
pub mod memory;
pub mod metrics;
pub mod queue;
pub mod retry;

pub use admission::{compute_dedupe_hash, EnqueueRequest};
pub use lanes::{Candidate, PriorityLanes};
pub use memory::{has_headroom, FixedMemory, MemoryProbe, SystemMemory};
pub use metrics::QueueHealthMetrics;
pub use queue::{JobQueue, JobQueueBuilder};
pub use retry::{FailureDecision, RetryPolicy};

use crate::config::ConfigError;
use crate::state::{JobId, JobStatus, StoreError};

/// Errors surfaced by the queue API
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Queue state lock poisoned")]
    LockPoisoned,

    #[error("No tokio runtime available to run jobs")]
    NoRuntime,

    #[error("Invalid queue configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Job store error: {0}")]
    Store(#[from] StoreError),
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
