//! Job state and durable checkpointing
//!
//! This module holds the data model shared by the scheduler and the
//! consensus engine:
//! - `Job` and its closed `JobStatus` lifecycle
//! - `AgentOutput`, `StageAnalysis`, `SecurityValidation`, `FinalResult`
//! - `JobStore` implementations used to rehydrate jobs after a restart
//!
//! # Usage
//!
//! ```ignore
//! use swarm_coordination::state::{FileJobStore, JobStore};
//!
//! let store = FileJobStore::open("./swarm-state/jobs.jsonl")?;
//! for job in store.load_jobs()? {
//!     println!("{} {}", job.id, job.status);
//! }
//! ```

pub mod store;
pub mod types;

// Re-export core types
pub use store::{FileJobStore, JobStore, MemoryJobStore, SharedJobStore, StoreError, StoreResult};
pub use types::{
    is_signal_kill, AgentInfo, AgentOutput, AgentStatus, ConfidenceMethod, FinalResult, Job,
    JobId, JobMode, JobStatus, Priority, SecurityCheckDetail, SecurityValidation, SessionId,
    StageAnalysis, SIGNAL_KILL_EXIT_CODES,
};
