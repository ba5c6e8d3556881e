//! Swarm Coordination Library
//!
//! This library provides:
//! - A single-process priority job queue with idempotent admission,
//!   content-hash deduplication, weighted lanes, a concurrency and memory
//!   gate, exponential retry backoff and a dead-letter list
//! - A multi-agent consensus engine that scores agreement between agents of
//!   one pipeline stage, selects the representative output and decides
//!   when a stage must be re-run
//! - Result assembly folding every stage into one final confidence
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//! use swarm_coordination::{
//!     CoordinationConfig, EnqueueRequest, FileJobStore, JobMode, JobQueue, StagePipeline,
//! };
//!
//! let config = CoordinationConfig::load(None)?;
//! let runner = StagePipeline::from_config(Arc::new(my_executor), &config.consensus);
//! let queue = JobQueue::builder(config.queue.clone(), Arc::new(runner))
//!     .store(FileJobStore::open(&config.state_path)?.shared())
//!     .build()?;
//! queue.restore()?;
//!
//! let job = queue.enqueue(EnqueueRequest::new("session-1", "Add retries", JobMode::Swarm))?;
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod consensus;
pub mod events;
pub mod pipeline;
pub mod scheduler;
pub mod state;

// Re-export key configuration types
pub use config::{
    ConfigError, ConfigResult, ConsensusConfig, CoordinationConfig, QueueConfig, QueueSettings,
    SettingsProvider, SharedSettings, MAX_CONCURRENCY,
};

// Re-export key consensus types
pub use consensus::{
    analyze_stage_outputs, build_final_result, compute_final_confidence, select_best_output,
    should_rerun_validation, AnalysisOptions, ConsensusEngine, ConsensusError, ConsensusResult,
    FactChecker, FinalResultInput, PipelineStage, ProjectContext, SecurityChecker,
    SemanticScorer,
};

// Re-export key event types
pub use events::{EventBus, EventBusExt, EventFilter, QueueEvent, SharedEventBus};

// Re-export key pipeline types
pub use pipeline::{
    JobContext, PipelineError, PipelineResult, PipelineRunner, StageExecutor, StagePipeline,
    StageRequest,
};

// Re-export key scheduler types
pub use scheduler::{
    compute_dedupe_hash, EnqueueRequest, FixedMemory, JobQueue, JobQueueBuilder, MemoryProbe,
    QueueError, QueueHealthMetrics, QueueResult, RetryPolicy, SystemMemory,
};

// Re-export key state types
pub use state::{
    AgentInfo, AgentOutput, AgentStatus, ConfidenceMethod, FileJobStore, FinalResult, Job, JobId,
    JobMode, JobStatus, JobStore, MemoryJobStore, Priority, SecurityValidation, StageAnalysis,
};
