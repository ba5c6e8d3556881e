//! Broadcast events for job status and pipeline progress
//!
//! The scheduler publishes `job_status`, `swarm_result`, `swarm_error` and
//! `retry_scheduled` events; pipeline runners publish `agent_output` and
//! `agent_status` through their [`JobContext`](crate::pipeline::JobContext).
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │   JobQueue   │────▶│  Event Bus   │────▶│  Subscribers │
//! │  JobContext  │     │  (broadcast) │     │  (UI / API)  │
//! └──────────────┘     └──────────────┘     └──────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use swarm_coordination::events::{EventBusExt, EventFilter};
//!
//! let mut rx = queue.events().subscribe_filtered(EventFilter::new().job(&job.id));
//! while let Ok(event) = rx.recv().await {
//!     println!("{}", serde_json::to_string(&event)?);
//! }
//! ```

pub mod bus;
pub mod types;

// Re-export core types
pub use bus::{EventBus, EventBusExt, EventFilter, FilteredReceiver, SharedEventBus};
pub use types::QueueEvent;
