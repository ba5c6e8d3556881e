//! Queue health snapshot

use serde::{Deserialize, Serialize};

/// Operational signal for spotting starvation or systemic failure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueHealthMetrics {
    pub active_workers: usize,
    /// Effective concurrency limit read on the last call
    pub configured_concurrency: usize,
    /// Jobs waiting in lanes plus jobs in retry backoff
    pub queue_depth: usize,
    pub depth_high: usize,
    pub depth_normal: usize,
    pub depth_low: usize,
    /// Age of the oldest queued job in milliseconds
    pub oldest_queued_age_ms: Option<u64>,
    /// Jobs waiting on a retry timer
    pub retry_waiting: usize,
    /// Cumulative retries scheduled since start
    pub retries_scheduled: u64,
    pub dead_letter_count: usize,
}
