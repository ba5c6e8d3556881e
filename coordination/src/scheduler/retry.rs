//! Retry backoff and dead-letter decisions

use std::time::Duration;

use crate::state::Job;

/// Cap on the backoff exponent; keeps the multiplication from overflowing
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// What happens to a job after its execution failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDecision {
    /// Requeue after `delay`
    Retry { delay: Duration },
    /// Retry budget exhausted
    DeadLetter,
    /// Never retried (agents killed by signal or timeout)
    Terminal,
}

/// Exponential backoff: `base_delay * 2^retry_count`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Backoff before the attempt following `retry_count` earlier retries
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32 << retry_count.min(MAX_BACKOFF_EXPONENT);
        self.base_delay.saturating_mul(factor)
    }

    /// Decide the fate of a failed job.
    ///
    /// `retryable` is false for failures that must never be retried.
    pub fn decide(&self, job: &Job, retryable: bool) -> FailureDecision {
        if !retryable {
            FailureDecision::Terminal
        } else if job.retry_count < job.max_retries {
            FailureDecision::Retry {
                delay: self.delay_for(job.retry_count),
            }
        } else {
            FailureDecision::DeadLetter
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{JobMode, Priority};

    fn job(retry_count: u32, max_retries: u32) -> Job {
        let mut job = Job::new(
            "s".to_string(),
            "p".to_string(),
            JobMode::Chat,
            Priority::Normal,
            max_retries,
            "h".to_string(),
        );
        job.retry_count = retry_count;
        job
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }

    #[test]
    fn test_backoff_saturates() {
        let policy = RetryPolicy::new(Duration::from_secs(1));
        assert_eq!(policy.delay_for(1_000), policy.delay_for(MAX_BACKOFF_EXPONENT));
    }

    #[test]
    fn test_decisions() {
        let policy = RetryPolicy::new(Duration::from_millis(100));
        assert_eq!(
            policy.decide(&job(0, 2), true),
            FailureDecision::Retry {
                delay: Duration::from_millis(100)
            }
        );
        assert_eq!(
            policy.decide(&job(1, 2), true),
            FailureDecision::Retry {
                delay: Duration::from_millis(200)
            }
        );
        assert_eq!(policy.decide(&job(2, 2), true), FailureDecision::DeadLetter);
        assert_eq!(policy.decide(&job(0, 0), true), FailureDecision::DeadLetter);
        assert_eq!(policy.decide(&job(0, 2), false), FailureDecision::Terminal);
    }
}
