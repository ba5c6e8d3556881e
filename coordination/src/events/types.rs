//! Event types broadcast by the scheduler
//!
//! Delivery is fire-and-forget: nothing in scheduling waits on a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::{AgentStatus, FinalResult, Job, JobId, JobStatus, Priority, SessionId};

/// All queue and pipeline events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    /// A job changed status, progress or stage
    JobStatus {
        job_id: JobId,
        session_id: SessionId,
        status: JobStatus,
        priority: Priority,
        retry_count: u32,
        progress: u8,
        current_stage: Option<String>,
        error: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// A job completed with a final result
    SwarmResult {
        job_id: JobId,
        session_id: SessionId,
        result: FinalResult,
        timestamp: DateTime<Utc>,
    },

    /// A job failed terminally (dead-letter or signal kill)
    SwarmError {
        job_id: JobId,
        session_id: SessionId,
        error: String,
        dead_letter: bool,
        timestamp: DateTime<Utc>,
    },

    /// A failed job was scheduled for another attempt
    RetryScheduled {
        job_id: JobId,
        session_id: SessionId,
        attempt: u32,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// An agent produced output text
    AgentOutput {
        job_id: JobId,
        session_id: SessionId,
        agent_id: String,
        text: String,
        timestamp: DateTime<Utc>,
    },

    /// An agent changed status
    AgentStatus {
        job_id: JobId,
        session_id: SessionId,
        agent_id: String,
        status: AgentStatus,
        exit_code: Option<i32>,
        timestamp: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Status snapshot event for a job
    pub fn job_status(job: &Job) -> Self {
        QueueEvent::JobStatus {
            job_id: job.id.clone(),
            session_id: job.session_id.clone(),
            status: job.status,
            priority: job.priority,
            retry_count: job.retry_count,
            progress: job.progress,
            current_stage: job.current_stage.clone(),
            error: job.error.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::JobStatus { .. } => "job_status",
            QueueEvent::SwarmResult { .. } => "swarm_result",
            QueueEvent::SwarmError { .. } => "swarm_error",
            QueueEvent::RetryScheduled { .. } => "retry_scheduled",
            QueueEvent::AgentOutput { .. } => "agent_output",
            QueueEvent::AgentStatus { .. } => "agent_status",
        }
    }

    /// Get the job ID this event refers to
    pub fn job_id(&self) -> &str {
        match self {
            QueueEvent::JobStatus { job_id, .. }
            | QueueEvent::SwarmResult { job_id, .. }
            | QueueEvent::SwarmError { job_id, .. }
            | QueueEvent::RetryScheduled { job_id, .. }
            | QueueEvent::AgentOutput { job_id, .. }
            | QueueEvent::AgentStatus { job_id, .. } => job_id,
        }
    }

    /// Get the session ID this event refers to
    pub fn session_id(&self) -> &str {
        match self {
            QueueEvent::JobStatus { session_id, .. }
            | QueueEvent::SwarmResult { session_id, .. }
            | QueueEvent::SwarmError { session_id, .. }
            | QueueEvent::RetryScheduled { session_id, .. }
            | QueueEvent::AgentOutput { session_id, .. }
            | QueueEvent::AgentStatus { session_id, .. } => session_id,
        }
    }

    /// Get the event timestamp
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            QueueEvent::JobStatus { timestamp, .. }
            | QueueEvent::SwarmResult { timestamp, .. }
            | QueueEvent::SwarmError { timestamp, .. }
            | QueueEvent::RetryScheduled { timestamp, .. }
            | QueueEvent::AgentOutput { timestamp, .. }
            | QueueEvent::AgentStatus { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::JobMode;

    #[test]
    fn test_job_status_event_serialization() {
        let job = Job::new(
            "session-1".to_string(),
            "Summarize the module".to_string(),
            JobMode::Swarm,
            Priority::High,
            2,
            "hash".to_string(),
        );
        let event = QueueEvent::job_status(&job);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "job_status");
        assert_eq!(json["status"], "queued");
        assert_eq!(json["priority"], 3);
        assert_eq!(event.job_id(), job.id);
        assert_eq!(event.session_id(), "session-1");
    }

    #[test]
    fn test_event_type_names() {
        let event = QueueEvent::RetryScheduled {
            job_id: "job-1".to_string(),
            session_id: "s".to_string(),
            attempt: 1,
            delay_ms: 1000,
            timestamp: Utc::now(),
        };
        assert_eq!(event.event_type(), "retry_scheduled");

        let json = serde_json::to_string(&event).unwrap();
        let parsed: QueueEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type(), "retry_scheduled");
    }
}
