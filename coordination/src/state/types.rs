//! Core types for job state and consensus results
//!
//! Jobs are persisted through the [`JobStore`](super::JobStore) and are the
//! only mutable records in the system. Stage analyses and final results are
//! created fresh per execution attempt and never mutated after return.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for jobs
pub type JobId = String;

/// Identifier of the caller session that submitted a job
pub type SessionId = String;

/// Exit codes reported when an agent was killed by timeout or signal.
///
/// 124 is `timeout(1)`, 137 is SIGKILL, 143 is SIGTERM.
pub const SIGNAL_KILL_EXIT_CODES: [i32; 3] = [124, 137, 143];

/// Whether an exit code means the agent was killed rather than failing on its own.
pub fn is_signal_kill(exit_code: i32) -> bool {
    SIGNAL_KILL_EXIT_CODES.contains(&exit_code)
}

/// How the prompt should be processed by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobMode {
    /// Single conversational answer
    Chat,
    /// Multi-agent swarm over the full stage pipeline
    Swarm,
    /// Swarm against a project checkout (enables security validation)
    Project,
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobMode::Chat => write!(f, "chat"),
            JobMode::Swarm => write!(f, "swarm"),
            JobMode::Project => write!(f, "project"),
        }
    }
}

/// Lifecycle status of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    /// Waiting in a priority lane or in a retry backoff
    Queued,
    /// Owned by an execution task
    Running,
    /// Pipeline produced a final result
    Completed,
    /// Terminal failure that is never retried (signal kill)
    Failed,
    /// Cancelled by a caller
    Cancelled,
    /// Retry budget exhausted
    DeadLetter,
}

impl JobStatus {
    /// Whether the job can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::DeadLetter
        )
    }

    /// Whether the job still holds its dedupe slot.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    /// Whether a repeat request with the same idempotency key should return this job.
    pub fn holds_idempotency_key(&self) -> bool {
        matches!(
            self,
            JobStatus::Queued | JobStatus::Running | JobStatus::Completed
        )
    }

    /// The only place job status transitions are decided.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (*self, next) {
            (Queued, Running) | (Queued, Cancelled) => true,
            // Running -> Queued covers both retry requeue and restart rehydration.
            (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Running, Queued)
            | (Running, DeadLetter) => true,
            (Queued, _) | (Running, _) => false,
            (Completed, _) | (Failed, _) | (Cancelled, _) | (DeadLetter, _) => false,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
            JobStatus::DeadLetter => write!(f, "dead-letter"),
        }
    }
}

/// Scheduling priority, normalized to three lanes (3 = highest)
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
}

impl Priority {
    /// Normalize any caller-supplied integer: `>= 3` is high, `<= 1` is low.
    pub fn normalize(raw: i64) -> Self {
        if raw >= 3 {
            Priority::High
        } else if raw <= 1 {
            Priority::Low
        } else {
            Priority::Normal
        }
    }

    pub fn level(&self) -> u8 {
        *self as u8
    }

    /// All priorities, highest first
    pub fn all() -> &'static [Priority] {
        &[Priority::High, Priority::Normal, Priority::Low]
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> u8 {
        p.level()
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Priority::Low),
            2 => Ok(Priority::Normal),
            3 => Ok(Priority::High),
            other => Err(format!("priority out of range: {}", other)),
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// One unit of work tracked by the scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub session_id: SessionId,
    pub prompt: String,
    pub mode: JobMode,

    #[serde(default)]
    pub attachments: Vec<String>,

    pub status: JobStatus,
    pub priority: Priority,

    pub retry_count: u32,
    pub max_retries: u32,

    /// Earliest time a retry may run; absent when immediately eligible
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,

    /// Further keys from requests merged into this job by content hash
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub idempotency_aliases: Vec<String>,

    /// Content hash of session, prompt, mode and attachments
    pub dedupe_hash: String,

    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Progress percentage (0-100)
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<FinalResult>,
    /// Last failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    /// Create a freshly queued job
    pub fn new(
        session_id: SessionId,
        prompt: String,
        mode: JobMode,
        priority: Priority,
        max_retries: u32,
        dedupe_hash: String,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            session_id,
            prompt,
            mode,
            attachments: Vec::new(),
            status: JobStatus::Queued,
            priority,
            retry_count: 0,
            max_retries,
            next_retry_at: None,
            idempotency_key: None,
            idempotency_aliases: Vec::new(),
            dedupe_hash,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0,
            current_stage: None,
            result: None,
            error: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_idempotency_key(mut self, key: Option<String>) -> Self {
        self.idempotency_key = key;
        self
    }

    /// Record another key that resolves to this job; returns whether it was new.
    pub fn add_idempotency_alias(&mut self, key: &str) -> bool {
        if self.idempotency_key.as_deref() == Some(key)
            || self.idempotency_aliases.iter().any(|k| k == key)
        {
            return false;
        }
        self.idempotency_aliases.push(key.to_string());
        true
    }

    /// Primary key followed by merged aliases
    pub fn idempotency_keys(&self) -> impl Iterator<Item = &str> {
        self.idempotency_key
            .as_deref()
            .into_iter()
            .chain(self.idempotency_aliases.iter().map(String::as_str))
    }

    /// Move to `next` if the transition is allowed; returns whether it happened.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Whether a deferred retry is still waiting at `now`
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at.is_some_and(|at| at > now)
    }
}

/// Raw output of one agent subprocess
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub agent_id: String,
    pub output: String,
    /// 0 = success
    pub exit_code: i32,
}

impl AgentOutput {
    pub fn new(agent_id: impl Into<String>, output: impl Into<String>, exit_code: i32) -> Self {
        Self {
            agent_id: agent_id.into(),
            output: output.into(),
            exit_code,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

/// How a stage confidence number was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMethod {
    /// Lexical word-set overlap only
    Jaccard,
    /// Lexical overlap blended with embedding similarity
    Hybrid,
}

/// Consensus analysis of one pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageAnalysis {
    /// Agreement score (0-100)
    pub confidence: f64,
    /// Human-readable comparison of the outputs
    pub agreements: String,
    /// References extracted from outputs, deduplicated in first-seen order
    pub sources: Vec<String>,
    pub all_passed: bool,
    /// Share of agents that exited 0 (0-100)
    pub pass_rate: f64,
    pub best_output: String,
    pub needs_rerun: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_similarity: Option<f64>,
    pub confidence_method: ConfidenceMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_check_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fact_check_score: Option<f64>,
}

/// Outcome of a single named security check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityCheckDetail {
    pub name: String,
    pub passed: bool,
    pub output: String,
}

/// Aggregate security verdict for a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityValidation {
    pub passed: bool,
    pub issues: Vec<String>,
    pub details: Vec<SecurityCheckDetail>,
}

impl SecurityValidation {
    /// Verdict used when no security validation was requested
    pub fn skipped() -> Self {
        Self {
            passed: true,
            issues: Vec::new(),
            details: Vec::new(),
        }
    }
}

/// Execution status of one agent in the roster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Pending => write!(f, "pending"),
            AgentStatus::Running => write!(f, "running"),
            AgentStatus::Completed => write!(f, "completed"),
            AgentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One agent in the roster of a finished job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub agent_id: String,
    pub stage: String,
    pub status: AgentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// Reconciled output of a whole pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResult {
    pub final_output: String,
    /// Overall confidence (0-100)
    pub confidence: f64,
    pub agents: Vec<AgentInfo>,
    pub sources: Vec<String>,
    pub validation_passed: bool,
}
