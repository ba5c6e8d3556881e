//! Admission requests and content hashing

use serde::{Deserialize, Serialize};

use crate::state::{Job, JobMode, Priority, SessionId};

/// A request to run a prompt through the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub session_id: SessionId,
    pub prompt: String,
    pub mode: JobMode,
    #[serde(default)]
    pub attachments: Vec<String>,
    /// Raw priority; normalized to 1..=3 on admission
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Precomputed content hash; derived from the request when absent
    #[serde(default)]
    pub dedupe_hash: Option<String>,
}

impl EnqueueRequest {
    pub fn new(session_id: impl Into<String>, prompt: impl Into<String>, mode: JobMode) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            mode,
            attachments: Vec::new(),
            priority: None,
            max_retries: None,
            idempotency_key: None,
            dedupe_hash: None,
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn with_dedupe_hash(mut self, hash: impl Into<String>) -> Self {
        self.dedupe_hash = Some(hash.into());
        self
    }

    /// Normalized priority (defaults to normal)
    pub fn normalized_priority(&self) -> Priority {
        self.priority.map(Priority::normalize).unwrap_or_default()
    }

    /// Content hash for this request
    pub fn content_hash(&self) -> String {
        self.dedupe_hash.clone().unwrap_or_else(|| {
            compute_dedupe_hash(&self.session_id, &self.prompt, self.mode, &self.attachments)
        })
    }

    /// Build the queued job this request admits
    pub(crate) fn into_job(self, default_max_retries: u32) -> Job {
        let priority = self.normalized_priority();
        let dedupe_hash = self.content_hash();
        let max_retries = self.max_retries.unwrap_or(default_max_retries);
        Job::new(
            self.session_id,
            self.prompt,
            self.mode,
            priority,
            max_retries,
            dedupe_hash,
        )
        .with_attachments(self.attachments)
        .with_idempotency_key(self.idempotency_key)
    }
}

/// Content hash of session, prompt, mode and attachments.
///
/// Fields are NUL-separated so that shifting text between fields changes
/// the hash.
pub fn compute_dedupe_hash(
    session_id: &str,
    prompt: &str,
    mode: JobMode,
    attachments: &[String],
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(session_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(prompt.as_bytes());
    hasher.update(b"\0");
    hasher.update(mode.to_string().as_bytes());
    for attachment in attachments {
        hasher.update(b"\0");
        hasher.update(attachment.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        let a = compute_dedupe_hash("s1", "fix the bug", JobMode::Swarm, &[]);
        let b = compute_dedupe_hash("s1", "fix the bug", JobMode::Swarm, &[]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hash_covers_every_field() {
        let base = compute_dedupe_hash("s1", "p", JobMode::Swarm, &["a.rs".to_string()]);
        assert_ne!(base, compute_dedupe_hash("s2", "p", JobMode::Swarm, &["a.rs".to_string()]));
        assert_ne!(base, compute_dedupe_hash("s1", "q", JobMode::Swarm, &["a.rs".to_string()]));
        assert_ne!(base, compute_dedupe_hash("s1", "p", JobMode::Chat, &["a.rs".to_string()]));
        assert_ne!(base, compute_dedupe_hash("s1", "p", JobMode::Swarm, &[]));
        // Field boundaries matter
        assert_ne!(
            compute_dedupe_hash("ab", "c", JobMode::Chat, &[]),
            compute_dedupe_hash("a", "bc", JobMode::Chat, &[])
        );
    }

    #[test]
    fn test_request_into_job() {
        let job = EnqueueRequest::new("s1", "hello", JobMode::Chat)
            .with_priority(9)
            .with_idempotency_key("req-1")
            .into_job(2);
        assert_eq!(job.priority, Priority::High);
        assert_eq!(job.max_retries, 2);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.idempotency_key.as_deref(), Some("req-1"));
        assert_eq!(
            job.dedupe_hash,
            compute_dedupe_hash("s1", "hello", JobMode::Chat, &[])
        );
    }

    #[test]
    fn test_default_priority_and_supplied_hash() {
        let request = EnqueueRequest::new("s1", "hello", JobMode::Chat)
            .with_dedupe_hash("custom")
            .with_max_retries(5);
        assert_eq!(request.normalized_priority(), Priority::Normal);
        let job = request.into_job(2);
        assert_eq!(job.dedupe_hash, "custom");
        assert_eq!(job.max_retries, 5);
    }
}
