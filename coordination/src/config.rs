//! Scheduler and consensus configuration
//!
//! Configuration comes from an optional TOML file, then environment
//! overrides. The queue polls a [`SettingsProvider`] on every pump cycle, so
//! operators can change concurrency without restarting.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::state::Priority;

/// Hard ceiling on concurrently running jobs regardless of configuration
pub const MAX_CONCURRENCY: usize = 8;

/// Error type for configuration loading
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Queue and retry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Requested concurrency, clamped to `[1, MAX_CONCURRENCY]` when read
    pub max_concurrent_jobs: usize,
    /// Retry budget for jobs that do not specify one
    pub default_max_retries: u32,
    /// First backoff delay; doubles per attempt
    pub base_retry_delay_ms: u64,
    /// Admission pauses while available host memory is below this
    pub min_free_memory_mb: u64,
    /// Weighted service cycle over priority levels (3 = highest)
    pub service_cycle: Vec<u8>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            default_max_retries: 2,
            base_retry_delay_ms: 1_000,
            min_free_memory_mb: 512,
            service_cycle: vec![3, 3, 2, 2, 1],
        }
    }
}

impl QueueConfig {
    /// Service cycle as priorities
    pub fn cycle(&self) -> ConfigResult<Vec<Priority>> {
        if self.service_cycle.is_empty() {
            return Err(ConfigError::Invalid("service_cycle is empty".to_string()));
        }
        self.service_cycle
            .iter()
            .map(|level| Priority::try_from(*level).map_err(ConfigError::Invalid))
            .collect()
    }

    pub fn min_free_memory_bytes(&self) -> u64 {
        self.min_free_memory_mb * 1024 * 1024
    }
}

/// Consensus thresholds and weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Stage confidence below this forces a re-run
    pub threshold: f64,
    /// Weight of embedding similarity in hybrid confidence (0.0-1.0)
    pub semantic_weight: f64,
    /// Confidence points subtracted per point of unverified fact-check score
    pub fact_check_penalty_factor: f64,
    /// Attempts per stage before accepting a low-confidence result
    pub max_stage_attempts: u32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            threshold: 80.0,
            semantic_weight: 0.6,
            fact_check_penalty_factor: 0.3,
            max_stage_attempts: 2,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub queue: QueueConfig,
    pub consensus: ConsensusConfig,
    /// Job log location
    pub state_path: PathBuf,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            consensus: ConsensusConfig::default(),
            state_path: PathBuf::from(".swarm-state/jobs.jsonl"),
        }
    }
}

impl CoordinationConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Apply `SWARM_*` environment overrides
    pub fn apply_env(&mut self) {
        if let Some(n) = env_parse("SWARM_MAX_CONCURRENT_JOBS") {
            self.queue.max_concurrent_jobs = n;
        }
        if let Some(n) = env_parse("SWARM_MAX_RETRIES") {
            self.queue.default_max_retries = n;
        }
        if let Some(n) = env_parse("SWARM_RETRY_DELAY_MS") {
            self.queue.base_retry_delay_ms = n;
        }
        if let Some(n) = env_parse("SWARM_MIN_FREE_MEMORY_MB") {
            self.queue.min_free_memory_mb = n;
        }
        if let Some(n) = env_parse("SWARM_CONSENSUS_THRESHOLD") {
            self.consensus.threshold = n;
        }
        if let Ok(path) = std::env::var("SWARM_STATE_PATH") {
            self.state_path = PathBuf::from(path);
        }
    }

    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        self.queue.cycle()?;
        if !(0.0..=100.0).contains(&self.consensus.threshold) {
            return Err(ConfigError::Invalid(format!(
                "consensus.threshold must be within 0-100, got {}",
                self.consensus.threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.consensus.semantic_weight) {
            return Err(ConfigError::Invalid(format!(
                "consensus.semantic_weight must be within 0-1, got {}",
                self.consensus.semantic_weight
            )));
        }
        if self.consensus.max_stage_attempts == 0 {
            return Err(ConfigError::Invalid(
                "consensus.max_stage_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.trim().parse().ok())
}

/// Live settings the queue reads on every pump cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSettings {
    pub max_concurrent_jobs: usize,
}

impl QueueSettings {
    /// Concurrency clamped to `[1, MAX_CONCURRENCY]`
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrent_jobs.clamp(1, MAX_CONCURRENCY)
    }
}

/// Source of live queue settings
pub trait SettingsProvider: Send + Sync {
    fn settings(&self) -> QueueSettings;
}

impl SettingsProvider for QueueConfig {
    fn settings(&self) -> QueueSettings {
        QueueSettings {
            max_concurrent_jobs: self.max_concurrent_jobs,
        }
    }
}

/// Settings that can be changed while the queue runs
#[derive(Debug, Clone)]
pub struct SharedSettings {
    inner: Arc<RwLock<QueueSettings>>,
}

impl SharedSettings {
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Change the concurrency limit; takes effect on the next pump cycle
    pub fn set_max_concurrent_jobs(&self, n: usize) {
        match self.inner.write() {
            Ok(mut guard) => guard.max_concurrent_jobs = n,
            Err(poisoned) => poisoned.into_inner().max_concurrent_jobs = n,
        }
    }
}

impl SettingsProvider for SharedSettings {
    fn settings(&self) -> QueueSettings {
        match self.inner.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
