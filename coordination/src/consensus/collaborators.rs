//! External tools the consensus engine delegates to
//!
//! Embedding similarity, fact checking and security scanning live outside
//! this crate; the engine only sees these traits.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::AgentOutput;

/// Embedding-based similarity provider
#[async_trait]
pub trait SemanticScorer: Send + Sync {
    /// Mean pairwise semantic similarity of the outputs (0.0-1.0)
    async fn similarity(&self, outputs: &[AgentOutput]) -> anyhow::Result<f64>;
}

/// Project the fact checker verifies claims against
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectContext {
    pub root: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ProjectContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            description: None,
        }
    }
}

/// Verification report for one output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactCheckReport {
    /// Share of claims verified against the project (0-100)
    pub score: f64,
    pub verified_claims: u32,
    pub unverified_claims: u32,
    pub summary: String,
}

/// Claim verification provider
#[async_trait]
pub trait FactChecker: Send + Sync {
    async fn verify(
        &self,
        output: &str,
        context: &ProjectContext,
    ) -> anyhow::Result<FactCheckReport>;
}

/// One named check run by the security tooling (audit, secret scan, ...)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityCheckOutcome {
    pub name: String,
    pub passed: bool,
    pub output: String,
}

/// Aggregate report from the security tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityReport {
    pub passed: bool,
    pub checks: Vec<SecurityCheckOutcome>,
}

/// Security check provider
#[async_trait]
pub trait SecurityChecker: Send + Sync {
    async fn run_checks(&self, project_path: &Path) -> anyhow::Result<SecurityReport>;
}
