//! Multi-agent consensus
//!
//! Scores agreement between the agents of one pipeline stage, picks the
//! representative output, decides whether the stage must be re-run, and
//! folds every stage into one final result.
//!
//! Lexical agreement is word-set Jaccard overlap. Embedding similarity,
//! fact checking and security scanning are external collaborators behind
//! the traits in [`collaborators`].

pub mod agreements;
pub mod analysis;
pub mod assembly;
pub mod collaborators;
pub mod engine;
pub mod similarity;
pub mod sources;

pub use analysis::{
    analyze_stage_outputs, lexical_confidence, pass_rate, should_rerun_validation,
    AnalysisOptions, DEFAULT_THRESHOLD,
};
pub use assembly::{
    build_final_result, compute_final_confidence, security_validation_from_report,
    FinalResultInput, PipelineStage,
};
pub use collaborators::{
    FactCheckReport, FactChecker, ProjectContext, SecurityCheckOutcome, SecurityChecker,
    SecurityReport, SemanticScorer,
};
pub use engine::ConsensusEngine;
pub use similarity::{jaccard_similarity, pairwise_agreement, select_best_output, tokenize};
pub use sources::{collect_sources, extract_sources};

/// Errors from consensus computation
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("Required collaborator not configured: {0}")]
    MissingCollaborator(&'static str),

    #[error("Collaborator failed: {0}")]
    Collaborator(String),
}

pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;
