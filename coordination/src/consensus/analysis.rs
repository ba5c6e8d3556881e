//! Stage analysis: agreement scoring and re-run escalation

use serde::{Deserialize, Serialize};

use super::agreements::summarize_agreements;
use super::collaborators::ProjectContext;
use super::similarity::{pairwise_agreement, select_best_output};
use super::sources::collect_sources;
use crate::state::{AgentOutput, ConfidenceMethod, StageAnalysis};

/// Default confidence a stage must reach to be trusted
pub const DEFAULT_THRESHOLD: f64 = 80.0;

/// Confidence assigned when a single agent ran (nothing to agree with)
pub const SINGLE_OUTPUT_CONFIDENCE: f64 = 50.0;

/// Minimum best-output length worth fact checking
pub const MIN_FACT_CHECK_CHARS: usize = 20;

/// Optional escalations for stage analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub threshold: f64,
    /// Blend embedding similarity into the lexical score
    pub use_semantic_validation: bool,
    /// Penalize confidence by unverified claims
    pub enable_fact_checking: bool,
    pub project_context: Option<ProjectContext>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            use_semantic_validation: false,
            enable_fact_checking: false,
            project_context: None,
        }
    }
}

impl AnalysisOptions {
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_semantic_validation(mut self) -> Self {
        self.use_semantic_validation = true;
        self
    }

    pub fn with_fact_checking(mut self, context: ProjectContext) -> Self {
        self.enable_fact_checking = true;
        self.project_context = Some(context);
        self
    }
}

/// Lexical stage confidence (0-100): 0 for no outputs, 50 for one,
/// otherwise mean pairwise overlap scaled and rounded.
pub fn lexical_confidence(outputs: &[AgentOutput]) -> f64 {
    match outputs.len() {
        0 => 0.0,
        1 => SINGLE_OUTPUT_CONFIDENCE,
        _ => (pairwise_agreement(outputs) * 100.0).round(),
    }
}

/// Share of agents that exited 0 (0-100); 0 when no agent ran.
pub fn pass_rate(outputs: &[AgentOutput]) -> f64 {
    if outputs.is_empty() {
        return 0.0;
    }
    let passed = outputs.iter().filter(|o| o.succeeded()).count();
    100.0 * passed as f64 / outputs.len() as f64
}

/// Analyze one stage's outputs with lexical agreement only.
pub fn analyze_stage_outputs(outputs: &[AgentOutput], threshold: f64) -> StageAnalysis {
    let pass_rate = pass_rate(outputs);
    let confidence = lexical_confidence(outputs);

    StageAnalysis {
        confidence,
        agreements: summarize_agreements(outputs),
        sources: collect_sources(outputs.iter().map(|o| o.output.as_str())),
        all_passed: !outputs.is_empty() && pass_rate >= 100.0,
        pass_rate,
        best_output: select_best_output(outputs),
        needs_rerun: confidence < threshold,
        semantic_similarity: None,
        confidence_method: ConfidenceMethod::Jaccard,
        fact_check_result: None,
        fact_check_score: None,
    }
}

/// Whether a stage must be re-run: agents disagree, agents crash, or some
/// failed while the rest produced low-trust output.
pub fn should_rerun_validation(analysis: &StageAnalysis, threshold: f64) -> bool {
    analysis.confidence < threshold
        || analysis.pass_rate < 50.0
        || (!analysis.all_passed && analysis.confidence < 60.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analysis(confidence: f64, pass_rate: f64, all_passed: bool) -> StageAnalysis {
        StageAnalysis {
            confidence,
            agreements: String::new(),
            sources: vec![],
            all_passed,
            pass_rate,
            best_output: String::new(),
            needs_rerun: false,
            semantic_similarity: None,
            confidence_method: ConfidenceMethod::Jaccard,
            fact_check_result: None,
            fact_check_score: None,
        }
    }

    #[test]
    fn test_identical_outputs() {
        let outputs = vec![AgentOutput::new("a", "X", 0), AgentOutput::new("b", "X", 0)];
        let result = analyze_stage_outputs(&outputs, DEFAULT_THRESHOLD);
        assert!(result.all_passed);
        assert!((result.pass_rate - 100.0).abs() < f64::EPSILON);
        assert_eq!(result.best_output, "X");
        assert!((result.confidence - 100.0).abs() < f64::EPSILON);
        assert!(!result.needs_rerun);
        assert_eq!(result.confidence_method, ConfidenceMethod::Jaccard);
    }

    #[test]
    fn test_empty_outputs() {
        let result = analyze_stage_outputs(&[], DEFAULT_THRESHOLD);
        assert!(!result.all_passed);
        assert!(result.pass_rate.abs() < f64::EPSILON);
        assert!(result.confidence.abs() < f64::EPSILON);
        assert_eq!(result.best_output, "");
        assert!(result.needs_rerun);
    }

    #[test]
    fn test_single_output() {
        let result = analyze_stage_outputs(&[AgentOutput::new("a", "answer", 0)], 80.0);
        assert!((result.confidence - 50.0).abs() < f64::EPSILON);
        assert!(result.needs_rerun);
        assert_eq!(result.best_output, "answer");
    }

    #[test]
    fn test_partial_failure_pass_rate() {
        let outputs = vec![
            AgentOutput::new("a", "fix the lock order", 0),
            AgentOutput::new("b", "fix the lock order", 0),
            AgentOutput::new("c", "", 1),
            AgentOutput::new("d", "fix the lock order", 0),
        ];
        let result = analyze_stage_outputs(&outputs, DEFAULT_THRESHOLD);
        assert!((result.pass_rate - 75.0).abs() < f64::EPSILON);
        assert!(!result.all_passed);
    }

    #[test]
    fn test_sources_collected() {
        let outputs = vec![
            AgentOutput::new("a", "see src/lib.rs and https://docs.rs/x", 0),
            AgentOutput::new("b", "see src/lib.rs", 0),
        ];
        let result = analyze_stage_outputs(&outputs, DEFAULT_THRESHOLD);
        assert_eq!(
            result.sources,
            vec!["src/lib.rs".to_string(), "https://docs.rs/x".to_string()]
        );
    }

    #[test]
    fn test_rerun_boundary() {
        assert!(!should_rerun_validation(&analysis(80.0, 100.0, true), 80.0));
        assert!(should_rerun_validation(&analysis(79.0, 100.0, true), 80.0));
    }

    #[test]
    fn test_rerun_on_crashes() {
        // High agreement but most agents crashed
        assert!(should_rerun_validation(&analysis(95.0, 40.0, false), 80.0));
        // Some failures with moderate agreement, below the lenient threshold
        assert!(should_rerun_validation(&analysis(55.0, 75.0, false), 50.0));
        // Some failures but strong agreement passes
        assert!(!should_rerun_validation(&analysis(85.0, 75.0, false), 80.0));
    }
}
