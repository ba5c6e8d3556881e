//! Consensus engine: stage analysis with collaborator escalations

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::analysis::{analyze_stage_outputs, AnalysisOptions, MIN_FACT_CHECK_CHARS};
use super::assembly::security_validation_from_report;
use super::collaborators::{FactChecker, SecurityChecker, SemanticScorer};
use super::{ConsensusError, ConsensusResult};
use crate::config::ConsensusConfig;
use crate::state::{AgentOutput, ConfidenceMethod, SecurityValidation, StageAnalysis};

/// Scores stage outputs and delegates optional checks to external tools
#[derive(Clone, Default)]
pub struct ConsensusEngine {
    config: ConsensusConfig,
    semantic: Option<Arc<dyn SemanticScorer>>,
    fact_checker: Option<Arc<dyn FactChecker>>,
    security: Option<Arc<dyn SecurityChecker>>,
}

impl std::fmt::Debug for ConsensusEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusEngine")
            .field("config", &self.config)
            .field("semantic", &self.semantic.is_some())
            .field("fact_checker", &self.fact_checker.is_some())
            .field("security", &self.security.is_some())
            .finish()
    }
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn with_semantic_scorer(mut self, scorer: Arc<dyn SemanticScorer>) -> Self {
        self.semantic = Some(scorer);
        self
    }

    pub fn with_fact_checker(mut self, checker: Arc<dyn FactChecker>) -> Self {
        self.fact_checker = Some(checker);
        self
    }

    pub fn with_security_checker(mut self, checker: Arc<dyn SecurityChecker>) -> Self {
        self.security = Some(checker);
        self
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Whether a security checker is wired in
    pub fn has_security_checker(&self) -> bool {
        self.security.is_some()
    }

    /// Default options derived from the engine configuration
    pub fn default_options(&self) -> AnalysisOptions {
        AnalysisOptions::default().with_threshold(self.config.threshold)
    }

    /// Analyze one stage, applying semantic blending and fact-check
    /// penalties when requested.
    ///
    /// Semantic scorer failures abort the analysis. Fact-check failures are
    /// logged and leave confidence untouched.
    pub async fn analyze_stage_outputs_with_options(
        &self,
        outputs: &[AgentOutput],
        options: &AnalysisOptions,
    ) -> ConsensusResult<StageAnalysis> {
        let mut analysis = analyze_stage_outputs(outputs, options.threshold);

        if options.use_semantic_validation && outputs.len() >= 2 {
            let scorer = self
                .semantic
                .as_ref()
                .ok_or(ConsensusError::MissingCollaborator("semantic scorer"))?;
            let similarity = scorer
                .similarity(outputs)
                .await
                .map_err(|e| ConsensusError::Collaborator(format!("semantic scorer: {:#}", e)))?
                .clamp(0.0, 1.0);

            let weight = self.config.semantic_weight.clamp(0.0, 1.0);
            let lexical = analysis.confidence;
            analysis.confidence =
                (lexical * (1.0 - weight) + similarity * 100.0 * weight).round();
            analysis.semantic_similarity = Some(similarity);
            analysis.confidence_method = ConfidenceMethod::Hybrid;
            debug!(
                lexical,
                similarity,
                confidence = analysis.confidence,
                "Blended semantic similarity into stage confidence"
            );
        }

        if options.enable_fact_checking {
            self.apply_fact_check(&mut analysis, options).await;
        }

        analysis.needs_rerun = analysis.confidence < options.threshold;
        Ok(analysis)
    }

    async fn apply_fact_check(&self, analysis: &mut StageAnalysis, options: &AnalysisOptions) {
        let Some(context) = options.project_context.as_ref() else {
            return;
        };
        if analysis.best_output.chars().count() < MIN_FACT_CHECK_CHARS {
            return;
        }
        let Some(checker) = self.fact_checker.as_ref() else {
            debug!("Fact checking requested but no checker configured");
            return;
        };

        match checker.verify(&analysis.best_output, context).await {
            Ok(report) => {
                let score = report.score.clamp(0.0, 100.0);
                let penalty = (100.0 - score) * self.config.fact_check_penalty_factor;
                let before = analysis.confidence;
                analysis.confidence = (before - penalty).max(0.0).round();
                analysis.fact_check_score = Some(score);
                analysis.fact_check_result = Some(report.summary);
                info!(
                    score,
                    penalty,
                    before,
                    after = analysis.confidence,
                    "Applied fact-check penalty"
                );
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Fact check failed, no penalty applied");
            }
        }
    }

    /// Run the security tooling against a project.
    ///
    /// A checker error yields a failed verdict carrying the error as an issue.
    pub async fn run_security_validation(&self, project_path: &Path) -> SecurityValidation {
        let Some(checker) = self.security.as_ref() else {
            debug!("No security checker configured, skipping");
            return SecurityValidation::skipped();
        };

        match checker.run_checks(project_path).await {
            Ok(report) => {
                let validation = security_validation_from_report(report);
                info!(
                    path = %project_path.display(),
                    passed = validation.passed,
                    issues = validation.issues.len(),
                    "Security validation finished"
                );
                validation
            }
            Err(e) => {
                warn!(path = %project_path.display(), error = %format!("{:#}", e), "Security check failed");
                SecurityValidation {
                    passed: false,
                    issues: vec![format!("security check failed: {:#}", e)],
                    details: vec![],
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::collaborators::{
        FactCheckReport, ProjectContext, SecurityCheckOutcome, SecurityReport,
    };
    use async_trait::async_trait;

    struct FixedSimilarity(f64);

    #[async_trait]
    impl SemanticScorer for FixedSimilarity {
        async fn similarity(&self, _outputs: &[AgentOutput]) -> anyhow::Result<f64> {
            Ok(self.0)
        }
    }

    struct BrokenScorer;

    #[async_trait]
    impl SemanticScorer for BrokenScorer {
        async fn similarity(&self, _outputs: &[AgentOutput]) -> anyhow::Result<f64> {
            anyhow::bail!("embedding endpoint unreachable")
        }
    }

    struct FixedFactCheck(f64);

    #[async_trait]
    impl FactChecker for FixedFactCheck {
        async fn verify(
            &self,
            _output: &str,
            _context: &ProjectContext,
        ) -> anyhow::Result<FactCheckReport> {
            Ok(FactCheckReport {
                score: self.0,
                verified_claims: 1,
                unverified_claims: 1,
                summary: format!("{}% verified", self.0),
            })
        }
    }

    struct BrokenFactCheck;

    #[async_trait]
    impl FactChecker for BrokenFactCheck {
        async fn verify(
            &self,
            _output: &str,
            _context: &ProjectContext,
        ) -> anyhow::Result<FactCheckReport> {
            anyhow::bail!("checker crashed")
        }
    }

    struct StaticSecurity(anyhow::Result<SecurityReport>);

    #[async_trait]
    impl SecurityChecker for StaticSecurity {
        async fn run_checks(&self, _project_path: &Path) -> anyhow::Result<SecurityReport> {
            match &self.0 {
                Ok(r) => Ok(r.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    fn long_outputs() -> Vec<AgentOutput> {
        vec![
            AgentOutput::new("a", "the queue uses weighted round robin lanes", 0),
            AgentOutput::new("b", "the queue uses weighted round robin lanes", 0),
        ]
    }

    #[tokio::test]
    async fn test_plain_analysis_matches_lexical() {
        let engine = ConsensusEngine::default();
        let analysis = engine
            .analyze_stage_outputs_with_options(&long_outputs(), &AnalysisOptions::default())
            .await
            .unwrap();
        assert!((analysis.confidence - 100.0).abs() < f64::EPSILON);
        assert_eq!(analysis.confidence_method, ConfidenceMethod::Jaccard);
        assert!(analysis.semantic_similarity.is_none());
    }

    #[tokio::test]
    async fn test_hybrid_confidence() {
        let engine = ConsensusEngine::new(ConsensusConfig::default())
            .with_semantic_scorer(Arc::new(FixedSimilarity(0.5)));
        let options = AnalysisOptions::default().with_semantic_validation();
        let analysis = engine
            .analyze_stage_outputs_with_options(&long_outputs(), &options)
            .await
            .unwrap();
        // 100 * 0.4 + 50 * 0.6
        assert!((analysis.confidence - 70.0).abs() < f64::EPSILON);
        assert_eq!(analysis.confidence_method, ConfidenceMethod::Hybrid);
        assert_eq!(analysis.semantic_similarity, Some(0.5));
        assert!(analysis.needs_rerun);
    }

    #[tokio::test]
    async fn test_semantic_failure_propagates() {
        let engine = ConsensusEngine::default().with_semantic_scorer(Arc::new(BrokenScorer));
        let options = AnalysisOptions::default().with_semantic_validation();
        let err = engine
            .analyze_stage_outputs_with_options(&long_outputs(), &options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("embedding endpoint unreachable"));

        let missing = ConsensusEngine::default()
            .analyze_stage_outputs_with_options(&long_outputs(), &options)
            .await
            .unwrap_err();
        assert!(matches!(missing, ConsensusError::MissingCollaborator(_)));
    }

    #[tokio::test]
    async fn test_fact_check_penalty() {
        let engine = ConsensusEngine::default().with_fact_checker(Arc::new(FixedFactCheck(50.0)));
        let options = AnalysisOptions::default().with_fact_checking(ProjectContext::new("/repo"));
        let analysis = engine
            .analyze_stage_outputs_with_options(&long_outputs(), &options)
            .await
            .unwrap();
        // 100 - (100 - 50) * 0.3
        assert!((analysis.confidence - 85.0).abs() < f64::EPSILON);
        assert_eq!(analysis.fact_check_score, Some(50.0));
        assert_eq!(analysis.fact_check_result.as_deref(), Some("50% verified"));
        assert!(!analysis.needs_rerun);
    }

    #[tokio::test]
    async fn test_fact_check_skipped_for_short_output() {
        let engine = ConsensusEngine::default().with_fact_checker(Arc::new(FixedFactCheck(0.0)));
        let options = AnalysisOptions::default().with_fact_checking(ProjectContext::new("/repo"));
        let outputs = vec![AgentOutput::new("a", "ok", 0), AgentOutput::new("b", "ok", 0)];
        let analysis = engine
            .analyze_stage_outputs_with_options(&outputs, &options)
            .await
            .unwrap();
        assert!((analysis.confidence - 100.0).abs() < f64::EPSILON);
        assert!(analysis.fact_check_score.is_none());
        assert!(analysis.fact_check_result.is_none());
    }

    #[tokio::test]
    async fn test_fact_check_skipped_without_project_context() {
        let engine = ConsensusEngine::default().with_fact_checker(Arc::new(FixedFactCheck(0.0)));
        let options = AnalysisOptions {
            enable_fact_checking: true,
            project_context: None,
            ..Default::default()
        };
        let analysis = engine
            .analyze_stage_outputs_with_options(&long_outputs(), &options)
            .await
            .unwrap();
        assert!((analysis.confidence - 100.0).abs() < f64::EPSILON);
        assert!(analysis.fact_check_score.is_none());
        assert!(analysis.fact_check_result.is_none());
        assert!(!analysis.needs_rerun);
    }

    #[tokio::test]
    async fn test_single_output_keeps_lexical_confidence() {
        // No scorer configured: the blend is never attempted for one output
        let options = AnalysisOptions::default().with_semantic_validation();
        let single = vec![AgentOutput::new("a", "the queue uses weighted lanes", 0)];
        let analysis = ConsensusEngine::default()
            .analyze_stage_outputs_with_options(&single, &options)
            .await
            .unwrap();
        assert!((analysis.confidence - 50.0).abs() < f64::EPSILON);
        assert_eq!(analysis.confidence_method, ConfidenceMethod::Jaccard);
        assert!(analysis.semantic_similarity.is_none());

        let engine = ConsensusEngine::default().with_semantic_scorer(Arc::new(FixedSimilarity(1.0)));
        let analysis = engine
            .analyze_stage_outputs_with_options(&single, &options)
            .await
            .unwrap();
        assert!((analysis.confidence - 50.0).abs() < f64::EPSILON);
        assert_eq!(analysis.confidence_method, ConfidenceMethod::Jaccard);
    }

    #[tokio::test]
    async fn test_fact_check_failure_is_ignored() {
        let engine = ConsensusEngine::default().with_fact_checker(Arc::new(BrokenFactCheck));
        let options = AnalysisOptions::default().with_fact_checking(ProjectContext::new("/repo"));
        let analysis = engine
            .analyze_stage_outputs_with_options(&long_outputs(), &options)
            .await
            .unwrap();
        assert!((analysis.confidence - 100.0).abs() < f64::EPSILON);
        assert!(analysis.fact_check_score.is_none());
    }

    #[tokio::test]
    async fn test_security_validation() {
        let skipped = ConsensusEngine::default()
            .run_security_validation(Path::new("/repo"))
            .await;
        assert!(skipped.passed);

        let report = SecurityReport {
            passed: false,
            checks: vec![SecurityCheckOutcome {
                name: "audit".to_string(),
                passed: false,
                output: "RUSTSEC-2024-0001".to_string(),
            }],
        };
        let engine =
            ConsensusEngine::default().with_security_checker(Arc::new(StaticSecurity(Ok(report))));
        let validation = engine.run_security_validation(Path::new("/repo")).await;
        assert!(!validation.passed);
        assert_eq!(validation.issues, vec!["audit: RUSTSEC-2024-0001".to_string()]);

        let broken = ConsensusEngine::default().with_security_checker(Arc::new(StaticSecurity(
            Err(anyhow::anyhow!("audit binary missing")),
        )));
        let validation = broken.run_security_validation(Path::new("/repo")).await;
        assert!(!validation.passed);
        assert!(validation.issues[0].contains("audit binary missing"));
    }
}
