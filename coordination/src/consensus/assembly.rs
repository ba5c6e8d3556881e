//! Result assembly: weighted final confidence and the final result record

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::collaborators::SecurityReport;
use super::sources::dedupe_preserving_order;
use crate::state::{AgentInfo, FinalResult, SecurityCheckDetail, SecurityValidation, StageAnalysis};

/// Any stage below this confidence caps the final result
pub const CATASTROPHIC_STAGE_CONFIDENCE: f64 = 30.0;
/// Cap applied when a stage is catastrophic
pub const CATASTROPHIC_CAP: f64 = 50.0;

/// Agent stages of the pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Research,
    Plan,
    Code,
    Validate,
    Synthesize,
}

impl PipelineStage {
    /// All stages in execution order
    pub fn all() -> &'static [PipelineStage] {
        &[
            PipelineStage::Research,
            PipelineStage::Plan,
            PipelineStage::Code,
            PipelineStage::Validate,
            PipelineStage::Synthesize,
        ]
    }

    /// Importance of the stage in the final confidence.
    ///
    /// Security carries the remaining 0.10 through `validation_passed`
    /// rather than through a stage analysis.
    pub fn weight(&self) -> f64 {
        match self {
            PipelineStage::Research => 0.10,
            PipelineStage::Plan => 0.15,
            PipelineStage::Code => 0.30,
            PipelineStage::Validate => 0.20,
            PipelineStage::Synthesize => 0.15,
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineStage::Research => write!(f, "research"),
            PipelineStage::Plan => write!(f, "plan"),
            PipelineStage::Code => write!(f, "code"),
            PipelineStage::Validate => write!(f, "validate"),
            PipelineStage::Synthesize => write!(f, "synthesize"),
        }
    }
}

/// Overall confidence (0-100) across stage analyses in pipeline order.
///
/// Exactly five analyses are weighted by stage importance; any other count
/// is a plain mean. A single stage below 30 caps the result at 50.
pub fn compute_final_confidence(stage_analyses: &[StageAnalysis]) -> f64 {
    if stage_analyses.is_empty() {
        return 0.0;
    }

    let stages = PipelineStage::all();
    let average = if stage_analyses.len() == stages.len() {
        let weight_sum: f64 = stages.iter().map(PipelineStage::weight).sum();
        stage_analyses
            .iter()
            .zip(stages)
            .map(|(a, stage)| a.confidence * stage.weight())
            .sum::<f64>()
            / weight_sum
    } else {
        stage_analyses.iter().map(|a| a.confidence).sum::<f64>() / stage_analyses.len() as f64
    };

    let catastrophic = stage_analyses
        .iter()
        .any(|a| a.confidence < CATASTROPHIC_STAGE_CONFIDENCE);

    let confidence = if catastrophic {
        average.min(CATASTROPHIC_CAP)
    } else {
        average
    };
    confidence.clamp(0.0, 100.0).round()
}

/// Map the security tooling report into the result record.
pub fn security_validation_from_report(report: SecurityReport) -> SecurityValidation {
    let issues = report
        .checks
        .iter()
        .filter(|c| !c.passed)
        .map(|c| format!("{}: {}", c.name, c.output))
        .collect();
    let details = report
        .checks
        .into_iter()
        .map(|c| SecurityCheckDetail {
            name: c.name,
            passed: c.passed,
            output: c.output,
        })
        .collect();

    SecurityValidation {
        passed: report.passed,
        issues,
        details,
    }
}

/// Inputs for [`build_final_result`]
#[derive(Debug, Clone)]
pub struct FinalResultInput {
    pub stage_analyses: BTreeMap<PipelineStage, StageAnalysis>,
    pub security_result: SecurityValidation,
    /// Output of the synthesize stage, if it ran
    pub synthesizer_output: Option<String>,
    pub all_agents: Vec<AgentInfo>,
}

/// Combine stage analyses and the security verdict into one final result.
pub fn build_final_result(input: FinalResultInput) -> FinalResult {
    let FinalResultInput {
        stage_analyses,
        security_result,
        synthesizer_output,
        all_agents,
    } = input;

    let final_output = synthesizer_output
        .filter(|s| !s.trim().is_empty())
        .or_else(|| {
            stage_analyses
                .get(&PipelineStage::Code)
                .map(|a| a.best_output.clone())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_default();

    let sources =
        dedupe_preserving_order(stage_analyses.values().flat_map(|a| a.sources.iter().cloned()));

    // A missing validate stage means no validation was requested.
    let validate_passed = stage_analyses
        .get(&PipelineStage::Validate)
        .map_or(true, |a| a.all_passed);

    let ordered: Vec<StageAnalysis> = stage_analyses.into_values().collect();

    FinalResult {
        final_output,
        confidence: compute_final_confidence(&ordered),
        agents: all_agents,
        sources,
        validation_passed: security_result.passed && validate_passed,
    }
}
