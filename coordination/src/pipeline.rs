//! Pipeline runner interface and the staged multi-agent runner
//!
//! The queue hands each admitted job to a [`PipelineRunner`] together with a
//! [`JobContext`]. [`StagePipeline`] is the full runner: it drives the agent
//! stages through a [`StageExecutor`] (the process layer that spawns agent
//! CLIs), scores each stage with the [`ConsensusEngine`], re-runs stages the
//! agents could not agree on, and assembles the final result.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConsensusConfig;
use crate::consensus::{
    build_final_result, should_rerun_validation, AnalysisOptions, ConsensusEngine,
    ConsensusError, FinalResultInput, PipelineStage,
};
use crate::events::{EventBus, QueueEvent, SharedEventBus};
use crate::state::{
    is_signal_kill, AgentInfo, AgentOutput, AgentStatus, FinalResult, Job, JobId, JobMode,
    SecurityValidation, SessionId, StageAnalysis,
};

/// Errors a pipeline run can end with
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Every agent of a stage was killed by timeout or signal; never retried
    #[error("All agents in {stage} stage were killed (exit codes {exit_codes:?})")]
    SignalKill { stage: String, exit_codes: Vec<i32> },

    #[error("Job cancelled")]
    Cancelled,

    #[error("Consensus failed: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("Execution failed: {0}")]
    Execution(String),
}

impl PipelineError {
    /// Whether the queue may schedule another attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(self, PipelineError::SignalKill { .. })
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Receives stage progress for a running job
pub trait ProgressSink: Send + Sync {
    fn update_progress(&self, job_id: &str, stage: &str, progress: u8);
}

/// Handle a runner uses to report progress and observe cancellation
#[derive(Clone)]
pub struct JobContext {
    job_id: JobId,
    session_id: SessionId,
    events: SharedEventBus,
    progress: Option<Arc<dyn ProgressSink>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("session_id", &self.session_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl JobContext {
    pub fn new(job: &Job, events: SharedEventBus, cancel: CancellationToken) -> Self {
        Self {
            job_id: job.id.clone(),
            session_id: job.session_id.clone(),
            events,
            progress: None,
            cancel,
        }
    }

    /// Context that is not attached to a queue (tools, tests)
    pub fn detached(job: &Job) -> Self {
        Self::new(job, EventBus::new().shared(), CancellationToken::new())
    }

    pub(crate) fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record the current stage and progress (0-100).
    ///
    /// Ignored once the job is no longer running.
    pub fn report_stage(&self, stage: &str, progress: u8) {
        match &self.progress {
            Some(sink) => sink.update_progress(&self.job_id, stage, progress.min(100)),
            None => debug!(job_id = %self.job_id, stage, progress, "Stage progress"),
        }
    }

    /// Stream agent output text to subscribers
    pub fn agent_output(&self, agent_id: &str, text: &str) {
        self.events.publish(QueueEvent::AgentOutput {
            job_id: self.job_id.clone(),
            session_id: self.session_id.clone(),
            agent_id: agent_id.to_string(),
            text: text.to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn agent_status(&self, agent_id: &str, status: AgentStatus, exit_code: Option<i32>) {
        self.events.publish(QueueEvent::AgentStatus {
            job_id: self.job_id.clone(),
            session_id: self.session_id.clone(),
            agent_id: agent_id.to_string(),
            status,
            exit_code,
            timestamp: Utc::now(),
        });
    }

    /// Token fired when the job is cancelled. Runners should check it at
    /// safe points; nothing is interrupted forcibly.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Executes a job end to end
#[async_trait]
pub trait PipelineRunner: Send + Sync {
    async fn run(&self, job: Job, ctx: JobContext) -> PipelineResult<FinalResult>;
}

/// One stage attempt handed to the process layer
#[derive(Debug, Clone, Copy)]
pub struct StageRequest<'a> {
    pub job: &'a Job,
    pub stage: PipelineStage,
    /// 1-based attempt number for this stage
    pub attempt: u32,
    /// Analyses of the stages that already finished
    pub previous: &'a BTreeMap<PipelineStage, StageAnalysis>,
}

/// Process layer: runs every agent of one stage and returns their outputs
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn run_stage(
        &self,
        request: StageRequest<'_>,
        ctx: &JobContext,
    ) -> anyhow::Result<Vec<AgentOutput>>;
}

/// Runner that drives the agent stages and reconciles their outputs
#[derive(Clone)]
pub struct StagePipeline {
    executor: Arc<dyn StageExecutor>,
    engine: ConsensusEngine,
    options: AnalysisOptions,
    max_stage_attempts: u32,
    project_root: Option<PathBuf>,
}

impl StagePipeline {
    pub fn new(executor: Arc<dyn StageExecutor>, engine: ConsensusEngine) -> Self {
        let options = engine.default_options();
        let max_stage_attempts = engine.config().max_stage_attempts.max(1);
        Self {
            executor,
            engine,
            options,
            max_stage_attempts,
            project_root: None,
        }
    }

    pub fn from_config(executor: Arc<dyn StageExecutor>, config: &ConsensusConfig) -> Self {
        Self::new(executor, ConsensusEngine::new(config.clone()))
    }

    pub fn with_options(mut self, options: AnalysisOptions) -> Self {
        self.options = options;
        self
    }

    /// Project checkout scanned by security validation in project mode
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    /// Stages run for a job mode, in order
    pub fn stages_for(mode: JobMode) -> &'static [PipelineStage] {
        match mode {
            JobMode::Chat => &[PipelineStage::Synthesize],
            JobMode::Swarm | JobMode::Project => PipelineStage::all(),
        }
    }

    async fn run_stage(
        &self,
        job: &Job,
        stage: PipelineStage,
        previous: &BTreeMap<PipelineStage, StageAnalysis>,
        ctx: &JobContext,
        roster: &mut Vec<AgentInfo>,
    ) -> PipelineResult<StageAnalysis> {
        let stage_name = stage.to_string();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let request = StageRequest {
                job,
                stage,
                attempt,
                previous,
            };
            let outputs = self
                .executor
                .run_stage(request, ctx)
                .await
                .map_err(|e| PipelineError::Execution(format!("{} stage: {:#}", stage, e)))?;

            roster.retain(|agent| agent.stage != stage_name);
            roster.extend(outputs.iter().map(|o| AgentInfo {
                agent_id: o.agent_id.clone(),
                stage: stage_name.clone(),
                status: if o.succeeded() {
                    AgentStatus::Completed
                } else {
                    AgentStatus::Failed
                },
                exit_code: Some(o.exit_code),
            }));

            if !outputs.is_empty() && outputs.iter().all(|o| is_signal_kill(o.exit_code)) {
                return Err(PipelineError::SignalKill {
                    stage: stage_name,
                    exit_codes: outputs.iter().map(|o| o.exit_code).collect(),
                });
            }

            let analysis = self
                .engine
                .analyze_stage_outputs_with_options(&outputs, &self.options)
                .await?;

            if !should_rerun_validation(&analysis, self.options.threshold) {
                debug!(job_id = %job.id, stage = %stage, attempt, confidence = analysis.confidence, "Stage accepted");
                return Ok(analysis);
            }
            if attempt >= self.max_stage_attempts {
                warn!(
                    job_id = %job.id,
                    stage = %stage,
                    attempts = attempt,
                    confidence = analysis.confidence,
                    pass_rate = analysis.pass_rate,
                    "Accepting low-confidence stage after final attempt"
                );
                return Ok(analysis);
            }
            if ctx.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            info!(
                job_id = %job.id,
                stage = %stage,
                attempt,
                confidence = analysis.confidence,
                pass_rate = analysis.pass_rate,
                "Agents disagree, re-running stage"
            );
        }
    }
}

#[async_trait]
impl PipelineRunner for StagePipeline {
    async fn run(&self, job: Job, ctx: JobContext) -> PipelineResult<FinalResult> {
        let stages = Self::stages_for(job.mode);
        let mut analyses: BTreeMap<PipelineStage, StageAnalysis> = BTreeMap::new();
        let mut roster: Vec<AgentInfo> = Vec::new();
        // Progress is split evenly, leaving the last step for assembly
        let step = 100 / (stages.len() + 1);

        for (idx, stage) in stages.iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            ctx.report_stage(&stage.to_string(), (idx * step) as u8);

            let analysis = self
                .run_stage(&job, *stage, &analyses, &ctx, &mut roster)
                .await?;
            analyses.insert(*stage, analysis);
        }

        if ctx.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        let security_result = match (&self.project_root, job.mode) {
            (Some(root), JobMode::Project) if self.engine.has_security_checker() => {
                ctx.report_stage("security", (stages.len() * step) as u8);
                self.engine.run_security_validation(root).await
            }
            _ => SecurityValidation::skipped(),
        };

        let synthesizer_output = analyses
            .get(&PipelineStage::Synthesize)
            .map(|a| a.best_output.clone());

        let result = build_final_result(FinalResultInput {
            stage_analyses: analyses,
            security_result,
            synthesizer_output,
            all_agents: roster,
        });
        info!(
            job_id = %job.id,
            confidence = result.confidence,
            validation_passed = result.validation_passed,
            "Pipeline finished"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Priority;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn job(mode: JobMode) -> Job {
        Job::new(
            "s1".to_string(),
            "add a retry queue".to_string(),
            mode,
            Priority::Normal,
            2,
            "h".to_string(),
        )
    }

    /// Agents agree on every stage
    struct Agreeing;

    #[async_trait]
    impl StageExecutor for Agreeing {
        async fn run_stage(
            &self,
            request: StageRequest<'_>,
            ctx: &JobContext,
        ) -> anyhow::Result<Vec<AgentOutput>> {
            let text = format!("{} result for src/lib.rs", request.stage);
            ctx.agent_output("a", &text);
            Ok(vec![
                AgentOutput::new("a", text.clone(), 0),
                AgentOutput::new("b", text, 0),
            ])
        }
    }

    /// Disagrees on the first plan attempt only
    struct FlakyPlan {
        plan_attempts: AtomicU32,
    }

    #[async_trait]
    impl StageExecutor for FlakyPlan {
        async fn run_stage(
            &self,
            request: StageRequest<'_>,
            _ctx: &JobContext,
        ) -> anyhow::Result<Vec<AgentOutput>> {
            if request.stage == PipelineStage::Plan {
                self.plan_attempts.fetch_add(1, Ordering::SeqCst);
                if request.attempt == 1 {
                    return Ok(vec![
                        AgentOutput::new("a", "alpha beta", 0),
                        AgentOutput::new("b", "gamma delta", 0),
                    ]);
                }
            }
            Ok(vec![
                AgentOutput::new("a", "same plan", 0),
                AgentOutput::new("b", "same plan", 0),
            ])
        }
    }

    struct Killed;

    #[async_trait]
    impl StageExecutor for Killed {
        async fn run_stage(
            &self,
            _request: StageRequest<'_>,
            _ctx: &JobContext,
        ) -> anyhow::Result<Vec<AgentOutput>> {
            Ok(vec![
                AgentOutput::new("a", "", 124),
                AgentOutput::new("b", "", 137),
            ])
        }
    }

    struct Recording {
        progress: Mutex<Vec<(String, u8)>>,
    }

    impl ProgressSink for Recording {
        fn update_progress(&self, _job_id: &str, stage: &str, progress: u8) {
            self.progress
                .lock()
                .unwrap()
                .push((stage.to_string(), progress));
        }
    }

    #[tokio::test]
    async fn test_full_pipeline() {
        let pipeline = StagePipeline::new(Arc::new(Agreeing), ConsensusEngine::default());
        let job = job(JobMode::Swarm);
        let sink = Arc::new(Recording {
            progress: Mutex::new(Vec::new()),
        });
        let ctx = JobContext::detached(&job).with_progress_sink(sink.clone());

        let result = pipeline.run(job, ctx).await.unwrap();
        assert_eq!(result.final_output, "synthesize result for src/lib.rs");
        assert!((result.confidence - 100.0).abs() < f64::EPSILON);
        assert!(result.validation_passed);
        assert_eq!(result.agents.len(), 10);
        assert_eq!(result.sources, vec!["src/lib.rs".to_string()]);

        let stages: Vec<String> = sink
            .progress
            .lock()
            .unwrap()
            .iter()
            .map(|(s, _)| s.clone())
            .collect();
        assert_eq!(stages, vec!["research", "plan", "code", "validate", "synthesize"]);
    }

    #[tokio::test]
    async fn test_chat_runs_single_stage() {
        let pipeline = StagePipeline::new(Arc::new(Agreeing), ConsensusEngine::default());
        let job = job(JobMode::Chat);
        let ctx = JobContext::detached(&job);
        let result = pipeline.run(job, ctx).await.unwrap();
        assert_eq!(result.agents.len(), 2);
        assert!(result.agents.iter().all(|a| a.stage == "synthesize"));
    }

    #[tokio::test]
    async fn test_stage_rerun_on_disagreement() {
        let executor = Arc::new(FlakyPlan {
            plan_attempts: AtomicU32::new(0),
        });
        let pipeline = StagePipeline::new(executor.clone(), ConsensusEngine::default());
        let job = job(JobMode::Swarm);
        let ctx = JobContext::detached(&job);
        let result = pipeline.run(job, ctx).await.unwrap();

        assert_eq!(executor.plan_attempts.load(Ordering::SeqCst), 2);
        // Roster holds only the final attempt of the plan stage
        assert_eq!(result.agents.iter().filter(|a| a.stage == "plan").count(), 2);
        assert!((result.confidence - 100.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_signal_kill_is_terminal() {
        let pipeline = StagePipeline::new(Arc::new(Killed), ConsensusEngine::default());
        let job = job(JobMode::Swarm);
        let ctx = JobContext::detached(&job);
        let err = pipeline.run(job, ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::SignalKill { .. }));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let pipeline = StagePipeline::new(Arc::new(Agreeing), ConsensusEngine::default());
        let job = job(JobMode::Swarm);
        let ctx = JobContext::detached(&job);
        ctx.cancellation().cancel();
        let err = pipeline.run(job, ctx).await.unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(err.is_retryable());
    }
}
