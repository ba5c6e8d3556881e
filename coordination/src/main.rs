//! Swarm coordination command-line tool
//!
//! Offline access to the consensus engine and the persisted job log.
//!
//! # Usage
//!
//! ```bash
//! # Score one stage's agent outputs (JSON array of {agent_id, output, exit_code})
//! swarm-coordination analyze --input outputs.json --threshold 75
//!
//! # Final confidence over stage analyses in pipeline order
//! swarm-coordination confidence --input analyses.json
//!
//! # Inspect the job log
//! SWARM_STATE_PATH=./state/jobs.jsonl swarm-coordination jobs --status dead-letter
//! ```

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

use swarm_coordination::config::CoordinationConfig;
use swarm_coordination::consensus::{
    analyze_stage_outputs, compute_final_confidence, should_rerun_validation,
};
use swarm_coordination::state::{
    AgentOutput, FileJobStore, Job, JobStatus, JobStore, StageAnalysis,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (environment variables override it)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Analyze agent outputs for one stage
    Analyze {
        /// JSON file with agent outputs; `-` reads stdin
        #[arg(long)]
        input: PathBuf,

        /// Confidence threshold (defaults to the configured threshold)
        #[arg(long)]
        threshold: Option<f64>,
    },

    /// Compute final confidence from stage analyses
    Confidence {
        /// JSON file with stage analyses; `-` reads stdin
        #[arg(long)]
        input: PathBuf,
    },

    /// List persisted jobs
    Jobs {
        /// Job log (defaults to the configured state path)
        #[arg(long)]
        state_path: Option<PathBuf>,

        /// Only show jobs with this status
        #[arg(long)]
        status: Option<String>,

        /// Rewrite the log keeping only the latest snapshot per job
        #[arg(long, default_value_t = false)]
        compact: bool,
    },
}

#[derive(Serialize)]
struct AnalyzeReport {
    #[serde(flatten)]
    analysis: StageAnalysis,
    should_rerun: bool,
}

#[derive(Serialize)]
struct JobsReport {
    total: usize,
    dead_letter_count: usize,
    jobs: Vec<Job>,
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

fn parse_status(raw: &str) -> Result<JobStatus> {
    serde_json::from_value(serde_json::Value::String(raw.to_string()))
        .with_context(|| format!("Unknown job status: {}", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = CoordinationConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;

    match args.command {
        Command::Analyze { input, threshold } => {
            let outputs: Vec<AgentOutput> = serde_json::from_str(&read_input(&input)?)
                .context("Expected a JSON array of agent outputs")?;
            let threshold = threshold.unwrap_or(config.consensus.threshold);

            let analysis = analyze_stage_outputs(&outputs, threshold);
            let should_rerun = should_rerun_validation(&analysis, threshold);
            info!(
                outputs = outputs.len(),
                confidence = analysis.confidence,
                should_rerun,
                "Stage analyzed"
            );
            let report = AnalyzeReport {
                analysis,
                should_rerun,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Confidence { input } => {
            let analyses: Vec<StageAnalysis> = serde_json::from_str(&read_input(&input)?)
                .context("Expected a JSON array of stage analyses")?;
            let confidence = compute_final_confidence(&analyses);
            println!("{}", serde_json::json!({ "stages": analyses.len(), "confidence": confidence }));
        }
        Command::Jobs {
            state_path,
            status,
            compact,
        } => {
            let path = state_path.unwrap_or(config.state_path);
            let store = FileJobStore::open(&path)
                .with_context(|| format!("Failed to open job log {}", path.display()))?;
            if compact {
                let kept = store.compact()?;
                info!(kept, path = %path.display(), "Compacted job log");
            }

            let filter = status.as_deref().map(parse_status).transpose()?;
            let jobs = store.load_jobs()?;
            let dead_letter_count = jobs
                .iter()
                .filter(|j| j.status == JobStatus::DeadLetter)
                .count();
            let total = jobs.len();
            let jobs = jobs
                .into_iter()
                .filter(|j| filter.map_or(true, |s| j.status == s))
                .collect();

            let report = JobsReport {
                total,
                dead_letter_count,
                jobs,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
