//! CLI command definitions

use crate::core::EventKind;
use crate::execution::SchedulingStrategy;
use clap::Args;

/// Run a workflow for one trigger event
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Event kind; detected from GITHUB_EVENT_NAME, else push
    #[arg(long, env = "GITHUB_EVENT_NAME", value_parser = parse_event_kind)]
    pub event: Option<EventKind>,

    /// Full ref name (refs/heads/..., refs/tags/...); detected from the repository when unset
    #[arg(long = "ref", env = "GITHUB_REF")]
    pub git_ref: Option<String>,

    /// Commit to check out; defaults to the ref
    #[arg(long, env = "GITHUB_SHA")]
    pub sha: Option<String>,

    /// Variable overrides (key=value)
    #[arg(long = "var", value_parser = parse_key_value)]
    pub variable: Vec<(String, String)>,

    /// Scheduling strategy for matrix instances
    #[arg(long, value_enum, default_value_t = SchedulingStrategyArg::Matrix)]
    pub strategy: SchedulingStrategyArg,

    /// Instance limit for the `limited` strategy
    #[arg(long, default_value_t = 2)]
    pub max_parallel: usize,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Leave instance workspaces on disk
    #[arg(long)]
    pub keep_workspaces: bool,
}

/// Validate a workflow configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show what a run would do for an event
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: String,

    #[arg(long, default_value = "push", value_parser = parse_event_kind)]
    pub event: EventKind,

    /// Full ref name
    #[arg(long = "ref")]
    pub git_ref: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// List workflows with recorded runs
#[derive(Debug, Args, Clone)]
pub struct ListCommand {
    /// Show run counts
    #[arg(long)]
    pub with_counts: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Show full details
    #[arg(long)]
    pub verbose: bool,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,

    /// Show a single run
    #[arg(long)]
    pub run_id: Option<String>,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    /// The workflow's `max_parallel`
    Matrix,
    Sequential,
    Parallel,
    Limited,
}

impl SchedulingStrategyArg {
    pub fn to_strategy(self, max_parallel: usize) -> SchedulingStrategy {
        match self {
            SchedulingStrategyArg::Matrix => SchedulingStrategy::MatrixLimit,
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::Limited => SchedulingStrategy::LimitedParallel(max_parallel),
        }
    }
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, '=').collect();
    if parts.len() != 2 || parts[0].is_empty() {
        return Err(format!("Invalid key=value pair: {}", s));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

pub fn parse_event_kind(s: &str) -> Result<EventKind, String> {
    s.parse()
}
