//! Persistence layer for run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteRunStore;

pub use crate::core::ExecutionStatus;
use crate::core::{EventKind, Job, JobState, Pipeline, TriggerEvent};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Final state of one job instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub job_id: String,
    /// e.g. `test (3.8)`
    pub label: String,
    /// State name (`succeeded`, `failed`, ...)
    pub state: String,
    /// Failure, skip or cancellation detail
    pub detail: Option<String>,
}

impl InstanceRecord {
    fn from_state(job: &Job, label: String, state: &JobState) -> Self {
        let detail = match state {
            JobState::Failed { error, .. } => Some(error.clone()),
            JobState::Skipped { reason } | JobState::Cancelled { reason } => Some(reason.clone()),
            _ => None,
        };
        Self {
            job_id: job.id.clone(),
            label,
            state: state.name().to_string(),
            detail,
        }
    }
}

/// Summary of one pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique run ID
    pub run_id: Uuid,

    /// Workflow name
    pub workflow_name: String,

    pub event: EventKind,

    /// Full ref name of the trigger
    pub git_ref: String,

    pub sha: Option<String>,

    /// Overall status
    pub status: ExecutionStatus,

    /// When the run started
    pub started_at: DateTime<Utc>,

    /// When the run finished (if it did)
    pub completed_at: Option<DateTime<Utc>>,

    /// Per-instance outcomes of both jobs
    pub instances: Vec<InstanceRecord>,

    /// State name of the release job
    pub release: String,
}

impl RunSummary {
    pub fn failed_instances(&self) -> impl Iterator<Item = &InstanceRecord> {
        self.instances.iter().filter(|i| i.state == "failed")
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        self.completed_at.map(|end| end - self.started_at)
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a run, replacing any previous record with the same ID
    async fn save_run(&self, run: &RunSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>>;

    /// Runs of a workflow, newest first
    async fn list_runs(&self, workflow_name: &str) -> Result<Vec<RunSummary>>;

    /// All workflow names with recorded runs
    async fn list_workflows(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    runs: tokio::sync::RwLock<std::collections::HashMap<Uuid, RunSummary>>,
    by_workflow: tokio::sync::RwLock<std::collections::HashMap<String, Vec<Uuid>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            runs: tokio::sync::RwLock::new(std::collections::HashMap::new()),
            by_workflow: tokio::sync::RwLock::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_run(&self, run: &RunSummary) -> Result<()> {
        let mut runs = self.runs.write().await;
        let replaced = runs.insert(run.run_id, run.clone()).is_some();

        if !replaced {
            let mut by_workflow = self.by_workflow.write().await;
            by_workflow
                .entry(run.workflow_name.clone())
                .or_default()
                .push(run.run_id);
        }

        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<Option<RunSummary>> {
        let runs = self.runs.read().await;
        Ok(runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, workflow_name: &str) -> Result<Vec<RunSummary>> {
        let runs = self.runs.read().await;
        let by_workflow = self.by_workflow.read().await;

        let mut result: Vec<RunSummary> = by_workflow
            .get(workflow_name)
            .map(|ids| ids.iter().filter_map(|id| runs.get(id).cloned()).collect())
            .unwrap_or_default();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(result)
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let by_workflow = self.by_workflow.read().await;
        let mut names: Vec<String> = by_workflow.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Create a summary from a pipeline after a run
pub fn create_summary(pipeline: &Pipeline, event: &TriggerEvent) -> RunSummary {
    let instances = [&pipeline.test, &pipeline.release]
        .into_iter()
        .flat_map(|job| {
            job.instances
                .iter()
                .map(move |i| InstanceRecord::from_state(job, i.label(), &i.state))
        })
        .collect();

    RunSummary {
        run_id: pipeline.state.run_id,
        workflow_name: pipeline.name.clone(),
        event: event.kind,
        git_ref: event.git_ref.as_str().to_string(),
        sha: event.sha.clone(),
        status: pipeline.state.status,
        started_at: pipeline.state.started_at.unwrap_or_else(Utc::now),
        completed_at: pipeline.state.completed_at,
        instances,
        release: pipeline.release.state.name().to_string(),
    }
}
