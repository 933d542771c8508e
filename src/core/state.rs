//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Overall pipeline execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Pipeline has not started
    Pending,
    /// Pipeline is currently running
    Running,
    /// Pipeline completed successfully
    Completed,
    /// Pipeline failed
    Failed,
    /// Pipeline was cancelled
    Cancelled,
    /// The event kind is not one the workflow reacts to
    NotTriggered,
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::NotTriggered)
    }
}

/// Rejected job state transition
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid job transition from {from} to {to}")]
pub struct StateError {
    pub from: &'static str,
    pub to: &'static str,
}

/// State of a job or of one matrix instance of a job
///
/// `Pending -> {Skipped | Running} -> {Succeeded | Failed}`. A pending or
/// running job may also be cancelled. Terminal states never change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Succeeded {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    Failed {
        error: String,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    Skipped {
        reason: String,
    },
    Cancelled {
        reason: String,
    },
}

impl JobState {
    pub fn name(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running { .. } => "running",
            JobState::Succeeded { .. } => "succeeded",
            JobState::Failed { .. } => "failed",
            JobState::Skipped { .. } => "skipped",
            JobState::Cancelled { .. } => "cancelled",
        }
    }

    /// Check if the job is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded { .. }
                | JobState::Failed { .. }
                | JobState::Skipped { .. }
                | JobState::Cancelled { .. }
        )
    }

    pub fn is_succeeded(&self) -> bool {
        matches!(self, JobState::Succeeded { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobState::Failed { .. })
    }

    fn reject(&self, to: &'static str) -> StateError {
        StateError { from: self.name(), to }
    }

    pub fn start(&mut self) -> Result<(), StateError> {
        match self {
            JobState::Pending => {
                *self = JobState::Running { started_at: Utc::now() };
                Ok(())
            }
            _ => Err(self.reject("running")),
        }
    }

    pub fn succeed(&mut self) -> Result<(), StateError> {
        match self {
            JobState::Running { started_at } => {
                *self = JobState::Succeeded {
                    started_at: *started_at,
                    completed_at: Utc::now(),
                };
                Ok(())
            }
            _ => Err(self.reject("succeeded")),
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), StateError> {
        match self {
            JobState::Running { started_at } => {
                *self = JobState::Failed {
                    error: error.into(),
                    started_at: *started_at,
                    failed_at: Utc::now(),
                };
                Ok(())
            }
            _ => Err(self.reject("failed")),
        }
    }

    pub fn skip(&mut self, reason: impl Into<String>) -> Result<(), StateError> {
        match self {
            JobState::Pending => {
                *self = JobState::Skipped { reason: reason.into() };
                Ok(())
            }
            _ => Err(self.reject("skipped")),
        }
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), StateError> {
        match self {
            JobState::Pending | JobState::Running { .. } => {
                *self = JobState::Cancelled { reason: reason.into() };
                Ok(())
            }
            _ => Err(self.reject("cancelled")),
        }
    }
}

/// AND-reduce the states of a job's matrix instances into the job's state
///
/// Any failure fails the job; otherwise any cancellation cancels it. Returns
/// `None` while some instance has not reached a terminal state.
pub fn reduce_instances<'a, I>(states: I) -> Option<JobState>
where
    I: IntoIterator<Item = &'a JobState>,
{
    let states: Vec<&JobState> = states.into_iter().collect();
    if states.iter().any(|s| !s.is_terminal()) {
        return None;
    }

    let started_at = states
        .iter()
        .filter_map(|s| match s {
            JobState::Succeeded { started_at, .. } | JobState::Failed { started_at, .. } => Some(*started_at),
            _ => None,
        })
        .min()
        .unwrap_or_else(Utc::now);
    let now = Utc::now();

    let failures: Vec<&str> = states
        .iter()
        .filter_map(|s| match s {
            JobState::Failed { error, .. } => Some(error.as_str()),
            _ => None,
        })
        .collect();
    if !failures.is_empty() {
        return Some(JobState::Failed {
            error: format!("{} of {} instances failed", failures.len(), states.len()),
            started_at,
            failed_at: now,
        });
    }

    if let Some(JobState::Cancelled { reason }) = states.iter().find(|s| matches!(s, JobState::Cancelled { .. })) {
        return Some(JobState::Cancelled { reason: reason.clone() });
    }

    Some(JobState::Succeeded {
        started_at,
        completed_at: now,
    })
}

/// Overall pipeline state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    /// Unique run ID
    pub run_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution finished
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineState {
    /// Create a new pipeline state
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
        }
    }

    /// Mark pipeline as started
    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record the final status
    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new()
    }
}
