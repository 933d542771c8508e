//! Matrix scheduler - fans a job out over its instances

use crate::{
    core::JobState,
    execution::{
        engine::{EventEmitter, ExecutionEvent},
        executor::{FailureKind, InstancePlan, InstanceResult, JobExecutor},
        runner::CommandRunner,
    },
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

/// Strategy for running the instances of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One instance at a time
    Sequential,

    /// Every instance at once
    Parallel,

    /// At most N instances at once
    LimitedParallel(usize),

    /// The job's own `max_parallel`
    #[default]
    MatrixLimit,
}

impl SchedulingStrategy {
    /// Concurrency permits for a job with `instances` instances
    pub fn permits(&self, instances: usize, max_parallel: usize) -> usize {
        let permits = match self {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => instances,
            SchedulingStrategy::LimitedParallel(max) => *max,
            SchedulingStrategy::MatrixLimit => max_parallel,
        };
        permits.clamp(1, instances.max(1))
    }
}

/// What happened to one instance
#[derive(Debug, Clone)]
pub struct InstanceReport {
    /// Position in the job's matrix
    pub index: usize,
    pub label: String,
    /// Unset when the instance never started
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: DateTime<Utc>,
    pub result: InstanceResult,
}

impl InstanceReport {
    /// Terminal state for the instance
    pub fn to_state(&self) -> JobState {
        let started_at = self.started_at.unwrap_or(self.finished_at);
        match &self.result {
            InstanceResult::Succeeded => JobState::Succeeded {
                started_at,
                completed_at: self.finished_at,
            },
            InstanceResult::Failed { .. } => JobState::Failed {
                error: self.result.describe(),
                started_at,
                failed_at: self.finished_at,
            },
            InstanceResult::Cancelled { reason } => JobState::Cancelled { reason: reason.clone() },
        }
    }
}

/// Runs all instances of a job under a concurrency cap
///
/// Instances are independent: a failing instance never stops its siblings.
/// The returned reports are ordered by matrix index.
pub struct MatrixScheduler<R> {
    executor: Arc<JobExecutor<R>>,
}

impl<R: CommandRunner + 'static> MatrixScheduler<R> {
    pub fn new(executor: Arc<JobExecutor<R>>) -> Self {
        Self { executor }
    }

    pub async fn run_job(
        &self,
        plans: Vec<InstancePlan>,
        permits: usize,
        job_timeout: Duration,
        emitter: &EventEmitter,
    ) -> Vec<InstanceReport> {
        let total = plans.len();
        info!("Scheduling {} instances with {} permits", total, permits);

        let semaphore = Arc::new(Semaphore::new(permits.max(1)));
        let mut tasks = JoinSet::new();

        for plan in plans {
            let semaphore = semaphore.clone();
            let executor = self.executor.clone();
            let emitter = emitter.clone();

            tasks.spawn(async move {
                let index = plan.instance.index;
                let label = plan.label();
                let cancel = executor.cancellation().clone();

                let permit = tokio::select! {
                    _ = cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                let Some(_permit) = permit else {
                    debug!("{} cancelled before it started", label);
                    return InstanceReport {
                        index,
                        label,
                        started_at: None,
                        finished_at: Utc::now(),
                        result: InstanceResult::Cancelled {
                            reason: "cancelled".to_string(),
                        },
                    };
                };

                let started_at = Utc::now();
                emitter.emit(ExecutionEvent::InstanceStarted {
                    job_id: plan.job_id.clone(),
                    instance: label.clone(),
                });

                let result = match timeout(job_timeout, executor.execute(&plan, &emitter)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("{} exceeded the job timeout of {}s", label, job_timeout.as_secs());
                        InstanceResult::Failed {
                            step: "job".to_string(),
                            kind: FailureKind::Timeout,
                            error: format!("exceeded the job timeout of {}s", job_timeout.as_secs()),
                        }
                    }
                };

                emitter.emit(ExecutionEvent::InstanceFinished {
                    job_id: plan.job_id.clone(),
                    instance: label.clone(),
                    result: result.clone(),
                });

                InstanceReport {
                    index,
                    label,
                    started_at: Some(started_at),
                    finished_at: Utc::now(),
                    result,
                }
            });
        }

        let mut reports = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => error!("Instance task failed: {}", e),
            }
        }

        reports.sort_by_key(|r| r.index);
        reports
    }
}
