//! Main execution engine - orchestrates a pipeline run

use crate::{
    core::{
        EventKind, ExecutionStatus, GateDecision, Job, JobContext, JobState, Pipeline, StateError, StepKind,
        TriggerEvent,
    },
    execution::{
        executor::{InstancePlan, InstanceResult, JobExecutor},
        runner::{CommandRunner, OutputStream},
        scheduler::{MatrixScheduler, SchedulingStrategy},
        workspace::{resolve_revision, RevisionError},
    },
    release::Credential,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Where `{{ dist_dir }}` points for jobs without a build step
const DEFAULT_DIST_DIR: &str = "dist";

/// Events that can occur during pipeline execution
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    PipelineStarted {
        run_id: Uuid,
        pipeline_name: String,
        event: EventKind,
        git_ref: String,
    },
    /// The workflow does not react to this event; nothing runs
    NotTriggered {
        pipeline_name: String,
        event: EventKind,
    },
    JobStarted {
        job_id: String,
        name: String,
        instances: usize,
    },
    InstanceStarted {
        job_id: String,
        instance: String,
    },
    StepStarted {
        job_id: String,
        instance: String,
        step: String,
    },
    StepOutput {
        job_id: String,
        instance: String,
        step: String,
        stream: OutputStream,
        line: String,
    },
    StepFinished {
        job_id: String,
        instance: String,
        step: String,
        /// Unset when the step succeeded
        error: Option<String>,
    },
    InstanceFinished {
        job_id: String,
        instance: String,
        result: InstanceResult,
    },
    JobFinished {
        job_id: String,
        state: JobState,
    },
    ReleaseGated {
        job_id: String,
        decision: GateDecision,
    },
    PipelineFinished {
        run_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Snapshot of the registered handlers, cheap to clone into tasks
#[derive(Clone, Default)]
pub struct EventEmitter {
    handlers: Arc<Vec<EventHandler>>,
}

impl EventEmitter {
    pub fn new(handlers: Vec<EventHandler>) -> Self {
        Self {
            handlers: Arc::new(handlers),
        }
    }

    pub fn emit(&self, event: ExecutionEvent) {
        for handler in self.handlers.iter() {
            handler(event.clone());
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Pipeline '{0}' has already been executed")]
    AlreadyExecuted(String),

    #[error(transparent)]
    Revision(#[from] RevisionError),

    #[error(transparent)]
    State(#[from] StateError),
}

/// Main pipeline execution engine
pub struct ExecutionEngine<R> {
    executor: Arc<JobExecutor<R>>,
    scheduler: MatrixScheduler<R>,
    strategy: SchedulingStrategy,
    variables: HashMap<String, String>,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl<R: CommandRunner + 'static> ExecutionEngine<R> {
    pub fn new(runner: R, strategy: SchedulingStrategy) -> Self {
        Self::with_options(Arc::new(runner), strategy, CancellationToken::new(), false)
    }

    /// Engine sharing `cancel` with the caller; `keep_workspaces` leaves instance directories on disk
    pub fn with_options(
        runner: Arc<R>,
        strategy: SchedulingStrategy,
        cancel: CancellationToken,
        keep_workspaces: bool,
    ) -> Self {
        let executor = Arc::new(JobExecutor::new(runner, cancel).with_keep_workspaces(keep_workspaces));
        Self {
            scheduler: MatrixScheduler::new(executor.clone()),
            executor,
            strategy,
            variables: HashMap::new(),
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Variables that override the workflow's own
    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.executor.cancellation().clone()
    }

    /// Add an event handler
    pub async fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers.lock().await.push(Arc::new(handler));
    }

    async fn emitter(&self) -> EventEmitter {
        EventEmitter::new(self.event_handlers.lock().await.clone())
    }

    /// Execute the pipeline for one trigger event
    ///
    /// The test job fans out over its matrix; the release job runs only when
    /// every test instance succeeded and the ref passes the release gate.
    pub async fn execute(
        &self,
        pipeline: &mut Pipeline,
        event: &TriggerEvent,
        credential: Option<Credential>,
    ) -> Result<ExecutionStatus, EngineError> {
        if pipeline.state.status != ExecutionStatus::Pending {
            return Err(EngineError::AlreadyExecuted(pipeline.name.clone()));
        }

        let emitter = self.emitter().await;
        let run_id = pipeline.state.run_id;

        if !pipeline.accepts(event) {
            info!("Pipeline {} does not run on {} events", pipeline.name, event.kind);
            pipeline.test.skip_all("event not in triggers");
            pipeline.release.skip_all("event not in triggers");
            pipeline.state.finish(ExecutionStatus::NotTriggered);
            emitter.emit(ExecutionEvent::NotTriggered {
                pipeline_name: pipeline.name.clone(),
                event: event.kind,
            });
            emitter.emit(ExecutionEvent::PipelineFinished {
                run_id,
                status: ExecutionStatus::NotTriggered,
            });
            return Ok(ExecutionStatus::NotTriggered);
        }

        let repository = std::fs::canonicalize(&pipeline.repository).unwrap_or_else(|_| pipeline.repository.clone());
        // A fresh clone has no local branch for the ref, so pin the run to a sha up front
        let event = match &event.sha {
            Some(_) => event.clone(),
            None => {
                let sha = resolve_revision(self.executor.runner(), &repository, event.git_ref.as_str()).await?;
                event.clone().with_sha(sha)
            }
        };
        let event = &event;

        info!(
            "Starting pipeline execution: {} ({}) for {} {}",
            pipeline.name, run_id, event.kind, event.git_ref
        );
        pipeline.state.start();
        emitter.emit(ExecutionEvent::PipelineStarted {
            run_id,
            pipeline_name: pipeline.name.clone(),
            event: event.kind,
            git_ref: event.git_ref.as_str().to_string(),
        });

        let mut variables = pipeline.variables.clone();
        variables.extend(self.variables.clone());
        let base_context = JobContext::for_event(&variables, event);

        let request = RunRequest {
            repository,
            revision: event.revision().to_string(),
            interpreter: pipeline.interpreter.clone(),
            context: base_context,
        };

        self.run_job(&mut pipeline.test, &request, None, &emitter).await?;

        let cancelled = self.executor.cancellation().is_cancelled();
        if cancelled {
            warn!("Run cancelled, release job will not start");
            pipeline.release.cancel_all("cancelled");
            emitter.emit(ExecutionEvent::JobFinished {
                job_id: pipeline.release.id.clone(),
                state: pipeline.release.state.clone(),
            });
        } else {
            let decision = pipeline
                .gate
                .evaluate(event, &pipeline.test.id, &pipeline.test.state);
            emitter.emit(ExecutionEvent::ReleaseGated {
                job_id: pipeline.release.id.clone(),
                decision: decision.clone(),
            });

            match decision {
                GateDecision::Run => {
                    info!("Release gate open for {}", event.git_ref);
                    self.run_job(&mut pipeline.release, &request, credential, &emitter)
                        .await?;
                }
                GateDecision::Skip(reason) => {
                    info!("Skipping {}: {}", pipeline.release.name, reason);
                    pipeline.release.skip_all(&reason.to_string());
                    emitter.emit(ExecutionEvent::JobFinished {
                        job_id: pipeline.release.id.clone(),
                        state: pipeline.release.state.clone(),
                    });
                }
            }
        }

        let status = pipeline.overall_status();
        pipeline.state.finish(status);

        info!("Pipeline execution finished: {} - {:?}", pipeline.name, status);
        emitter.emit(ExecutionEvent::PipelineFinished { run_id, status });

        Ok(status)
    }

    /// Fan a job out, wait for every instance and reduce their states
    async fn run_job(
        &self,
        job: &mut Job,
        request: &RunRequest,
        credential: Option<Credential>,
        emitter: &EventEmitter,
    ) -> Result<(), EngineError> {
        job.state.start()?;
        emitter.emit(ExecutionEvent::JobStarted {
            job_id: job.id.clone(),
            name: job.name.clone(),
            instances: job.instances.len(),
        });

        let dist_dir = job
            .steps
            .iter()
            .find_map(|step| match &step.kind {
                StepKind::Build { dist_dir, .. } => Some(dist_dir.clone()),
                _ => None,
            })
            .unwrap_or_else(|| DEFAULT_DIST_DIR.to_string());

        let plans: Vec<InstancePlan> = job
            .instances
            .iter()
            .map(|i| {
                let version = i.instance.version.to_string();
                let mut context = request.context.clone();
                context.set_variable("job", job.id.as_str());
                context.set_variable("version", version.as_str());
                context.set_variable("python_version", version.as_str());
                context.set_variable("dist_dir", dist_dir.as_str());

                InstancePlan {
                    job_id: job.id.clone(),
                    role: job.role,
                    instance: i.instance.clone(),
                    steps: job.steps.clone(),
                    repository: request.repository.clone(),
                    revision: request.revision.clone(),
                    interpreter: request.interpreter.replace("{{ version }}", &version),
                    context,
                    credential: credential.clone(),
                }
            })
            .collect();

        let permits = self.strategy.permits(plans.len(), job.matrix.max_parallel);
        let reports = self
            .scheduler
            .run_job(plans, permits, Duration::from_secs(job.timeout_secs), emitter)
            .await;

        for report in &reports {
            match job.instance_mut(report.index) {
                Some(instance) => instance.state = report.to_state(),
                None => error!("Report for unknown instance {}", report.label),
            }
        }

        // Instances lost to a panicked task never reported back
        for instance in &mut job.instances {
            if !instance.state.is_terminal() {
                let _ = instance.state.start();
                instance.state.fail("instance task aborted")?;
            }
        }

        job.reduce();
        info!(
            "Job {} finished: {} ({} succeeded, {} failed of {})",
            job.id,
            job.state.name(),
            job.succeeded_count(),
            job.failed_count(),
            job.instances.len()
        );
        emitter.emit(ExecutionEvent::JobFinished {
            job_id: job.id.clone(),
            state: job.state.clone(),
        });

        Ok(())
    }
}

/// Inputs shared by every instance of a run
struct RunRequest {
    repository: PathBuf,
    revision: String,
    interpreter: String,
    context: JobContext,
}
