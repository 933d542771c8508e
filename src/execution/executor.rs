//! Job executor - runs the steps of one job instance

use crate::{
    core::{JobContext, JobRole, MatrixInstance, Step, StepKind},
    execution::{
        engine::{EventEmitter, ExecutionEvent},
        runner::{CommandOutput, CommandRunner, CommandSpec, OutputSink, OutputStream, RunnerError},
        workspace::InstanceWorkspace,
    },
    release::{classify_upload, ArtifactSet, Credential, PublishOutcome, Publisher},
};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why an instance failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A test command exited non-zero
    Test,
    /// Checkout, interpreter setup, tool install or cleaning failed
    Provisioning,
    Build,
    Publish,
    /// A step or the whole instance exceeded its timeout
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Test => "test failure",
            FailureKind::Provisioning => "provisioning failure",
            FailureKind::Build => "build failure",
            FailureKind::Publish => "publish failure",
            FailureKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Outcome of one job instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceResult {
    Succeeded,
    Failed {
        step: String,
        kind: FailureKind,
        error: String,
    },
    Cancelled {
        reason: String,
    },
}

impl InstanceResult {
    pub fn is_success(&self) -> bool {
        matches!(self, InstanceResult::Succeeded)
    }

    /// One-line description used for the instance's failed state
    pub fn describe(&self) -> String {
        match self {
            InstanceResult::Succeeded => "succeeded".to_string(),
            InstanceResult::Failed { step, kind, error } => format!("{} ({}): {}", step, kind, error),
            InstanceResult::Cancelled { reason } => format!("cancelled: {}", reason),
        }
    }
}

/// Everything one instance needs, owned so it can move into a task
#[derive(Debug, Clone)]
pub struct InstancePlan {
    pub job_id: String,
    pub role: JobRole,
    pub instance: MatrixInstance,
    pub steps: Vec<Step>,
    /// Repository to clone
    pub repository: PathBuf,
    /// Revision to check out
    pub revision: String,
    /// Interpreter command that creates the environment
    pub interpreter: String,
    pub context: JobContext,
    pub credential: Option<Credential>,
}

impl InstancePlan {
    pub fn label(&self) -> String {
        self.instance.label()
    }
}

enum StepError {
    Failed(FailureKind, String),
    Cancelled,
}

/// Mutable state threaded through the steps of one instance
struct InstanceRun<'a> {
    plan: &'a InstancePlan,
    workspace: InstanceWorkspace,
    context: JobContext,
    artifacts: Option<ArtifactSet>,
}

impl InstanceRun<'_> {
    fn python(&self) -> String {
        self.workspace.python().to_string_lossy().into_owned()
    }

    /// Shell command in the checkout with the environment's scripts first on PATH
    fn shell(&self, command: &str) -> CommandSpec {
        let bin = self.workspace.python().parent().map(Path::to_path_buf).unwrap_or_default();
        let mut paths = vec![bin];
        if let Some(existing) = std::env::var_os("PATH") {
            paths.extend(std::env::split_paths(&existing));
        }

        let mut spec = CommandSpec::shell(command)
            .cwd(self.workspace.src_dir())
            .env("VIRTUAL_ENV", self.workspace.venv_dir().to_string_lossy());
        if let Ok(joined) = std::env::join_paths(paths) {
            spec = spec.env("PATH", joined.to_string_lossy());
        }
        spec
    }
}

/// Forwards subprocess lines to event handlers
struct StepOutputForwarder<'a> {
    emitter: &'a EventEmitter,
    job_id: &'a str,
    instance: &'a str,
    step: &'a str,
}

impl OutputSink for StepOutputForwarder<'_> {
    fn on_line(&self, stream: OutputStream, line: &str) {
        self.emitter.emit(ExecutionEvent::StepOutput {
            job_id: self.job_id.to_string(),
            instance: self.instance.to_string(),
            step: self.step.to_string(),
            stream,
            line: line.to_string(),
        });
    }
}

/// Executes job instances with a command runner
pub struct JobExecutor<R> {
    runner: Arc<R>,
    cancel: CancellationToken,
    keep_workspaces: bool,
}

impl<R: CommandRunner> JobExecutor<R> {
    pub fn new(runner: Arc<R>, cancel: CancellationToken) -> Self {
        Self {
            runner,
            cancel,
            keep_workspaces: false,
        }
    }

    pub fn with_keep_workspaces(mut self, keep: bool) -> Self {
        self.keep_workspaces = keep;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Run every step of an instance in order, stopping at the first failure
    pub async fn execute(&self, plan: &InstancePlan, emitter: &EventEmitter) -> InstanceResult {
        let label = plan.label();
        info!("Executing {}", label);

        let workspace = match InstanceWorkspace::create(&label, self.keep_workspaces) {
            Ok(workspace) => workspace,
            Err(e) => {
                error!("Could not create workspace for {}: {}", label, e);
                return InstanceResult::Failed {
                    step: "Create workspace".to_string(),
                    kind: FailureKind::Provisioning,
                    error: e.to_string(),
                };
            }
        };

        let mut context = plan.context.clone();
        context.instance = Some(label.clone());
        context.set_path("workspace", workspace.root());
        context.set_path("src", &workspace.src_dir());
        context.set_path("python", &workspace.python());

        let mut run = InstanceRun {
            plan,
            workspace,
            context,
            artifacts: None,
        };

        for step in &plan.steps {
            if self.cancel.is_cancelled() {
                return InstanceResult::Cancelled {
                    reason: "cancelled".to_string(),
                };
            }

            emitter.emit(ExecutionEvent::StepStarted {
                job_id: plan.job_id.clone(),
                instance: label.clone(),
                step: step.name.clone(),
            });

            let sink = StepOutputForwarder {
                emitter,
                job_id: &plan.job_id,
                instance: &label,
                step: &step.name,
            };

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => Err(StepError::Cancelled),
                result = timeout(Duration::from_secs(step.timeout_secs), self.run_step(step, &mut run, &sink)) => {
                    match result {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            error!("Timeout for step '{}' of {} after {}s", step.name, label, step.timeout_secs);
                            Err(StepError::Failed(
                                FailureKind::Timeout,
                                format!("Timeout after {} seconds", step.timeout_secs),
                            ))
                        }
                    }
                }
            };

            let error = match &outcome {
                Ok(()) => None,
                Err(StepError::Failed(_, message)) => Some(message.clone()),
                Err(StepError::Cancelled) => Some("cancelled".to_string()),
            };
            emitter.emit(ExecutionEvent::StepFinished {
                job_id: plan.job_id.clone(),
                instance: label.clone(),
                step: step.name.clone(),
                error,
            });

            match outcome {
                Ok(()) => debug!("Step '{}' of {} succeeded", step.name, label),
                Err(StepError::Cancelled) => {
                    warn!("{} cancelled during '{}'", label, step.name);
                    return InstanceResult::Cancelled {
                        reason: "cancelled".to_string(),
                    };
                }
                Err(StepError::Failed(kind, error)) => {
                    warn!("{} failed at '{}': {}", label, step.name, error);
                    return InstanceResult::Failed {
                        step: step.name.clone(),
                        kind,
                        error,
                    };
                }
            }
        }

        info!("{} succeeded", label);
        InstanceResult::Succeeded
    }

    async fn run_step(&self, step: &Step, run: &mut InstanceRun<'_>, sink: &dyn OutputSink) -> Result<(), StepError> {
        match &step.kind {
            StepKind::Checkout => {
                let commands = run
                    .workspace
                    .checkout_commands(&run.plan.repository, &run.plan.revision);
                for spec in commands {
                    self.run_checked(&spec, sink, FailureKind::Provisioning).await?;
                }
                Ok(())
            }
            StepKind::SetupInterpreter => {
                let spec = run.workspace.venv_command(&run.plan.interpreter);
                self.run_checked(&spec, sink, FailureKind::Provisioning).await?;
                Ok(())
            }
            StepKind::Run { command } => {
                let kind = match run.plan.role {
                    JobRole::Test => FailureKind::Test,
                    JobRole::Release => FailureKind::Build,
                };
                let spec = run.shell(&run.context.render(command));
                self.run_checked(&spec, sink, kind).await?;
                Ok(())
            }
            StepKind::Setup { command } => {
                let spec = run.shell(&run.context.render(command));
                self.run_checked(&spec, sink, FailureKind::Provisioning).await?;
                Ok(())
            }
            StepKind::InstallTools { packages } => {
                if packages.is_empty() {
                    return Ok(());
                }
                let spec = CommandSpec::new(run.python())
                    .args(["-m", "pip", "install", "--upgrade"])
                    .args(packages.iter().cloned())
                    .cwd(run.workspace.src_dir());
                self.run_checked(&spec, sink, FailureKind::Provisioning).await?;
                Ok(())
            }
            StepKind::CleanWorkspace => {
                let spec = run.workspace.clean_command();
                self.run_checked(&spec, sink, FailureKind::Provisioning).await?;
                Ok(())
            }
            StepKind::Build { command, dist_dir } => {
                run.context.set_variable("dist_dir", dist_dir.as_str());
                let spec = run.shell(&run.context.render(command));
                self.run_checked(&spec, sink, FailureKind::Build).await?;

                let output_dir = run.workspace.src_dir().join(dist_dir);
                let artifacts = ArtifactSet::collect(&output_dir).map_err(|e| {
                    StepError::Failed(
                        FailureKind::Build,
                        format!("Cannot read build output {}: {}", output_dir.display(), e),
                    )
                })?;
                artifacts
                    .verify_complete()
                    .map_err(|e| StepError::Failed(FailureKind::Build, e))?;

                info!(
                    "Built {}",
                    artifacts
                        .artifacts
                        .iter()
                        .map(|a| a.file_name())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                run.artifacts = Some(artifacts);
                Ok(())
            }
            StepKind::Publish(settings) => {
                let artifacts = run.artifacts.clone().unwrap_or_default();
                let spec = Publisher::new(settings)
                    .upload_command(
                        &run.python(),
                        &artifacts,
                        run.plan.credential.as_ref(),
                        &run.workspace.src_dir(),
                    )
                    .map_err(|e| StepError::Failed(FailureKind::Publish, e.to_string()))?;

                let output = self.run_command(&spec, sink, FailureKind::Publish).await?;
                match classify_upload(&output, settings.skip_existing) {
                    Ok(PublishOutcome::Published) => {
                        info!("Published {} artifacts", artifacts.len());
                        Ok(())
                    }
                    Ok(PublishOutcome::AlreadyPublished) => {
                        info!("Artifacts already on the index, skipped");
                        Ok(())
                    }
                    Err(e) => Err(StepError::Failed(FailureKind::Publish, e.to_string())),
                }
            }
        }
    }

    async fn run_command(
        &self,
        spec: &CommandSpec,
        sink: &dyn OutputSink,
        kind: FailureKind,
    ) -> Result<CommandOutput, StepError> {
        debug!("Running: {}", spec.display());
        self.runner.run(spec, Some(sink)).await.map_err(|e| match e {
            RunnerError::Cancelled => StepError::Cancelled,
            RunnerError::Timeout(secs) => {
                StepError::Failed(FailureKind::Timeout, format!("Timeout after {} seconds", secs))
            }
            other => StepError::Failed(kind, other.to_string()),
        })
    }

    /// Run a command and treat a non-zero exit as a failure of `kind`
    async fn run_checked(
        &self,
        spec: &CommandSpec,
        sink: &dyn OutputSink,
        kind: FailureKind,
    ) -> Result<CommandOutput, StepError> {
        let output = self.run_command(spec, sink, kind).await?;
        if output.success() {
            return Ok(output);
        }

        let mut message = format!("'{}' exited with code {}", spec.display(), output.exit_code);
        let last = output.last_line();
        if !last.is_empty() {
            message.push_str(": ");
            message.push_str(&last);
        }
        Err(StepError::Failed(kind, message))
    }
}
