//! Pipeline domain model

use crate::core::{
    condition::{RefPattern, ReleaseGate},
    config::WorkflowConfig,
    job::{Job, JobRole},
    matrix::Matrix,
    state::{ExecutionStatus, JobState, PipelineState},
    step::{Step, StepKind},
    trigger::{EventKind, TriggerEvent},
};
use anyhow::Result;
use std::collections::HashMap;
use std::path::PathBuf;

/// A workflow ready to run: a matrix test job and a gated release job
#[derive(Debug, Clone)]
pub struct Pipeline {
    /// Workflow name
    pub name: String,

    /// Events that start a run
    pub triggers: Vec<EventKind>,

    /// Repository checked out by every instance
    pub repository: PathBuf,

    /// Interpreter command template (`{{ version }}`)
    pub interpreter: String,

    /// Global variables available to all commands
    pub variables: HashMap<String, String>,

    pub test: Job,

    pub release: Job,

    pub gate: ReleaseGate,

    /// Execution state
    pub state: PipelineState,
}

/// What a run would do for an event, assuming the test job passes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPlan {
    pub triggered: bool,
    pub test_instances: Vec<String>,
    pub max_parallel: usize,
    pub release_eligible: bool,
}

impl Pipeline {
    /// Create a pipeline from configuration
    pub fn from_config(config: &WorkflowConfig) -> Result<Self> {
        let step_timeout = config.step_timeout();
        let job_timeout = config.job_timeout();

        let test_config = &config.jobs.test;
        let mut test_steps = vec![
            Step::new("Checkout", StepKind::Checkout, step_timeout),
            Step::new("Set up interpreter", StepKind::SetupInterpreter, step_timeout),
        ];
        test_steps.extend(
            test_config
                .steps
                .iter()
                .map(|s| {
                    let timeout = s.timeout_secs.unwrap_or(step_timeout);
                    if s.setup {
                        Step::setup(s.name.clone(), s.run.clone(), timeout)
                    } else {
                        Step::run(s.name.clone(), s.run.clone(), timeout)
                    }
                }),
        );
        let test = Job::new(
            test_config.id.clone(),
            test_config.name.clone(),
            JobRole::Test,
            test_steps,
            Matrix::new(test_config.matrix.python_version.clone(), test_config.max_parallel),
            test_config.timeout_secs.unwrap_or(job_timeout),
        );

        let release_config = &config.jobs.release;
        let release_steps = vec![
            Step::new("Checkout", StepKind::Checkout, step_timeout),
            Step::new("Set up interpreter", StepKind::SetupInterpreter, step_timeout),
            Step::new(
                "Install build tools",
                StepKind::InstallTools {
                    packages: release_config.build_requires.clone(),
                },
                step_timeout,
            ),
            Step::new("Clean working tree", StepKind::CleanWorkspace, step_timeout),
            Step::new(
                "Build distributions",
                StepKind::Build {
                    command: release_config.build.clone(),
                    dist_dir: release_config.dist_dir.clone(),
                },
                step_timeout,
            ),
            Step::new(
                "Publish",
                StepKind::Publish(release_config.publish.clone()),
                step_timeout,
            ),
        ];
        let release = Job::new(
            release_config.id.clone(),
            release_config.name.clone(),
            JobRole::Release,
            release_steps,
            Matrix::new(vec![release_config.python_version.clone()], 1),
            release_config.timeout_secs.unwrap_or(job_timeout),
        )
        .with_needs(release_config.needs.clone());

        let pattern = RefPattern::from_config(&release_config.gate.pattern, release_config.gate.use_regex)?;

        Ok(Pipeline {
            name: config.name.clone(),
            triggers: config.triggers.clone(),
            repository: PathBuf::from(&config.repository),
            interpreter: config.interpreter.clone(),
            variables: config.variables_as_string_map(),
            test,
            release,
            gate: ReleaseGate::new(pattern),
            state: PipelineState::new(),
        })
    }

    /// Whether the workflow reacts to this event kind
    pub fn accepts(&self, event: &TriggerEvent) -> bool {
        self.triggers.contains(&event.kind)
    }

    /// Interpreter command for a version
    pub fn interpreter_for(&self, version: &str) -> String {
        self.interpreter.replace("{{ version }}", version)
    }

    /// Dry-run view of a run for an event
    pub fn plan(&self, event: &TriggerEvent) -> RunPlan {
        let triggered = self.accepts(event);
        RunPlan {
            triggered,
            test_instances: if triggered {
                self.test.instances.iter().map(|i| i.label()).collect()
            } else {
                Vec::new()
            },
            max_parallel: self.test.matrix.max_parallel,
            release_eligible: triggered && self.gate.ref_allows_release(event),
        }
    }

    /// Check if every job reached a terminal state
    pub fn is_complete(&self) -> bool {
        self.test.state.is_terminal() && self.release.state.is_terminal()
    }

    /// Overall outcome once the jobs have finished
    ///
    /// A skipped release is not a failure: a green branch push completes.
    pub fn overall_status(&self) -> ExecutionStatus {
        let jobs = [&self.test.state, &self.release.state];

        if jobs.iter().any(|s| s.is_failed()) {
            ExecutionStatus::Failed
        } else if jobs.iter().any(|s| matches!(s, JobState::Cancelled { .. })) {
            ExecutionStatus::Cancelled
        } else if self.is_complete() {
            ExecutionStatus::Completed
        } else {
            self.state.status
        }
    }
}
