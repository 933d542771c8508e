//! Test utility functions for release-pipeline

#![allow(dead_code)]

use async_trait::async_trait;
use release_pipeline::core::config::WorkflowConfig;
use release_pipeline::core::{EventKind, ExecutionStatus, JobState, Pipeline, TriggerEvent};
use release_pipeline::execution::{
    CommandOutput, CommandRunner, CommandSpec, ExecutionEngine, ExecutionEvent, OutputSink,
    OutputStream, RunnerError, SchedulingStrategy,
};
use release_pipeline::release::Credential;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What `git rev-parse` answers when no rule overrides it
pub const RESOLVED_SHA: &str = "5d1c0a37e4b2f9a86c3e07d41b9f2e6a8c05d7b3";

/// A scripted outcome for every command whose line contains `pattern`
#[derive(Debug, Clone)]
struct Rule {
    pattern: String,
    output: CommandOutput,
}

/// Mock runner that never spawns a process
///
/// Commands succeed unless a rule matches. `git rev-parse` prints
/// [`RESOLVED_SHA`]. A command containing `sdist`
/// writes a source archive and a wheel into `<cwd>/dist`, like a real build.
#[derive(Default)]
pub struct MockRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
    delay: Option<Duration>,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every command sleeps for `delay` before returning
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Commands containing `pattern` exit with `exit_code` and print `stderr`
    pub fn fail_on(self, pattern: &str, exit_code: i32, stderr: &str) -> Self {
        self.respond(
            pattern,
            CommandOutput {
                exit_code,
                stdout: String::new(),
                stderr: format!("{}\n", stderr),
            },
        )
    }

    pub fn respond(self, pattern: &str, output: CommandOutput) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern: pattern.to_string(),
                output,
            });
        }
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(|c| c.display()).collect()
    }

    /// Number of recorded commands containing `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.command_lines().iter().filter(|l| l.contains(pattern)).count()
    }

    /// Most commands that were in flight at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn scripted(&self, line: &str) -> CommandOutput {
        let rules = self.rules.lock().unwrap();
        match rules.iter().find(|r| line.contains(&r.pattern)) {
            Some(rule) => rule.output.clone(),
            None if line.contains("rev-parse") => CommandOutput {
                stdout: format!("{}\n", RESOLVED_SHA),
                ..CommandOutput::default()
            },
            None => CommandOutput::default(),
        }
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec, sink: Option<&dyn OutputSink>) -> Result<CommandOutput, RunnerError> {
        self.calls.lock().unwrap().push(spec.clone());
        let line = spec.display();

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        let output = self.scripted(&line);
        if output.success() && line.contains("sdist") {
            if let Some(cwd) = &spec.cwd {
                let dist = cwd.join("dist");
                std::fs::create_dir_all(&dist)?;
                std::fs::write(dist.join("pkg-1.2.3.tar.gz"), b"sdist")?;
                std::fs::write(dist.join("pkg-1.2.3-py3-none-any.whl"), b"wheel")?;
            }
        }

        if let Some(sink) = sink {
            for l in output.stdout.lines() {
                sink.on_line(OutputStream::Stdout, l);
            }
            for l in output.stderr.lines() {
                sink.on_line(OutputStream::Stderr, l);
            }
        }
        Ok(output)
    }
}

/// Outcome of one pipeline run under test
pub struct PipelineTestResult {
    pub pipeline: Pipeline,
    pub status: ExecutionStatus,
    pub events: Vec<ExecutionEvent>,
    pub runner: Arc<MockRunner>,
}

impl PipelineTestResult {
    /// State of the test instance for `version`
    pub fn test_state(&self, version: &str) -> &JobState {
        &self
            .pipeline
            .test
            .instances
            .iter()
            .find(|i| i.instance.version.to_string() == version)
            .unwrap_or_else(|| panic!("No test instance for {}", version))
            .state
    }

    pub fn release_state(&self) -> &JobState {
        &self.pipeline.release.state
    }

    pub fn failed_instances(&self) -> Vec<String> {
        self.pipeline
            .test
            .instances
            .iter()
            .chain(&self.pipeline.release.instances)
            .filter(|i| i.state.is_failed())
            .map(|i| i.label())
            .collect()
    }

    pub fn count_events(&self, filter: impl Fn(&ExecutionEvent) -> bool) -> usize {
        self.events.iter().filter(|e| filter(e)).count()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} - {:?}, test {}, release {}, commands:\n  {}",
            self.pipeline.name,
            self.status,
            self.pipeline.test.state.name(),
            self.pipeline.release.state.name(),
            self.runner.command_lines().join("\n  ")
        )
    }
}

pub fn pipeline_from_yaml(yaml: &str) -> Pipeline {
    WorkflowConfig::from_yaml(yaml)
        .expect("Failed to parse YAML")
        .to_pipeline()
        .expect("Failed to build pipeline")
}

/// Three-version matrix with a versioned test command
pub fn matrix_pipeline() -> Pipeline {
    pipeline_from_yaml(
        r#"
name: "asyncudp"
jobs:
  test:
    max_parallel: 4
    matrix:
      python_version: [3.7, 3.8, 3.9]
    steps:
      - name: "Install package"
        run: "{{ python }} -m pip install ."
        setup: true
      - name: "Run tests"
        run: "run-tests --python {{ version }}"
"#,
    )
}

pub async fn run_pipeline(
    pipeline: &mut Pipeline,
    runner: MockRunner,
    strategy: SchedulingStrategy,
    event: TriggerEvent,
    credential: Option<Credential>,
) -> PipelineTestResult {
    run_pipeline_with_cancel(pipeline, runner, strategy, event, credential, CancellationToken::new()).await
}

pub async fn run_pipeline_with_cancel(
    pipeline: &mut Pipeline,
    runner: MockRunner,
    strategy: SchedulingStrategy,
    event: TriggerEvent,
    credential: Option<Credential>,
    cancel: CancellationToken,
) -> PipelineTestResult {
    let runner = Arc::new(runner);
    let engine = ExecutionEngine::with_options(runner.clone(), strategy, cancel, false);

    let events = Arc::new(Mutex::new(Vec::new()));
    {
        let events = events.clone();
        engine
            .add_event_handler(move |event| events.lock().unwrap().push(event))
            .await;
    }

    let status = engine
        .execute(pipeline, &event, credential)
        .await
        .expect("Pipeline execution failed");
    let events = events.lock().unwrap().clone();

    PipelineTestResult {
        pipeline: pipeline.clone(),
        status,
        events,
        runner,
    }
}

pub fn branch_push() -> TriggerEvent {
    TriggerEvent::new(EventKind::Push, "refs/heads/main")
}

pub fn tag_push(tag: &str) -> TriggerEvent {
    TriggerEvent::new(EventKind::Push, format!("refs/tags/{}", tag))
}

pub fn pull_request(number: u32) -> TriggerEvent {
    TriggerEvent::new(EventKind::PullRequest, format!("refs/pull/{}/merge", number))
}

pub fn token() -> Option<Credential> {
    Some(Credential::new("pypi-test-token"))
}

pub fn assert_pipeline_completed(result: &PipelineTestResult) {
    assert_eq!(
        result.status,
        ExecutionStatus::Completed,
        "Expected pipeline to complete\n{}",
        result.summary()
    );
}

pub fn assert_pipeline_failed(result: &PipelineTestResult) {
    assert_eq!(
        result.status,
        ExecutionStatus::Failed,
        "Expected pipeline to fail\n{}",
        result.summary()
    );
}

/// The failed state's error contains `needle`
pub fn assert_failed_with(state: &JobState, needle: &str) {
    match state {
        JobState::Failed { error, .. } => assert!(
            error.contains(needle),
            "Expected error containing '{}', got '{}'",
            needle,
            error
        ),
        other => panic!("Expected failed state, got {:?}", other),
    }
}

pub fn assert_skipped_with(state: &JobState, needle: &str) {
    match state {
        JobState::Skipped { reason } => assert!(
            reason.contains(needle),
            "Expected skip reason containing '{}', got '{}'",
            needle,
            reason
        ),
        other => panic!("Expected skipped state, got {:?}", other),
    }
}
