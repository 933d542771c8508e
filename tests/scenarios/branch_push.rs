//! Test: Branch push - every instance tested, nothing released

use crate::helpers::*;
use release_pipeline::core::{EventKind, TriggerEvent};
use release_pipeline::execution::{ExecutionEngine, ExecutionEvent, SchedulingStrategy};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_branch_push_runs_full_matrix() {
    let mut pipeline = matrix_pipeline();

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::default(), branch_push(), token()).await;

    assert_pipeline_completed(&result);
    for version in ["3.7", "3.8", "3.9"] {
        assert!(result.test_state(version).is_succeeded(), "{}", result.summary());
    }
    assert!(result.pipeline.test.state.is_succeeded());

    // One venv and one test command per interpreter
    for version in ["3.7", "3.8", "3.9"] {
        assert_eq!(result.runner.count(&format!("python{} -m venv", version)), 1);
        assert_eq!(result.runner.count(&format!("run-tests --python {}", version)), 1);
    }
}

#[tokio::test]
async fn test_branch_push_skips_release() {
    let mut pipeline = matrix_pipeline();

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::default(), branch_push(), token()).await;

    assert_skipped_with(result.release_state(), "not a release tag");
    assert_eq!(result.runner.count("twine"), 0);
    assert_eq!(result.runner.count("sdist"), 0);
}

#[tokio::test]
async fn test_instances_check_out_the_event_revision() {
    let mut pipeline = matrix_pipeline();
    let event = branch_push().with_sha("3f2a9c1");

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::Sequential, event, None).await;

    assert_pipeline_completed(&result);
    assert_eq!(result.runner.count("checkout --quiet --detach 3f2a9c1"), 3);
    assert_eq!(result.runner.count("git clone"), 3);
    assert_eq!(result.runner.count("rev-parse"), 0);
}

#[tokio::test]
async fn test_branch_ref_is_checked_out_by_sha() {
    let mut pipeline = matrix_pipeline();
    let event = TriggerEvent::new(EventKind::Push, "refs/heads/feature/login");

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::Sequential, event, None).await;

    assert_pipeline_completed(&result);
    assert_eq!(result.runner.count("rev-parse --verify --quiet refs/heads/feature/login^{commit}"), 1);
    assert_eq!(result.runner.count(&format!("checkout --quiet --detach {}", RESOLVED_SHA)), 3);
    assert_eq!(result.runner.count("--detach refs/heads"), 0);
}

#[tokio::test]
async fn test_unknown_ref_fails_before_any_instance_runs() {
    let mut pipeline = matrix_pipeline();
    let runner = Arc::new(MockRunner::new().fail_on("rev-parse", 128, "fatal: Needed a single revision"));
    let engine = ExecutionEngine::with_options(runner.clone(), SchedulingStrategy::Sequential, CancellationToken::new(), false);
    let event = TriggerEvent::new(EventKind::Push, "refs/heads/deleted");

    let err = engine.execute(&mut pipeline, &event, None).await.unwrap_err();

    assert!(err.to_string().contains("refs/heads/deleted"), "{}", err);
    assert!(err.to_string().contains("Needed a single revision"), "{}", err);
    assert_eq!(runner.count("git clone"), 0);
}

#[tokio::test]
async fn test_each_instance_gets_its_own_workspace() {
    let mut pipeline = matrix_pipeline();

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::Parallel, branch_push(), None).await;

    let mut dirs: Vec<_> = result
        .runner
        .calls()
        .into_iter()
        .filter(|c| c.display().contains("run-tests"))
        .filter_map(|c| c.cwd)
        .collect();
    dirs.sort();
    dirs.dedup();
    assert_eq!(dirs.len(), 3);
}

#[tokio::test]
async fn test_test_commands_run_inside_the_venv() {
    let mut pipeline = matrix_pipeline();

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::Sequential, branch_push(), None).await;

    let install = result
        .runner
        .calls()
        .into_iter()
        .find(|c| c.display().contains("pip install ."))
        .expect("install step ran");
    let venv = install.env_value("VIRTUAL_ENV").expect("VIRTUAL_ENV set");
    assert!(install.display().contains(venv));
}

#[tokio::test]
async fn test_step_output_is_forwarded_as_events() {
    let mut pipeline = matrix_pipeline();
    let runner = MockRunner::new().respond(
        "run-tests --python 3.9",
        release_pipeline::execution::CommandOutput {
            exit_code: 0,
            stdout: "Ran 12 tests\nOK\n".to_string(),
            stderr: String::new(),
        },
    );

    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Sequential, branch_push(), None).await;

    let lines: Vec<&str> = result
        .events
        .iter()
        .filter_map(|e| match e {
            ExecutionEvent::StepOutput { instance, line, .. } if instance.contains("3.9") => Some(line.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(lines, vec!["Ran 12 tests", "OK"]);
}

#[tokio::test]
async fn test_steps_see_python_version_and_dist_dir() {
    let mut pipeline = pipeline_from_yaml(
        r#"
name: "vars"
jobs:
  test:
    matrix:
      python_version: [3.8, "3.10"]
    steps:
      - name: "Show"
        run: "report --py {{ python_version }} --out {{ dist_dir }}"
"#,
    );

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::Sequential, branch_push(), None).await;

    assert_pipeline_completed(&result);
    assert_eq!(result.runner.count("report --py 3.8 --out dist"), 1);
    assert_eq!(result.runner.count("report --py 3.10 --out dist"), 1);
    assert_eq!(result.runner.count("{{"), 0);
}
