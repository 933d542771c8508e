//! Test: Triggers - events outside `on` start nothing

use crate::helpers::*;
use release_pipeline::core::{EventKind, ExecutionStatus, TriggerEvent};
use release_pipeline::execution::{ExecutionEvent, SchedulingStrategy};

#[tokio::test]
async fn test_untriggered_event_runs_nothing() {
    let mut pipeline = pipeline_from_yaml(
        r#"
name: "push-only"
on: [push]
"#,
    );

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::default(), pull_request(4), token()).await;

    assert_eq!(result.status, ExecutionStatus::NotTriggered);
    assert!(result.runner.calls().is_empty());
    assert_skipped_with(&result.pipeline.test.state, "event not in triggers");
    assert_skipped_with(result.release_state(), "event not in triggers");
    assert!(result.pipeline.is_complete());

    let names: Vec<&str> = result
        .events
        .iter()
        .map(|e| match e {
            ExecutionEvent::NotTriggered { .. } => "not_triggered",
            ExecutionEvent::PipelineFinished { .. } => "pipeline_finished",
            _ => "other",
        })
        .collect();
    assert_eq!(names, vec!["not_triggered", "pipeline_finished"]);
}

#[test]
fn test_plan_matches_execution() {
    let pipeline = matrix_pipeline();

    let plan = pipeline.plan(&tag_push("v1.0.0"));
    assert!(plan.triggered);
    assert!(plan.release_eligible);
    assert_eq!(plan.test_instances, vec!["test (3.7)", "test (3.8)", "test (3.9)"]);

    let plan = pipeline.plan(&branch_push());
    assert!(plan.triggered);
    assert!(!plan.release_eligible);

    let push_only = pipeline_from_yaml("name: \"x\"\non: [push]\n");
    let plan = push_only.plan(&TriggerEvent::new(EventKind::PullRequest, "refs/pull/1/merge"));
    assert!(!plan.triggered);
    assert!(!plan.release_eligible);
}

#[tokio::test]
async fn test_workflow_variables_reach_commands() {
    let mut pipeline = pipeline_from_yaml(
        r#"
name: "vars"
variables:
  package: "asyncudp"
jobs:
  test:
    matrix:
      python_version: [3.8]
    steps:
      - name: "Run tests"
        run: "{{ python }} -m pytest tests/{{ package }} -k py{{ version }}"
"#,
    );

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::default(), branch_push(), None).await;

    assert_pipeline_completed(&result);
    assert_eq!(result.runner.count("-m pytest tests/asyncudp -k py3.8"), 1);
}
