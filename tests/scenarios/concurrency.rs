//! Test: Concurrency - the matrix honours its parallelism cap

use crate::helpers::*;
use release_pipeline::core::ExecutionStatus;
use release_pipeline::execution::SchedulingStrategy;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn wide_matrix(max_parallel: usize) -> release_pipeline::core::Pipeline {
    pipeline_from_yaml(&format!(
        r#"
name: "wide"
jobs:
  test:
    max_parallel: {}
    matrix:
      python_version: [3.6, 3.7, 3.8, 3.9, "3.10", "3.11"]
"#,
        max_parallel
    ))
}

#[tokio::test]
async fn test_max_parallel_caps_running_instances() {
    let mut pipeline = wide_matrix(2);
    let runner = MockRunner::new().with_delay(Duration::from_millis(20));

    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::MatrixLimit, branch_push(), None).await;

    assert_pipeline_completed(&result);
    assert_eq!(result.runner.peak_concurrency(), 2);
}

#[tokio::test]
async fn test_sequential_runs_one_instance_at_a_time() {
    let mut pipeline = wide_matrix(4);
    let runner = MockRunner::new().with_delay(Duration::from_millis(10));

    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Sequential, branch_push(), None).await;

    assert_pipeline_completed(&result);
    assert_eq!(result.runner.peak_concurrency(), 1);
}

#[tokio::test]
async fn test_parallel_ignores_the_cap() {
    let mut pipeline = wide_matrix(1);
    let runner = MockRunner::new().with_delay(Duration::from_millis(50));

    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::Parallel, branch_push(), None).await;

    assert_pipeline_completed(&result);
    assert_eq!(result.runner.peak_concurrency(), 6);
}

#[tokio::test]
async fn test_limited_parallel_overrides_the_workflow() {
    let mut pipeline = wide_matrix(6);
    let runner = MockRunner::new().with_delay(Duration::from_millis(20));

    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::LimitedParallel(3), branch_push(), None).await;

    assert_pipeline_completed(&result);
    assert_eq!(result.runner.peak_concurrency(), 3);
}

#[tokio::test]
async fn test_cancel_stops_the_run_and_the_release() {
    let mut pipeline = wide_matrix(1);
    let runner = MockRunner::new().with_delay(Duration::from_millis(100));
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            cancel.cancel();
        });
    }

    let result = run_pipeline_with_cancel(
        &mut pipeline,
        runner,
        SchedulingStrategy::MatrixLimit,
        tag_push("v1.0.0"),
        token(),
        cancel,
    )
    .await;

    assert_eq!(result.status, ExecutionStatus::Cancelled, "{}", result.summary());
    assert_eq!(result.release_state().name(), "cancelled");
    assert_eq!(result.runner.count("twine"), 0);
    // Queued instances never start
    assert!(result.runner.count("git clone") < 6);
}
