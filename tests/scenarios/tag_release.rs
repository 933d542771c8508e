//! Test: Tag release - build and publish after a green matrix

use crate::helpers::*;
use release_pipeline::core::GateDecision;
use release_pipeline::execution::{ExecutionEvent, SchedulingStrategy};

#[tokio::test]
async fn test_tag_push_builds_and_publishes() {
    let mut pipeline = matrix_pipeline();

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::default(), tag_push("v1.2.3"), token()).await;

    assert_pipeline_completed(&result);
    assert!(result.release_state().is_succeeded(), "{}", result.summary());
    assert_eq!(result.pipeline.release.instances.len(), 1);
    assert_eq!(result.runner.count("python3.9 -m venv"), 2);
    assert_eq!(result.runner.count("sdist bdist_wheel"), 1);
    assert_eq!(result.runner.count("twine upload"), 1);
}

#[tokio::test]
async fn test_release_runs_after_every_test_instance() {
    let mut pipeline = matrix_pipeline();

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::Parallel, tag_push("v1.2.3"), token()).await;

    let lines = result.runner.command_lines();
    let last_test = lines.iter().rposition(|l| l.contains("run-tests")).unwrap();
    let build = lines.iter().position(|l| l.contains("sdist")).unwrap();
    assert!(last_test < build, "{}", result.summary());

    let gated = result
        .events
        .iter()
        .any(|e| matches!(e, ExecutionEvent::ReleaseGated { decision: GateDecision::Run, .. }));
    assert!(gated);
}

#[tokio::test]
async fn test_release_prepares_a_clean_build() {
    let mut pipeline = matrix_pipeline();

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::default(), tag_push("v1.2.3"), token()).await;

    let lines = result.runner.command_lines();
    let install = lines
        .iter()
        .position(|l| l.contains("pip install --upgrade wheel twine"))
        .expect("build tools installed");
    let clean = lines.iter().position(|l| l.contains("git clean -dfx")).expect("tree cleaned");
    let build = lines.iter().position(|l| l.contains("sdist")).unwrap();
    assert!(install < clean && clean < build);
}

#[tokio::test]
async fn test_upload_sends_both_artifacts_and_credential() {
    let mut pipeline = matrix_pipeline();

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::default(), tag_push("v1.2.3"), token()).await;

    let upload = result
        .runner
        .calls()
        .into_iter()
        .find(|c| c.display().contains("twine upload"))
        .expect("upload ran");
    assert_eq!(upload.env_value("TWINE_USERNAME"), Some("__token__"));
    assert_eq!(upload.env_value("TWINE_PASSWORD"), Some("pypi-test-token"));
    assert!(upload.args.iter().any(|a| a.ends_with("pkg-1.2.3.tar.gz")));
    assert!(upload.args.iter().any(|a| a.ends_with("pkg-1.2.3-py3-none-any.whl")));
    assert!(upload.args.contains(&"--skip-existing".to_string()));
    assert!(!format!("{:?}", upload).contains("pypi-test-token"));
}

#[tokio::test]
async fn test_custom_gate_pattern() {
    let yaml = r#"
name: "asyncudp"
jobs:
  test:
    matrix:
      python_version: [3.9]
  release:
    if_ref:
      pattern: '^refs/tags/v\d+\.\d+\.\d+$'
      use_regex: true
"#;

    let mut pipeline = pipeline_from_yaml(yaml);
    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::default(), tag_push("nightly"), token()).await;
    assert_pipeline_completed(&result);
    assert_skipped_with(result.release_state(), "not a release tag");

    let mut pipeline = pipeline_from_yaml(yaml);
    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::default(), tag_push("v2.0.1"), token()).await;
    assert!(result.release_state().is_succeeded(), "{}", result.summary());
}

#[tokio::test]
async fn test_pull_request_never_releases() {
    let mut pipeline = matrix_pipeline();

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::default(), pull_request(12), token()).await;

    assert_pipeline_completed(&result);
    assert!(result.pipeline.test.state.is_succeeded());
    assert_skipped_with(result.release_state(), "refs/pull/12/merge");
    assert_eq!(result.runner.count("twine"), 0);
}
