//! Test: Publish failures - build and upload problems fail the release

use crate::helpers::*;
use release_pipeline::execution::{CommandOutput, SchedulingStrategy};

fn single_version() -> release_pipeline::core::Pipeline {
    pipeline_from_yaml(
        r#"
name: "asyncudp"
jobs:
  test:
    matrix:
      python_version: [3.9]
"#,
    )
}

fn release_error(result: &PipelineTestResult) -> String {
    match &result.pipeline.release.instances[0].state {
        release_pipeline::core::JobState::Failed { error, .. } => error.clone(),
        other => panic!("Expected failed release, got {:?}\n{}", other, result.summary()),
    }
}

#[tokio::test]
async fn test_missing_credential_fails_only_publish() {
    let mut pipeline = single_version();

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::default(), tag_push("v1.2.3"), None).await;

    assert_pipeline_failed(&result);
    assert!(result.pipeline.test.state.is_succeeded());
    let error = release_error(&result);
    assert!(error.contains("publish failure"), "{}", error);
    assert!(error.contains("PYPI_PASSWORD"), "{}", error);
    // The build still ran, nothing was uploaded
    assert_eq!(result.runner.count("sdist"), 1);
    assert_eq!(result.runner.count("twine upload"), 0);
}

#[tokio::test]
async fn test_rejected_credential() {
    let mut pipeline = single_version();
    let runner = MockRunner::new().fail_on(
        "twine upload",
        1,
        "HTTPError: 403 Forbidden from https://upload.pypi.org/legacy/",
    );

    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::default(), tag_push("v1.2.3"), token()).await;

    assert_pipeline_failed(&result);
    let error = release_error(&result);
    assert!(error.contains("rejected the credential"), "{}", error);
}

#[tokio::test]
async fn test_already_published_is_success() {
    let mut pipeline = single_version();
    let runner = MockRunner::new().respond(
        "twine upload",
        CommandOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "HTTPError: 400 Bad Request: File already exists.\n".to_string(),
        },
    );

    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::default(), tag_push("v1.2.3"), token()).await;

    assert_pipeline_completed(&result);
    assert!(result.release_state().is_succeeded());
}

#[tokio::test]
async fn test_already_published_fails_without_skip_existing() {
    let mut pipeline = pipeline_from_yaml(
        r#"
name: "asyncudp"
jobs:
  test:
    matrix:
      python_version: [3.9]
  release:
    publish:
      skip_existing: false
"#,
    );
    let runner = MockRunner::new().fail_on("twine upload", 1, "HTTPError: 400 Bad Request: File already exists.");

    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::default(), tag_push("v1.2.3"), token()).await;

    assert_pipeline_failed(&result);
    assert!(release_error(&result).contains("Upload failed with exit code 1"));
}

#[tokio::test]
async fn test_build_without_artifacts_fails() {
    let mut pipeline = pipeline_from_yaml(
        r#"
name: "asyncudp"
jobs:
  test:
    matrix:
      python_version: [3.9]
  release:
    build: "{{ python }} -m build --wheel --outdir {{ dist_dir }}"
"#,
    );

    let result = run_pipeline(&mut pipeline, MockRunner::new(), SchedulingStrategy::default(), tag_push("v1.2.3"), token()).await;

    assert_pipeline_failed(&result);
    let error = release_error(&result);
    assert!(error.contains("build failure"), "{}", error);
    assert_eq!(result.runner.count("twine upload"), 0);
}

#[tokio::test]
async fn test_build_command_failure() {
    let mut pipeline = single_version();
    let runner = MockRunner::new().fail_on("sdist", 1, "error: package directory 'asyncudp' does not exist");

    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::default(), tag_push("v1.2.3"), token()).await;

    let error = release_error(&result);
    assert!(error.contains("build failure"), "{}", error);
    assert!(error.contains("does not exist"), "{}", error);
}

#[tokio::test]
async fn test_build_tool_install_failure_is_provisioning() {
    let mut pipeline = single_version();
    let runner = MockRunner::new().fail_on("pip install --upgrade", 1, "No matching distribution found for twine");

    let result = run_pipeline(&mut pipeline, runner, SchedulingStrategy::default(), tag_push("v1.2.3"), token()).await;

    assert!(release_error(&result).contains("provisioning failure"));
    assert_eq!(result.runner.count("sdist"), 0);
}
