//! Scenario-based tests for release-pipeline

mod branch_push;
mod concurrency;
mod publish_failures;
mod tag_release;
mod triggers;
