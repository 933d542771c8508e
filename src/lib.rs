//! release-pipeline - matrix tests on every push, tagged releases to a package index

pub mod cli;
pub mod core;
pub mod execution;
pub mod persistence;
pub mod release;

// Re-export commonly used types
pub use core::{EventKind, ExecutionStatus, JobState, Pipeline, TriggerEvent};
pub use execution::{
    CommandRunner, ExecutionEngine, ExecutionEvent, InstanceResult, ProcessRunner,
    SchedulingStrategy,
};
pub use release::Credential;
