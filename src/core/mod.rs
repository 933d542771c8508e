//! Core domain models for the release pipeline
//!
//! This module defines the fundamental data structures that represent
//! workflows, jobs, triggers and their configuration.

pub mod condition;
pub mod config;
pub mod context;
pub mod job;
pub mod matrix;
pub mod pipeline;
pub mod state;
pub mod step;
pub mod trigger;

pub use condition::{GateDecision, ReleaseGate, SkipReason};
pub use context::JobContext;
pub use job::{Job, JobInstance, JobRole};
pub use matrix::{InterpreterVersion, Matrix, MatrixInstance};
pub use pipeline::*;
pub use state::*;
pub use step::*;
pub use trigger::{EventKind, GitRef, TriggerEvent};
