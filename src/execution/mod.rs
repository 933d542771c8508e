//! Pipeline execution engine

pub mod engine;
pub mod executor;
pub mod runner;
pub mod scheduler;
pub mod workspace;

pub use engine::{EngineError, EventEmitter, EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{FailureKind, InstancePlan, InstanceResult, JobExecutor};
pub use runner::{CommandOutput, CommandRunner, CommandSpec, OutputSink, OutputStream, ProcessRunner, RunnerError};
pub use scheduler::{InstanceReport, MatrixScheduler, SchedulingStrategy};
pub use workspace::{detect_trigger, resolve_revision, InstanceWorkspace, RevisionError};
