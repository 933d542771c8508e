//! Step domain model

use crate::release::PublishSettings;

/// What a step does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepKind {
    /// Fresh working copy of the repository at the trigger's revision
    Checkout,
    /// Virtual environment from the instance's interpreter version
    SetupInterpreter,
    /// Templated shell command
    Run { command: String },
    /// Templated shell command preparing the environment, such as installing the package
    Setup { command: String },
    /// `pip install` into the instance's environment
    InstallTools { packages: Vec<String> },
    /// Remove untracked files from the working copy
    CleanWorkspace,
    /// Build sdist and wheel into `dist_dir`, then verify both exist
    Build { command: String, dist_dir: String },
    /// Upload everything in the build output
    Publish(PublishSettings),
}

/// A single step in a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Human-readable step name
    pub name: String,

    pub kind: StepKind,

    /// Timeout in seconds
    pub timeout_secs: u64,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            timeout_secs,
        }
    }

    pub fn run(name: impl Into<String>, command: impl Into<String>, timeout_secs: u64) -> Self {
        Self::new(
            name,
            StepKind::Run {
                command: command.into(),
            },
            timeout_secs,
        )
    }

    pub fn setup(name: impl Into<String>, command: impl Into<String>, timeout_secs: u64) -> Self {
        Self::new(
            name,
            StepKind::Setup {
                command: command.into(),
            },
            timeout_secs,
        )
    }
}
