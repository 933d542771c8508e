//! Job domain model

use crate::core::{
    matrix::{Matrix, MatrixInstance},
    state::{reduce_instances, JobState},
    step::Step,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobRole {
    Test,
    Release,
}

/// One scheduled copy of a job, bound to an interpreter version
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub instance: MatrixInstance,
    pub state: JobState,
}

impl JobInstance {
    pub fn label(&self) -> String {
        self.instance.label()
    }
}

/// A job definition and its runtime state
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job identifier
    pub id: String,

    pub name: String,

    pub role: JobRole,

    /// Job that must succeed before this one runs
    pub needs: Option<String>,

    /// Steps run by every instance, in order
    pub steps: Vec<Step>,

    /// Fan-out of the job; a single version for unmatrixed jobs
    pub matrix: Matrix,

    /// Timeout for one instance, in seconds
    pub timeout_secs: u64,

    pub instances: Vec<JobInstance>,

    /// Runtime state (reduced over instances once they finish)
    pub state: JobState,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        role: JobRole,
        steps: Vec<Step>,
        matrix: Matrix,
        timeout_secs: u64,
    ) -> Self {
        let id = id.into();
        let instances = matrix
            .instances(&id)
            .into_iter()
            .map(|instance| JobInstance {
                instance,
                state: JobState::Pending,
            })
            .collect();

        Self {
            id,
            name: name.into(),
            role,
            needs: None,
            steps,
            matrix,
            timeout_secs,
            instances,
            state: JobState::Pending,
        }
    }

    pub fn with_needs(mut self, needs: impl Into<String>) -> Self {
        self.needs = Some(needs.into());
        self
    }

    pub fn instance_mut(&mut self, index: usize) -> Option<&mut JobInstance> {
        self.instances.get_mut(index)
    }

    /// Recompute the job state from its instances once all are terminal
    pub fn reduce(&mut self) -> Option<&JobState> {
        let reduced = reduce_instances(self.instances.iter().map(|i| &i.state))?;
        self.state = reduced;
        Some(&self.state)
    }

    /// Skip the job and every pending instance
    pub fn skip_all(&mut self, reason: &str) {
        for instance in &mut self.instances {
            let _ = instance.state.skip(reason);
        }
        let _ = self.state.skip(reason);
    }

    /// Cancel the job and every unfinished instance
    pub fn cancel_all(&mut self, reason: &str) {
        for instance in &mut self.instances {
            let _ = instance.state.cancel(reason);
        }
        let _ = self.state.cancel(reason);
    }

    pub fn succeeded_count(&self) -> usize {
        self.instances.iter().filter(|i| i.state.is_succeeded()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.instances.iter().filter(|i| i.state.is_failed()).count()
    }
}
