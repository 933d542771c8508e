//! Workflow configuration from YAML

use crate::core::{
    condition::{RefPattern, DEFAULT_RELEASE_REF_PREFIX},
    matrix::{default_versions, InterpreterVersion, DEFAULT_MAX_PARALLEL},
    trigger::EventKind,
    Pipeline,
};
use crate::release::PublishSettings;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::{HashMap, HashSet};
use std::path::Path;

pub const DEFAULT_STEP_TIMEOUT_SECS: u64 = 1800;
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 3600;

/// Top-level workflow configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name
    pub name: String,

    /// Events that start a run
    #[serde(rename = "on", alias = "triggers", default = "default_triggers")]
    pub triggers: Vec<EventKind>,

    /// Repository to check out for every job instance
    #[serde(default = "default_repository")]
    pub repository: String,

    /// Command used to provision an interpreter, `{{ version }}` is replaced
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Variables available to every command
    #[serde(default)]
    variables: HashMap<String, Value>,

    /// Default timeout for a single step (in seconds)
    #[serde(default)]
    pub step_timeout_secs: Option<u64>,

    /// Default timeout for a whole job instance (in seconds)
    #[serde(default)]
    pub job_timeout_secs: Option<u64>,

    #[serde(default)]
    pub jobs: JobsConfig,
}

/// The two jobs of the workflow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default)]
    pub test: TestJobConfig,

    #[serde(default)]
    pub release: ReleaseJobConfig,
}

/// Matrix test job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestJobConfig {
    #[serde(default = "default_test_id")]
    pub id: String,

    #[serde(default = "default_test_name")]
    pub name: String,

    /// Maximum number of instances running at once
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    #[serde(default)]
    pub matrix: MatrixConfig,

    /// Commands run after checkout and interpreter setup
    #[serde(default = "default_test_steps")]
    pub steps: Vec<StepConfig>,

    /// Timeout for each instance (overrides global)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixConfig {
    #[serde(default = "default_versions")]
    pub python_version: Vec<InterpreterVersion>,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            python_version: default_versions(),
        }
    }
}

/// A command step as defined in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    /// Human-readable step name
    pub name: String,

    /// Shell command template
    pub run: String,

    /// Timeout for this step (overrides global)
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Failures count as provisioning rather than test failures
    #[serde(default)]
    pub setup: bool,
}

/// Gated release job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseJobConfig {
    #[serde(default = "default_release_id")]
    pub id: String,

    #[serde(default = "default_release_name")]
    pub name: String,

    /// Job that must succeed first
    #[serde(default = "default_test_id")]
    pub needs: String,

    /// Ref condition for releasing
    #[serde(default, rename = "if_ref")]
    pub gate: GateConfig,

    /// Interpreter used to build and upload
    #[serde(default = "default_release_version")]
    pub python_version: InterpreterVersion,

    /// Packages installed before building
    #[serde(default = "default_build_requires")]
    pub build_requires: Vec<String>,

    /// Build command template, must write into `{{ dist_dir }}`
    #[serde(default = "default_build_command")]
    pub build: String,

    /// Output directory for artifacts, relative to the checkout
    #[serde(default = "default_dist_dir")]
    pub dist_dir: String,

    #[serde(default)]
    pub publish: PublishSettings,

    /// Timeout for the job (overrides global)
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Ref condition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// Prefix (or regex) the full ref name must match
    #[serde(default = "default_ref_pattern")]
    pub pattern: String,

    /// Whether to use regex pattern matching
    #[serde(default)]
    pub use_regex: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            pattern: default_ref_pattern(),
            use_regex: false,
        }
    }
}

impl Default for TestJobConfig {
    fn default() -> Self {
        Self {
            id: default_test_id(),
            name: default_test_name(),
            max_parallel: default_max_parallel(),
            matrix: MatrixConfig::default(),
            steps: default_test_steps(),
            timeout_secs: None,
        }
    }
}

impl Default for ReleaseJobConfig {
    fn default() -> Self {
        Self {
            id: default_release_id(),
            name: default_release_name(),
            needs: default_test_id(),
            gate: GateConfig::default(),
            python_version: default_release_version(),
            build_requires: default_build_requires(),
            build: default_build_command(),
            dist_dir: default_dist_dir(),
            publish: PublishSettings::default(),
            timeout_secs: None,
        }
    }
}

fn default_triggers() -> Vec<EventKind> {
    vec![EventKind::Push, EventKind::PullRequest]
}

fn default_repository() -> String {
    ".".to_string()
}

fn default_interpreter() -> String {
    "python{{ version }}".to_string()
}

fn default_test_id() -> String {
    "test".to_string()
}

fn default_test_name() -> String {
    "Test".to_string()
}

fn default_release_id() -> String {
    "release".to_string()
}

fn default_release_name() -> String {
    "Release".to_string()
}

fn default_max_parallel() -> usize {
    DEFAULT_MAX_PARALLEL
}

fn default_test_steps() -> Vec<StepConfig> {
    vec![
        StepConfig {
            name: "Install package".to_string(),
            run: "{{ python }} -m pip install .".to_string(),
            timeout_secs: None,
            setup: true,
        },
        StepConfig {
            name: "Run tests".to_string(),
            run: "{{ python }} -m unittest".to_string(),
            timeout_secs: None,
            setup: false,
        },
    ]
}

fn default_release_version() -> InterpreterVersion {
    InterpreterVersion {
        major: 3,
        minor: 9,
        patch: None,
    }
}

fn default_build_requires() -> Vec<String> {
    vec!["wheel".to_string(), "twine".to_string()]
}

fn default_build_command() -> String {
    "{{ python }} setup.py sdist bdist_wheel --dist-dir {{ dist_dir }}".to_string()
}

fn default_dist_dir() -> String {
    "dist".to_string()
}

fn default_ref_pattern() -> String {
    DEFAULT_RELEASE_REF_PREFIX.to_string()
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse workflow configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the workflow configuration
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            anyhow::bail!("Workflow name must not be empty");
        }

        if self.triggers.is_empty() {
            anyhow::bail!("Workflow '{}' has no trigger events", self.name);
        }

        if !self.interpreter.contains("{{ version }}") {
            tracing::warn!(
                "Interpreter command '{}' has no {{{{ version }}}} placeholder; every instance uses the same interpreter",
                self.interpreter
            );
        }

        let test = &self.jobs.test;
        let release = &self.jobs.release;

        if test.id == release.id {
            anyhow::bail!("Test and release jobs share the id '{}'", test.id);
        }

        if test.matrix.python_version.is_empty() {
            anyhow::bail!("Job '{}' has an empty python_version matrix", test.id);
        }

        let mut seen_versions = HashSet::new();
        for version in &test.matrix.python_version {
            if !seen_versions.insert(version) {
                anyhow::bail!("Job '{}' lists python_version {} twice", test.id, version);
            }
        }

        if test.max_parallel == 0 {
            anyhow::bail!("Job '{}' max_parallel must be at least 1", test.id);
        }

        if release.needs != test.id {
            anyhow::bail!(
                "Job '{}' needs non-existent job '{}'",
                release.id,
                release.needs
            );
        }

        RefPattern::from_config(&release.gate.pattern, release.gate.use_regex).map_err(|e| {
            anyhow::anyhow!("Job '{}' has an invalid ref pattern: {}", release.id, e)
        })?;

        let dist_dir = Path::new(&release.dist_dir);
        if release.dist_dir.trim().is_empty() || dist_dir.is_absolute() {
            anyhow::bail!(
                "Job '{}' dist_dir must be a relative path, got '{}'",
                release.id,
                release.dist_dir
            );
        }

        if release.publish.password_env.trim().is_empty() {
            anyhow::bail!("Job '{}' publish.password_env must not be empty", release.id);
        }

        let timeouts = [
            self.step_timeout_secs,
            self.job_timeout_secs,
            test.timeout_secs,
            release.timeout_secs,
        ];
        let step_timeouts = test.steps.iter().map(|s| s.timeout_secs);
        if timeouts.into_iter().chain(step_timeouts).any(|t| t == Some(0)) {
            anyhow::bail!("Timeouts must be greater than zero");
        }

        Ok(())
    }

    /// Get variables as strings
    pub fn variables_as_string_map(&self) -> HashMap<String, String> {
        self.variables
            .iter()
            .map(|(key, value)| {
                let rendered = match value {
                    Value::String(s) => s.clone(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    Value::Null => String::new(),
                    other => serde_yaml::to_string(other)
                        .map(|s| s.trim_end().to_string())
                        .unwrap_or_default(),
                };
                (key.clone(), rendered)
            })
            .collect()
    }

    pub fn step_timeout(&self) -> u64 {
        self.step_timeout_secs.unwrap_or(DEFAULT_STEP_TIMEOUT_SECS)
    }

    pub fn job_timeout(&self) -> u64 {
        self.job_timeout_secs.unwrap_or(DEFAULT_JOB_TIMEOUT_SECS)
    }

    /// Convert config to a Pipeline domain model
    pub fn to_pipeline(&self) -> Result<Pipeline> {
        Pipeline::from_config(self)
    }
}
