//! Uploading artifacts to a package index

use crate::execution::runner::{CommandOutput, CommandSpec};
use crate::release::artifacts::ArtifactSet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Upload credential, passed explicitly to the publish step
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Read the credential from an environment variable; empty counts as unset
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(Self)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Publish configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishSettings {
    /// Upload endpoint; the tool's default index when unset
    #[serde(default)]
    pub repository_url: Option<String>,

    #[serde(default = "default_username")]
    pub username: String,

    /// Environment variable holding the credential
    #[serde(default = "default_password_env")]
    pub password_env: String,

    /// Treat already-published files as success
    #[serde(default = "default_skip_existing")]
    pub skip_existing: bool,
}

fn default_username() -> String {
    "__token__".to_string()
}

fn default_password_env() -> String {
    "PYPI_PASSWORD".to_string()
}

fn default_skip_existing() -> bool {
    true
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            repository_url: None,
            username: default_username(),
            password_env: default_password_env(),
            skip_existing: default_skip_existing(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("No credential provided (expected in ${0})")]
    MissingCredential(String),

    #[error("Nothing to publish")]
    NoArtifacts,

    #[error("Registry rejected the credential: {0}")]
    Authentication(String),

    #[error("Upload failed with exit code {exit_code}: {message}")]
    Upload { exit_code: i32, message: String },
}

/// Result of an upload that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Published,
    /// The version was already on the index and `skip_existing` is on
    AlreadyPublished,
}

/// Builds upload commands for one release
#[derive(Debug, Clone)]
pub struct Publisher<'a> {
    settings: &'a PublishSettings,
}

impl<'a> Publisher<'a> {
    pub fn new(settings: &'a PublishSettings) -> Self {
        Self { settings }
    }

    /// `python -m twine upload` for every artifact
    pub fn upload_command(
        &self,
        python: &str,
        artifacts: &ArtifactSet,
        credential: Option<&Credential>,
        cwd: &Path,
    ) -> Result<CommandSpec, PublishError> {
        let credential =
            credential.ok_or_else(|| PublishError::MissingCredential(self.settings.password_env.clone()))?;

        if artifacts.is_empty() {
            return Err(PublishError::NoArtifacts);
        }

        let mut spec = CommandSpec::new(python)
            .args(["-m", "twine", "upload", "--non-interactive"])
            .cwd(cwd)
            .env("TWINE_USERNAME", &self.settings.username)
            .secret_env("TWINE_PASSWORD", credential.expose());

        if self.settings.skip_existing {
            spec = spec.arg("--skip-existing");
        }
        if let Some(url) = &self.settings.repository_url {
            spec = spec.arg("--repository-url").arg(url);
        }

        for path in artifacts.paths() {
            spec = spec.arg(path.to_string_lossy());
        }

        Ok(spec)
    }
}

const ALREADY_EXISTS_MARKERS: &[&str] = &["file already exists", "already exists"];
const AUTH_MARKERS: &[&str] = &[
    "403 forbidden",
    "401 unauthorized",
    "invalid or non-existent authentication",
];

/// Interpret the upload tool's result
pub fn classify_upload(output: &CommandOutput, skip_existing: bool) -> Result<PublishOutcome, PublishError> {
    if output.success() {
        return Ok(PublishOutcome::Published);
    }

    let combined = format!("{}\n{}", output.stdout, output.stderr).to_lowercase();

    if AUTH_MARKERS.iter().any(|m| combined.contains(m)) {
        return Err(PublishError::Authentication(output.last_line()));
    }

    if skip_existing && ALREADY_EXISTS_MARKERS.iter().any(|m| combined.contains(m)) {
        return Ok(PublishOutcome::AlreadyPublished);
    }

    Err(PublishError::Upload {
        exit_code: output.exit_code,
        message: output.last_line(),
    })
}
