//! Isolated working directories for job instances

use crate::core::trigger::{EventKind, GitRef, TriggerEvent};
use crate::execution::runner::{CommandRunner, CommandSpec, RunnerError};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};

/// Scratch space of one job instance: `src/` holds the checkout, `venv/` the
/// interpreter environment, so cleaning the checkout keeps the environment.
#[derive(Debug)]
pub struct InstanceWorkspace {
    root: TempDir,
}

impl InstanceWorkspace {
    /// Create a fresh directory; `keep` leaves it on disk after the run
    pub fn create(label: &str, keep: bool) -> io::Result<Self> {
        let prefix = format!("release-pipeline-{}-", slug(label));
        let root = tempfile::Builder::new().prefix(&prefix).keep(keep).tempdir()?;
        if keep {
            info!("Keeping workspace for {} at {}", label, root.path().display());
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        self.root.path()
    }

    pub fn src_dir(&self) -> PathBuf {
        self.root.path().join("src")
    }

    pub fn venv_dir(&self) -> PathBuf {
        self.root.path().join("venv")
    }

    /// Interpreter inside the provisioned environment
    pub fn python(&self) -> PathBuf {
        if cfg!(windows) {
            self.venv_dir().join("Scripts").join("python.exe")
        } else {
            self.venv_dir().join("bin").join("python")
        }
    }

    /// Clone `repository` and detach at `revision`
    pub fn checkout_commands(&self, repository: &Path, revision: &str) -> Vec<CommandSpec> {
        let src = self.src_dir();
        vec![
            CommandSpec::new("git")
                .args(["clone", "--quiet", "--no-hardlinks"])
                .arg(repository.to_string_lossy())
                .arg(src.to_string_lossy())
                .cwd(self.root()),
            CommandSpec::new("git")
                .args(["checkout", "--quiet", "--detach", revision])
                .cwd(&src),
        ]
    }

    /// `<interpreter> -m venv <venv>`; the interpreter may carry arguments (`py -3.9`)
    pub fn venv_command(&self, interpreter: &str) -> CommandSpec {
        let mut parts = interpreter.split_whitespace();
        let program = parts.next().unwrap_or("python3");
        CommandSpec::new(program)
            .args(parts)
            .args(["-m", "venv"])
            .arg(self.venv_dir().to_string_lossy())
            .cwd(self.root())
    }

    pub fn clean_command(&self) -> CommandSpec {
        CommandSpec::new("git").args(["clean", "-dfx"]).cwd(self.src_dir())
    }
}

fn slug(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

/// Work out the trigger from the repository's current HEAD
///
/// HEAD exactly on a tag yields `refs/tags/<tag>`, otherwise the checked out
/// branch; a detached HEAD without a tag yields the plain `HEAD` ref.
pub async fn detect_trigger<R: CommandRunner + ?Sized>(
    runner: &R,
    repository: &Path,
    kind: EventKind,
) -> Result<TriggerEvent, RunnerError> {
    let git = |args: &[&str]| {
        CommandSpec::new("git")
            .args(args.iter().copied())
            .cwd(repository)
    };

    let tag = runner
        .run(&git(&["describe", "--exact-match", "--tags", "HEAD"]), None)
        .await?;
    let git_ref = if tag.success() && !tag.stdout.trim().is_empty() {
        GitRef::tag(tag.stdout.trim())
    } else {
        let head = runner.run(&git(&["symbolic-ref", "-q", "HEAD"]), None).await?;
        if head.success() && !head.stdout.trim().is_empty() {
            GitRef::new(head.stdout.trim())
        } else {
            GitRef::new("HEAD")
        }
    };

    let mut event = TriggerEvent {
        kind,
        git_ref,
        sha: None,
    };

    let sha = runner.run(&git(&["rev-parse", "HEAD"]), None).await?;
    if sha.success() && !sha.stdout.trim().is_empty() {
        event.sha = Some(sha.stdout.trim().to_string());
    }

    debug!("Detected trigger: {} {} ({:?})", event.kind, event.git_ref, event.sha);
    Ok(event)
}

#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("Cannot resolve '{git_ref}' to a commit: {reason}")]
    Unresolved { git_ref: String, reason: String },

    #[error(transparent)]
    Runner(#[from] RunnerError),
}

/// Resolve `git_ref` to a commit sha inside `repository`
///
/// Instances check out a detached sha, since a fresh clone only carries the
/// default branch locally and `refs/heads/<name>` would not resolve there.
pub async fn resolve_revision<R: CommandRunner + ?Sized>(
    runner: &R,
    repository: &Path,
    git_ref: &str,
) -> Result<String, RevisionError> {
    let spec = CommandSpec::new("git")
        .args(["rev-parse", "--verify", "--quiet"])
        .arg(format!("{}^{{commit}}", git_ref))
        .cwd(repository);
    let output = runner.run(&spec, None).await?;

    let sha = output.stdout.trim();
    if !output.success() || sha.is_empty() {
        let mut reason = output.last_line();
        if reason.is_empty() {
            reason = format!("git rev-parse exited with code {}", output.exit_code);
        }
        return Err(RevisionError::Unresolved {
            git_ref: git_ref.to_string(),
            reason,
        });
    }

    debug!("Resolved {} to {}", git_ref, sha);
    Ok(sha.to_string())
}
