//! Trigger events - what started a pipeline run

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of version-control event that triggers a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "push" => Ok(EventKind::Push),
            "pull_request" | "pull-request" => Ok(EventKind::PullRequest),
            other => Err(format!("Unknown event kind: {}", other)),
        }
    }
}

/// A classified git reference name
///
/// The raw name is kept as given; classification only looks at the prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitRef {
    raw: String,
}

/// What a ref points at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Branch,
    Tag,
    PullRequest,
    Other,
}

const TAGS_PREFIX: &str = "refs/tags/";
const HEADS_PREFIX: &str = "refs/heads/";
const PULL_PREFIX: &str = "refs/pull/";

impl GitRef {
    pub fn new(raw: impl Into<String>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn tag(name: &str) -> Self {
        Self::new(format!("{}{}", TAGS_PREFIX, name))
    }

    pub fn branch(name: &str) -> Self {
        Self::new(format!("{}{}", HEADS_PREFIX, name))
    }

    /// Full ref name, e.g. `refs/tags/v1.2.3`
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn kind(&self) -> RefKind {
        if self.raw.starts_with(TAGS_PREFIX) {
            RefKind::Tag
        } else if self.raw.starts_with(HEADS_PREFIX) {
            RefKind::Branch
        } else if self.raw.starts_with(PULL_PREFIX) {
            RefKind::PullRequest
        } else {
            RefKind::Other
        }
    }

    /// Ref name without its `refs/<kind>/` prefix
    pub fn short_name(&self) -> &str {
        [TAGS_PREFIX, HEADS_PREFIX, PULL_PREFIX]
            .iter()
            .find_map(|prefix| self.raw.strip_prefix(prefix))
            .unwrap_or(&self.raw)
    }
}

impl fmt::Display for GitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// The event a pipeline run reacts to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: EventKind,
    pub git_ref: GitRef,
    /// Commit the event points at, when known
    pub sha: Option<String>,
}

impl TriggerEvent {
    pub fn new(kind: EventKind, ref_name: impl Into<String>) -> Self {
        Self {
            kind,
            git_ref: GitRef::new(ref_name),
            sha: None,
        }
    }

    pub fn with_sha(mut self, sha: impl Into<String>) -> Self {
        self.sha = Some(sha.into());
        self
    }

    /// Revision to check out: the sha if known, the ref otherwise
    pub fn revision(&self) -> &str {
        self.sha.as_deref().unwrap_or(self.git_ref.as_str())
    }
}
