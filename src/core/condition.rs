//! Release gate - decides whether the release job may leave `Pending`

use crate::core::{state::JobState, trigger::TriggerEvent};
use regex::Regex;
use std::fmt;

pub const DEFAULT_RELEASE_REF_PREFIX: &str = "refs/tags/";

/// Pattern matched against the full ref name
#[derive(Debug, Clone)]
pub enum RefPattern {
    /// Ref must start with this prefix
    Prefix(String),
    /// Regular expression match
    Regex(Regex),
}

impl RefPattern {
    /// Build a pattern from config, compiling it when `use_regex` is set
    pub fn from_config(pattern: &str, use_regex: bool) -> Result<Self, regex::Error> {
        if use_regex {
            Ok(RefPattern::Regex(Regex::new(pattern)?))
        } else {
            Ok(RefPattern::Prefix(pattern.to_string()))
        }
    }

    pub fn matches(&self, ref_name: &str) -> bool {
        match self {
            RefPattern::Prefix(prefix) => ref_name.starts_with(prefix.as_str()),
            RefPattern::Regex(regex) => regex.is_match(ref_name),
        }
    }
}

impl Default for RefPattern {
    fn default() -> Self {
        RefPattern::Prefix(DEFAULT_RELEASE_REF_PREFIX.to_string())
    }
}

impl fmt::Display for RefPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefPattern::Prefix(prefix) => write!(f, "{}*", prefix),
            RefPattern::Regex(regex) => write!(f, "[regex: {}]", regex.as_str()),
        }
    }
}

/// Why the release job did not run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The test job did not succeed
    UpstreamNotSucceeded { upstream: String, state: &'static str },
    /// The ref does not mark a release point
    RefNotReleasable { ref_name: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::UpstreamNotSucceeded { upstream, state } => {
                write!(f, "needs '{}' which is {}", upstream, state)
            }
            SkipReason::RefNotReleasable { ref_name } => {
                write!(f, "ref '{}' is not a release tag", ref_name)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Run,
    Skip(SkipReason),
}

impl GateDecision {
    pub fn should_run(&self) -> bool {
        matches!(self, GateDecision::Run)
    }
}

/// Guard on the release job: upstream success AND a releasable ref
#[derive(Debug, Clone, Default)]
pub struct ReleaseGate {
    pub ref_pattern: RefPattern,
}

impl ReleaseGate {
    pub fn new(ref_pattern: RefPattern) -> Self {
        Self { ref_pattern }
    }

    /// Whether the event's ref alone would allow a release
    pub fn ref_allows_release(&self, event: &TriggerEvent) -> bool {
        self.ref_pattern.matches(event.git_ref.as_str())
    }

    /// Evaluate the gate once the upstream job has finished
    pub fn evaluate(&self, event: &TriggerEvent, upstream_id: &str, upstream: &JobState) -> GateDecision {
        if !upstream.is_succeeded() {
            return GateDecision::Skip(SkipReason::UpstreamNotSucceeded {
                upstream: upstream_id.to_string(),
                state: upstream.name(),
            });
        }

        if !self.ref_allows_release(event) {
            return GateDecision::Skip(SkipReason::RefNotReleasable {
                ref_name: event.git_ref.as_str().to_string(),
            });
        }

        GateDecision::Run
    }
}
