//! Interpreter version matrix

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// An interpreter version such as `3.9` or `3.10.4`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InterpreterVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: Option<u32>,
}

impl FromStr for InterpreterVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("Invalid interpreter version '{}', expected MAJOR.MINOR", s);

        let parts: Vec<&str> = s.trim().split('.').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(invalid());
        }

        let mut numbers = Vec::with_capacity(parts.len());
        for part in &parts {
            if part.is_empty() || !part.chars().all(|c| c.is_ascii_digit()) {
                return Err(invalid());
            }
            numbers.push(part.parse::<u32>().map_err(|_| invalid())?);
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers.get(2).copied(),
        })
    }
}

impl fmt::Display for InterpreterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.patch {
            Some(patch) => write!(f, "{}.{}.{}", self.major, self.minor, patch),
            None => write!(f, "{}.{}", self.major, self.minor),
        }
    }
}

impl Serialize for InterpreterVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// YAML writes `3.8` as a float, so both strings and numbers are accepted
#[derive(Deserialize)]
#[serde(untagged)]
enum RawVersion {
    Text(String),
    Number(f64),
}

impl<'de> Deserialize<'de> for InterpreterVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = match RawVersion::deserialize(deserializer)? {
            RawVersion::Text(s) => s,
            RawVersion::Number(n) => n.to_string(),
        };
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Default matrix axis of the test job
pub fn default_versions() -> Vec<InterpreterVersion> {
    ["3.7", "3.8", "3.9"]
        .iter()
        .filter_map(|v| v.parse().ok())
        .collect()
}

pub const DEFAULT_MAX_PARALLEL: usize = 4;

/// The declared fan-out of a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix {
    pub versions: Vec<InterpreterVersion>,
    pub max_parallel: usize,
}

impl Default for Matrix {
    fn default() -> Self {
        Self {
            versions: default_versions(),
            max_parallel: DEFAULT_MAX_PARALLEL,
        }
    }
}

impl Matrix {
    pub fn new(versions: Vec<InterpreterVersion>, max_parallel: usize) -> Self {
        Self { versions, max_parallel }
    }

    /// One instance per version, in declared order
    pub fn instances(&self, job_id: &str) -> Vec<MatrixInstance> {
        self.versions
            .iter()
            .enumerate()
            .map(|(index, version)| MatrixInstance {
                job_id: job_id.to_string(),
                index,
                version: version.clone(),
            })
            .collect()
    }
}

/// A single fanned-out instance of a job
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MatrixInstance {
    pub job_id: String,
    pub index: usize,
    pub version: InterpreterVersion,
}

impl MatrixInstance {
    /// Display label, e.g. `test (3.8)`
    pub fn label(&self) -> String {
        format!("{} ({})", self.job_id, self.version)
    }
}
