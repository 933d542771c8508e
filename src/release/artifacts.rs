//! Distribution artifacts produced by the build step

use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Source tarball
    Sdist,
    /// Binary distribution
    Wheel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

impl Artifact {
    /// Classify a file by name; other files are not artifacts
    pub fn from_path(path: PathBuf) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        let kind = if name.ends_with(".whl") {
            ArtifactKind::Wheel
        } else if name.ends_with(".tar.gz") || name.ends_with(".zip") {
            ArtifactKind::Sdist
        } else {
            return None;
        };
        Some(Self { path, kind })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Every artifact found in an output directory, sorted by file name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSet {
    pub artifacts: Vec<Artifact>,
}

impl ArtifactSet {
    /// Scan `dist_dir` (not recursive)
    pub fn collect(dist_dir: &Path) -> io::Result<Self> {
        let mut artifacts = Vec::new();
        for entry in std::fs::read_dir(dist_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(artifact) = Artifact::from_path(entry.path()) {
                artifacts.push(artifact);
            }
        }
        artifacts.sort_by_key(|a| a.file_name());
        Ok(Self { artifacts })
    }

    pub fn of_kind(&self, kind: ArtifactKind) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(move |a| a.kind == kind)
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// A release needs both a source tarball and a binary distribution
    pub fn verify_complete(&self) -> Result<(), String> {
        let missing: Vec<&str> = [(ArtifactKind::Sdist, "source distribution"), (ArtifactKind::Wheel, "wheel")]
            .iter()
            .filter(|(kind, _)| self.of_kind(*kind).next().is_none())
            .map(|(_, name)| *name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("Build produced no {}", missing.join(" and no ")))
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.artifacts.iter().map(|a| a.path.clone()).collect()
    }
}
