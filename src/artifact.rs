//! Artifact-level data model shared by the scanner, cache and engine.

use std::fmt;
use std::path::{Path, PathBuf};

/// Selects the handler method invoked per artifact and the cache direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Apply artifacts that are not already stamped as applied.
    Apply,
    /// Apply every artifact, ignoring existing stamps.
    Reapply,
    /// Remove every artifact and erase its stamp.
    Remove,
}

impl RunMode {
    /// Whether the scanner may skip artifacts already stamped as applied.
    pub fn skips_applied(self) -> bool {
        matches!(self, RunMode::Apply)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RunMode::Apply => "apply",
            RunMode::Reapply => "reapply",
            RunMode::Remove => "remove",
        };
        f.write_str(label)
    }
}

/// Which kind of package the artifacts of an engine belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfigKind {
    Application,
    Service,
    /// Boot-time scan of the shared configuration tree.
    #[default]
    Unknown,
}

/// Stamp file name for an artifact: the path with separators flattened.
pub fn stamp_name(artifact: &Path) -> String {
    artifact.to_string_lossy().replace('/', "_")
}

/// Artifacts processed during a pass, split by outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    applied: Vec<PathBuf>,
    failed: Vec<PathBuf>,
}

impl PassOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Artifacts applied (or removed) successfully.
    pub fn applied(&self) -> &[PathBuf] {
        &self.applied
    }

    /// Artifacts that failed at any stage.
    pub fn failed(&self) -> &[PathBuf] {
        &self.failed
    }

    pub fn record_applied(&mut self, artifact: impl Into<PathBuf>) {
        self.applied.push(artifact.into());
    }

    pub fn record_failed(&mut self, artifact: impl Into<PathBuf>) {
        self.failed.push(artifact.into());
    }

    /// Append another outcome (e.g. one engine's) to this aggregate.
    pub fn merge(&mut self, other: &PassOutcome) {
        self.applied.extend(other.applied.iter().cloned());
        self.failed.extend(other.failed.iter().cloned());
    }

    /// Clear both lists before the next logical pass.
    pub fn reset(&mut self) {
        self.applied.clear();
        self.failed.clear();
    }

    pub fn total(&self) -> usize {
        self.applied.len() + self.failed.len()
    }
}
