//! Published value types
//!
//! Both engines publish whole replacement values. Equality here is what the
//! engines use to decide whether anything changed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A workspace folder and its position in workspace ordering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceRoot {
    pub path: PathBuf,
    pub index: usize,
}

impl WorkspaceRoot {
    pub fn new(path: impl Into<PathBuf>, index: usize) -> Self {
        Self {
            path: path.into(),
            index,
        }
    }

    /// Build an ordered root list from paths.
    pub fn from_paths<I, P>(paths: I) -> Vec<Self>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        paths
            .into_iter()
            .enumerate()
            .map(|(index, path)| Self::new(path, index))
            .collect()
    }
}

/// Marker presence for one root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootPresence {
    pub root: WorkspaceRoot,
    pub has_marker: bool,
}

/// Marker presence across the whole workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceStatus {
    pub any_root_has_marker: bool,
    pub roots: Vec<RootPresence>,
}

impl PresenceStatus {
    /// Aggregate per-root results; the flag is the OR of all roots.
    pub fn from_roots(roots: Vec<RootPresence>) -> Self {
        Self {
            any_root_has_marker: roots.iter().any(|r| r.has_marker),
            roots,
        }
    }

    /// Roots that currently carry the marker, in workspace order.
    pub fn marked_roots(&self) -> impl Iterator<Item = &WorkspaceRoot> {
        self.roots.iter().filter(|r| r.has_marker).map(|r| &r.root)
    }
}

/// Where the active spec name came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecSource {
    /// Explicit override variable
    Env,
    /// Current branch of the first repository with one
    Vcs,
    /// Highest-numbered directory under the specs root
    Fallback,
    #[default]
    Unknown,
}

impl SpecSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecSource::Env => "env",
            SpecSource::Vcs => "vcs",
            SpecSource::Fallback => "fallback",
            SpecSource::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for SpecSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The resolved active spec.
///
/// `timestamp` records when the value was computed and takes no part in
/// change detection; see [`ActiveSpecState::same_resolution`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSpecState {
    pub spec_name: Option<String>,
    pub source: SpecSource,
    pub spec_exists: bool,
    pub timestamp: DateTime<Utc>,
}

impl ActiveSpecState {
    /// Neutral value: nothing resolved.
    pub fn unknown() -> Self {
        Self {
            spec_name: None,
            source: SpecSource::Unknown,
            spec_exists: false,
            timestamp: Utc::now(),
        }
    }

    /// Compare everything except the timestamp.
    pub fn same_resolution(&self, other: &Self) -> bool {
        self.spec_name == other.spec_name
            && self.source == other.source
            && self.spec_exists == other.spec_exists
    }
}

impl Default for ActiveSpecState {
    fn default() -> Self {
        Self::unknown()
    }
}
