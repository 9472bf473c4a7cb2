//! Error types for port operations
//!
//! Nothing here is fatal to the engines: every variant is absorbed into
//! "absent" by the caller. The taxonomy exists so adapters can say what
//! went wrong and so logs stay useful.

use std::path::PathBuf;
use thiserror::Error;

/// specwatch result type alias
pub type Result<T> = std::result::Result<T, SpecWatchError>;

/// Failures raised by ports and adapters
#[derive(Debug, Error)]
pub enum SpecWatchError {
    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to watch {path}: {message}")]
    Watch { path: PathBuf, message: String },

    #[error("Version control error: {0}")]
    Vcs(String),

    #[error("Location not supported: {0}")]
    Unsupported(PathBuf),
}

impl SpecWatchError {
    /// True when the failure means the target simply is not there.
    pub fn is_not_found(&self) -> bool {
        match self {
            SpecWatchError::Stat { source, .. } | SpecWatchError::ReadDir { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

impl From<git2::Error> for SpecWatchError {
    fn from(err: git2::Error) -> Self {
        SpecWatchError::Vcs(err.message().to_string())
    }
}
