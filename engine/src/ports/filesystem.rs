//! Filesystem port for stat and directory listing.

use crate::error::Result;
use async_trait::async_trait;
use std::path::Path;

/// Entry type as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
    Other,
}

/// Result of a stat call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub kind: EntryKind,
}

impl FileStat {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Async filesystem access.
///
/// Errors are returned rather than swallowed; callers in this crate treat
/// any error as "absent".
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Stat `path`, following symlinks.
    ///
    /// # Errors
    ///
    /// Returns an error if the path does not exist or cannot be inspected.
    async fn stat(&self, path: &Path) -> Result<FileStat>;

    /// List the immediate entries of a directory, in host order.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a readable directory.
    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>>;
}
