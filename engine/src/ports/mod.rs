//! Port traits defining external boundaries.
//!
//! Each trait is a boundary between the engines and a host subsystem
//! (workspace roots, filesystem, override variable, version control).
//! Implementations live in `src/adapters/`.

pub mod filesystem;
pub mod override_source;
pub mod vcs;
pub mod workspace;

pub use filesystem::{DirEntry, EntryKind, FileStat, FileSystem};
pub use override_source::{EnvOverride, OverrideSource, normalize_name};
pub use vcs::{NoVcs, Repository, VcsProvider, VcsProviderFactory};
pub use workspace::{MarkerEvent, MarkerListener, RootsChange, WorkspaceHost};
