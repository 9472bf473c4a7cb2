//! Port implementations.
//!
//! - [`local`]: real disk I/O via `tokio::fs`, marker watchers via `notify`.
//! - [`git`]: branch lookup and HEAD watching via `git2` and `notify`.
//! - [`manual`]: in-process hosts driven by the embedder (editor plugins
//!   forwarding their own events, tests).

pub mod git;
pub mod local;
pub mod manual;
mod roots;

pub use git::{GitProvider, GitProviderFactory, GitRepository};
pub use local::{LocalFileSystem, LocalWorkspace};
pub use manual::{ManualRepository, ManualVcs, ManualVcsFactory, ManualWorkspace};
pub(crate) use roots::RootSet;
