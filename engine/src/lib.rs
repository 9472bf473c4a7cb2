//! Spec workflow status engines
//!
//! Reconciles filesystem, version-control and environment signals for a
//! developer workspace into two change-notified values:
//!
//! - [`PresenceDetector`]: is the spec workflow marker (`.specify/`) present
//!   in any workspace root, and in which ones.
//! - [`ActiveSpecResolver`]: which spec is active right now, by precedence
//!   override variable → VCS branch → highest-numbered spec directory.
//!
//! Both engines talk to the outside world only through the traits in
//! [`ports`]. Live adapters (tokio fs, `notify`, `git2`) and host-driven
//! manual adapters live in [`adapters`].

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod adapters;
pub mod config;
pub mod error;
pub mod event;
pub mod indicator;
pub mod ports;
pub mod presence;
pub mod registry;
pub mod resolver;
pub mod types;

pub use error::{Result, SpecWatchError};
pub use event::{Emitter, Subscription};
pub use indicator::{IndicatorView, StatusIndicator};
pub use presence::{PresenceDetector, PresenceOptions};
pub use resolver::{ActiveSpecResolver, ResolverOptions};
pub use types::{ActiveSpecState, PresenceStatus, RootPresence, SpecSource, WorkspaceRoot};

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Directory whose presence marks a root as spec-workflow enabled
pub const DEFAULT_MARKER_DIR: &str = ".specify";

/// Directory under a workspace root holding one subdirectory per spec
pub const DEFAULT_SPECS_DIR: &str = "specs";

/// File that must exist inside a spec directory for the spec to count
pub const DEFAULT_PRIMARY_DOCUMENT: &str = "spec.md";

/// Environment variable that pins the active spec
pub const DEFAULT_OVERRIDE_VAR: &str = "SPECIFY_FEATURE";

/// Override poll interval in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: i64 = 2000;
