//! Workspace host port: root enumeration, root-set changes, marker watches.

use crate::error::Result;
use crate::event::Subscription;
use crate::types::WorkspaceRoot;
use std::path::Path;
use std::sync::Arc;

/// Roots added and removed by one root-set change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootsChange {
    pub added: Vec<WorkspaceRoot>,
    pub removed: Vec<WorkspaceRoot>,
}

impl RootsChange {
    /// Diff two root lists by path.
    pub fn between(previous: &[WorkspaceRoot], next: &[WorkspaceRoot]) -> Self {
        let added = next
            .iter()
            .filter(|root| !previous.iter().any(|p| p.path == root.path))
            .cloned()
            .collect();
        let removed = previous
            .iter()
            .filter(|root| !next.iter().any(|n| n.path == root.path))
            .cloned()
            .collect();
        Self { added, removed }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// What happened to a watched marker path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerEvent {
    Created,
    Changed,
    Deleted,
}

pub type MarkerListener = Arc<dyn Fn(MarkerEvent) + Send + Sync>;

/// The host that owns the workspace root set.
pub trait WorkspaceHost: Send + Sync {
    /// Current roots, in workspace order.
    fn roots(&self) -> Vec<WorkspaceRoot>;

    /// Subscribe to root-set replacement.
    fn on_roots_changed(&self, listener: Box<dyn Fn(&RootsChange) + Send + Sync>) -> Subscription;

    /// Watch `<root>/<name>` for create, change and delete.
    ///
    /// # Errors
    ///
    /// Returns an error when the root cannot be watched (unsupported
    /// location, watcher limits, missing directory).
    fn watch_marker(&self, root: &Path, name: &str, listener: MarkerListener)
    -> Result<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_roots_change_between() {
        let previous = WorkspaceRoot::from_paths(["/ws/a", "/ws/b"]);
        let next = WorkspaceRoot::from_paths(["/ws/b", "/ws/c"]);

        let change = RootsChange::between(&previous, &next);

        assert_eq!(change.added, vec![WorkspaceRoot::new("/ws/c", 1)]);
        assert_eq!(change.removed, vec![WorkspaceRoot::new("/ws/a", 0)]);
        assert!(RootsChange::between(&next, &next).is_empty());
    }
}
