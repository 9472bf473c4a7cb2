use crate::event::{Emitter, Subscription};
use crate::ports::RootsChange;
use crate::types::WorkspaceRoot;
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock};

/// Settable root list that announces replacements.
pub(crate) struct RootSet {
    roots: RwLock<Vec<WorkspaceRoot>>,
    changed: Emitter<RootsChange>,
}

impl RootSet {
    pub(crate) fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: RwLock::new(WorkspaceRoot::from_paths(paths)),
            changed: Emitter::new(),
        }
    }

    pub(crate) fn get(&self) -> Vec<WorkspaceRoot> {
        self.roots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the root list and notify listeners with the diff.
    ///
    /// Listeners run after the write lock is released, so they may call
    /// back into [`RootSet::get`].
    pub(crate) fn set<I, P>(&self, paths: I) -> RootsChange
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let next = WorkspaceRoot::from_paths(paths);
        let change = {
            let mut roots = self.roots.write().unwrap_or_else(PoisonError::into_inner);
            let change = RootsChange::between(&roots, &next);
            *roots = next;
            change
        };
        self.changed.fire(&change);
        change
    }

    pub(crate) fn subscribe(
        &self,
        listener: Box<dyn Fn(&RootsChange) + Send + Sync>,
    ) -> Subscription {
        self.changed.subscribe(move |change| listener(change))
    }
}
