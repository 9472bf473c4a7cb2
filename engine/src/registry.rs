//! Keyed registry of disposable handles.
//!
//! Used for the per-root marker watchers and the per-repository HEAD
//! subscriptions: both follow a set that the host replaces wholesale, and
//! both must hold exactly one live handle per member.

use crate::event::Subscription;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Result of one [`HandleRegistry::reconcile`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub created: usize,
    pub disposed: usize,
    /// Keys whose handle could not be created this pass.
    pub failed: usize,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.disposed == 0 && self.failed == 0
    }
}

/// Identity → handle map kept in step with an external set.
#[derive(Debug)]
pub struct HandleRegistry<K> {
    handles: HashMap<K, Subscription>,
}

impl<K: Eq + Hash + Clone> HandleRegistry<K> {
    pub fn new() -> Self {
        Self {
            handles: HashMap::new(),
        }
    }

    /// Bring the registry in line with `keys`.
    ///
    /// New keys get a handle from `create` (`None` means creation failed and
    /// the key stays unregistered until the next pass). Keys no longer
    /// present are disposed and removed. Existing keys are left untouched.
    pub fn reconcile<I, F>(&mut self, keys: I, mut create: F) -> ReconcileOutcome
    where
        I: IntoIterator<Item = K>,
        F: FnMut(&K) -> Option<Subscription>,
    {
        let mut outcome = ReconcileOutcome::default();
        let expected: HashSet<K> = keys.into_iter().collect();

        for key in &expected {
            if self.handles.contains_key(key) {
                continue;
            }
            match create(key) {
                Some(handle) => {
                    self.handles.insert(key.clone(), handle);
                    outcome.created += 1;
                }
                None => outcome.failed += 1,
            }
        }

        let stale: Vec<K> = self
            .handles
            .keys()
            .filter(|key| !expected.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            if self.remove(&key) {
                outcome.disposed += 1;
            }
        }

        outcome
    }

    /// Register a handle for `key` unless one already exists.
    ///
    /// Returns `true` when `create` ran and produced a handle.
    pub fn insert_with<F>(&mut self, key: K, create: F) -> bool
    where
        F: FnOnce(&K) -> Option<Subscription>,
    {
        if self.handles.contains_key(&key) {
            return false;
        }
        match create(&key) {
            Some(handle) => {
                self.handles.insert(key, handle);
                true
            }
            None => false,
        }
    }

    /// Dispose and forget the handle for `key`.
    pub fn remove(&mut self, key: &K) -> bool {
        match self.handles.remove(key) {
            Some(mut handle) => {
                handle.dispose();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.handles.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Dispose every handle. Safe to call repeatedly.
    pub fn dispose_all(&mut self) {
        for (_, mut handle) in self.handles.drain() {
            handle.dispose();
        }
    }
}

impl<K: Eq + Hash + Clone> Default for HandleRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}
