//! Marker presence detection across workspace roots.
//!
//! # Triggers
//!
//! ```text
//! refresh() ───────────────┐
//! roots changed ─ resync ──┼──▶ refresh(): stat <root>/<marker> for every root
//! marker watcher event ────┘              (concurrently), OR the flags,
//!                                          publish only if the value changed
//! ```
//!
//! Every trigger funnels into [`PresenceDetector::refresh`]; refreshes are
//! serialized, and the published value is swapped only after all per-root
//! checks have settled.

use crate::config::PresenceConfig;
use crate::event::{Emitter, Subscription};
use crate::ports::{FileSystem, MarkerEvent, MarkerListener, RootsChange, WorkspaceHost};
use crate::registry::HandleRegistry;
use crate::types::{PresenceStatus, RootPresence, WorkspaceRoot};
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Presence detector settings.
#[derive(Debug, Clone)]
pub struct PresenceOptions {
    /// Marker directory name looked up under every root
    pub marker_dir: String,
}

impl Default for PresenceOptions {
    fn default() -> Self {
        Self {
            marker_dir: crate::DEFAULT_MARKER_DIR.to_string(),
        }
    }
}

impl From<&PresenceConfig> for PresenceOptions {
    fn from(config: &PresenceConfig) -> Self {
        Self {
            marker_dir: config.marker_dir.clone(),
        }
    }
}

/// Watches workspace roots for the marker directory.
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct PresenceDetector {
    inner: Arc<DetectorInner>,
}

struct DetectorInner {
    host: Arc<dyn WorkspaceHost>,
    fs: Arc<dyn FileSystem>,
    options: PresenceOptions,

    /// Last published status (swapped whole, never mutated in place).
    status: RwLock<Arc<PresenceStatus>>,
    changed: Emitter<PresenceStatus>,

    /// One watcher per root; `None` once disposed.
    watchers: Mutex<Option<HandleRegistry<PathBuf>>>,
    /// Host subscriptions; `None` once disposed.
    subscriptions: Mutex<Option<Vec<Subscription>>>,

    refresh_gate: tokio::sync::Mutex<()>,
    runtime: OnceLock<Handle>,
    disposed: AtomicBool,
}

impl PresenceDetector {
    pub fn new(
        host: Arc<dyn WorkspaceHost>,
        fs: Arc<dyn FileSystem>,
        options: PresenceOptions,
    ) -> Self {
        Self {
            inner: Arc::new(DetectorInner {
                host,
                fs,
                options,
                status: RwLock::new(Arc::new(PresenceStatus::default())),
                changed: Emitter::new(),
                watchers: Mutex::new(Some(HandleRegistry::new())),
                subscriptions: Mutex::new(Some(Vec::new())),
                refresh_gate: tokio::sync::Mutex::new(()),
                runtime: OnceLock::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe to root changes, then run the first full scan.
    ///
    /// Watchers are created by the scan. Calling this after
    /// [`PresenceDetector::dispose`] does nothing.
    pub async fn initialize(&self) {
        let inner = &self.inner;
        if inner.is_disposed() {
            return;
        }
        if let Ok(handle) = Handle::try_current() {
            let _ = inner.runtime.set(handle);
        }

        let weak = Arc::downgrade(inner);
        let subscription = inner.host.on_roots_changed(Box::new(move |change: &RootsChange| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            tracing::debug!(
                added = change.added.len(),
                removed = change.removed.len(),
                "Workspace roots changed"
            );
            inner.sync_watchers(&inner.host.roots());
            DetectorInner::schedule_refresh(&inner);
        }));
        inner.register(subscription);

        inner.refresh().await;
    }

    /// Recompute presence for every root and publish if it changed.
    pub async fn refresh(&self) {
        self.inner.refresh().await;
    }

    /// Latest published status.
    pub fn current_status(&self) -> Arc<PresenceStatus> {
        self.inner.current()
    }

    /// Receive every future status change.
    pub fn on_status_changed<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&PresenceStatus) + Send + Sync + 'static,
    {
        self.inner.changed.subscribe(listener)
    }

    /// Channel form of [`PresenceDetector::on_status_changed`].
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<PresenceStatus>) {
        self.inner.changed.subscribe_channel()
    }

    /// Number of live marker watchers.
    pub fn watcher_count(&self) -> usize {
        lock(&self.inner.watchers)
            .as_ref()
            .map_or(0, HandleRegistry::len)
    }

    /// Release watchers, subscriptions and the change channel. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl DetectorInner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn current(&self) -> Arc<PresenceStatus> {
        Arc::clone(&self.status.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Keep `subscription` until disposal; dispose it at once if already disposed.
    fn register(&self, mut subscription: Subscription) {
        match lock(&self.subscriptions).as_mut() {
            Some(subscriptions) => subscriptions.push(subscription),
            None => subscription.dispose(),
        }
    }

    fn schedule_refresh(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        let Some(runtime) = self.runtime.get() else {
            tracing::debug!("Presence refresh requested before initialize; ignoring");
            return;
        };
        let weak = Arc::downgrade(self);
        runtime.spawn(async move {
            if let Some(inner) = weak.upgrade() {
                inner.refresh().await;
            }
        });
    }

    fn marker_listener(self: &Arc<Self>) -> MarkerListener {
        let weak: Weak<Self> = Arc::downgrade(self);
        Arc::new(move |event: MarkerEvent| {
            if let Some(inner) = weak.upgrade() {
                tracing::trace!(?event, "Marker watcher fired");
                inner.schedule_refresh();
            }
        })
    }

    /// Create watchers for new roots and dispose those of vanished roots.
    fn sync_watchers(self: &Arc<Self>, roots: &[WorkspaceRoot]) {
        let mut guard = lock(&self.watchers);
        let Some(registry) = guard.as_mut() else {
            return;
        };
        let outcome = registry.reconcile(roots.iter().map(|r| r.path.clone()), |path| {
            match self
                .host
                .watch_marker(path, &self.options.marker_dir, self.marker_listener())
            {
                Ok(subscription) => Some(subscription),
                Err(err) => {
                    tracing::debug!(root = %path.display(), "Marker watcher unavailable: {err}");
                    None
                }
            }
        });
        if !outcome.is_noop() {
            tracing::trace!(?outcome, "Marker watchers reconciled");
        }
    }

    async fn refresh(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        let _gate = self.refresh_gate.lock().await;
        if self.is_disposed() {
            return;
        }

        let roots = self.host.roots();
        self.sync_watchers(&roots);

        let checks = roots.iter().map(|root| self.has_marker(root));
        let flags = join_all(checks).await;
        let next = PresenceStatus::from_roots(
            roots
                .into_iter()
                .zip(flags)
                .map(|(root, has_marker)| RootPresence { root, has_marker })
                .collect(),
        );

        self.publish(next);
    }

    async fn has_marker(&self, root: &WorkspaceRoot) -> bool {
        let marker = root.path.join(&self.options.marker_dir);
        match self.fs.stat(&marker).await {
            Ok(stat) => stat.is_dir(),
            Err(err) => {
                if !err.is_not_found() {
                    tracing::debug!(marker = %marker.display(), "Marker check failed: {err}");
                }
                false
            }
        }
    }

    fn publish(&self, next: PresenceStatus) {
        if self.is_disposed() {
            return;
        }
        {
            let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
            if **status == next {
                return;
            }
            *status = Arc::new(next.clone());
        }
        tracing::info!(
            any_root_has_marker = next.any_root_has_marker,
            roots = next.roots.len(),
            "Presence status changed"
        );
        self.changed.fire(&next);
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let registry = lock(&self.watchers).take();
        if let Some(mut registry) = registry {
            registry.dispose_all();
        }
        let subscriptions = lock(&self.subscriptions).take();
        for mut subscription in subscriptions.into_iter().flatten() {
            subscription.dispose();
        }
        self.changed.close();
    }
}

impl Drop for DetectorInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{LocalFileSystem, ManualWorkspace};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn detector(workspace: &Arc<ManualWorkspace>) -> PresenceDetector {
        PresenceDetector::new(
            workspace.clone(),
            Arc::new(LocalFileSystem),
            PresenceOptions::default(),
        )
    }

    #[tokio::test]
    async fn test_default_status_before_initialize() {
        let workspace = Arc::new(ManualWorkspace::new(Vec::<PathBuf>::new()));
        let detector = detector(&workspace);

        let status = detector.current_status();
        assert!(!status.any_root_has_marker);
        assert!(status.roots.is_empty());
    }

    #[tokio::test]
    async fn test_marker_file_is_not_a_marker() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".specify"), "not a directory").unwrap();
        let workspace = Arc::new(ManualWorkspace::new([dir.path()]));
        let detector = detector(&workspace);

        detector.initialize().await;

        let status = detector.current_status();
        assert_eq!(status.roots.len(), 1);
        assert!(!status.roots[0].has_marker);
        assert!(!status.any_root_has_marker);
        detector.dispose();
    }

    #[tokio::test]
    async fn test_missing_root_counts_as_absent() {
        let dir = TempDir::new().unwrap();
        let gone = dir.path().join("gone");
        let workspace = Arc::new(ManualWorkspace::new([gone.clone()]));
        let detector = detector(&workspace);

        detector.initialize().await;

        assert_eq!(
            detector.current_status().roots,
            vec![RootPresence {
                root: WorkspaceRoot::new(gone, 0),
                has_marker: false
            }]
        );
        detector.dispose();
    }

    #[tokio::test]
    async fn test_refresh_after_dispose_is_noop() {
        let dir = TempDir::new().unwrap();
        let workspace = Arc::new(ManualWorkspace::new([dir.path()]));
        let detector = detector(&workspace);
        detector.initialize().await;
        detector.dispose();

        fs::create_dir(dir.path().join(".specify")).unwrap();
        detector.refresh().await;

        assert!(!detector.current_status().any_root_has_marker);
        assert_eq!(workspace.watcher_count(), 0);
    }
}
