//! Host-driven adapters.
//!
//! These hold no OS resources. The embedding host (or a test) pushes root
//! changes, marker events and repository state into them, and they fan the
//! events out to whatever the engines subscribed.

use crate::adapters::RootSet;
use crate::error::{Result, SpecWatchError};
use crate::event::{Emitter, Subscription};
use crate::ports::vcs::{RepositoryListener, SignalListener};
use crate::ports::{
    MarkerEvent, MarkerListener, Repository, RootsChange, VcsProvider, VcsProviderFactory,
    WorkspaceHost,
};
use crate::types::WorkspaceRoot;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Workspace whose roots and marker events are supplied by the caller.
pub struct ManualWorkspace {
    roots: RootSet,
    watchers: Mutex<HashMap<PathBuf, Arc<Emitter<MarkerEvent>>>>,
    unwatchable: Mutex<HashSet<PathBuf>>,
}

impl ManualWorkspace {
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: RootSet::new(paths),
            watchers: Mutex::new(HashMap::new()),
            unwatchable: Mutex::new(HashSet::new()),
        }
    }

    /// Replace the root list; subscribers receive the diff.
    pub fn set_roots<I, P>(&self, paths: I) -> RootsChange
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.roots.set(paths)
    }

    /// Deliver a marker event to the watchers registered for `root`.
    ///
    /// Returns `false` when nothing is watching that root.
    pub fn fire_marker_event(&self, root: &Path, event: MarkerEvent) -> bool {
        let emitter = lock(&self.watchers).get(root).cloned();
        match emitter {
            Some(emitter) if emitter.listener_count() > 0 => {
                emitter.fire(&event);
                true
            }
            _ => false,
        }
    }

    /// Make future `watch_marker` calls for `root` fail.
    pub fn refuse_watch(&self, root: impl Into<PathBuf>) {
        lock(&self.unwatchable).insert(root.into());
    }

    /// Live watchers across all roots.
    pub fn watcher_count(&self) -> usize {
        lock(&self.watchers)
            .values()
            .map(|emitter| emitter.listener_count())
            .sum()
    }

    pub fn is_watching(&self, root: &Path) -> bool {
        lock(&self.watchers)
            .get(root)
            .is_some_and(|emitter| emitter.listener_count() > 0)
    }
}

impl WorkspaceHost for ManualWorkspace {
    fn roots(&self) -> Vec<WorkspaceRoot> {
        self.roots.get()
    }

    fn on_roots_changed(&self, listener: Box<dyn Fn(&RootsChange) + Send + Sync>) -> Subscription {
        self.roots.subscribe(listener)
    }

    fn watch_marker(
        &self,
        root: &Path,
        _name: &str,
        listener: MarkerListener,
    ) -> Result<Subscription> {
        if lock(&self.unwatchable).contains(root) {
            return Err(SpecWatchError::Unsupported(root.to_path_buf()));
        }
        let emitter = Arc::clone(
            lock(&self.watchers)
                .entry(root.to_path_buf())
                .or_insert_with(|| Arc::new(Emitter::new())),
        );
        Ok(emitter.subscribe(move |event: &MarkerEvent| listener(*event)))
    }
}

/// Repository whose branch is set by the caller.
pub struct ManualRepository {
    root: PathBuf,
    head: Mutex<Option<String>>,
    head_changed: Emitter<()>,
}

impl ManualRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            head: Mutex::new(None),
            head_changed: Emitter::new(),
        }
    }

    /// Move HEAD to `branch` (`None` = detached) and announce it.
    pub fn set_head(&self, branch: Option<&str>) {
        *lock(&self.head) = branch.map(str::to_string);
        self.head_changed.fire(&());
    }

    pub fn head_listener_count(&self) -> usize {
        self.head_changed.listener_count()
    }
}

impl Repository for ManualRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    fn head_branch(&self) -> Option<String> {
        lock(&self.head).clone()
    }

    fn on_head_changed(&self, listener: SignalListener) -> Subscription {
        self.head_changed.subscribe(move |_: &()| listener())
    }
}

/// Provider whose repository set is managed by the caller.
#[derive(Default)]
pub struct ManualVcs {
    repositories: Mutex<Vec<Arc<ManualRepository>>>,
    opened: Emitter<Arc<dyn Repository>>,
    closed: Emitter<Arc<dyn Repository>>,
    state_changed: Emitter<()>,
}

impl ManualVcs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a repository at `root` and announce it.
    pub fn add_repository(&self, root: impl Into<PathBuf>) -> Arc<ManualRepository> {
        let repository = Arc::new(ManualRepository::new(root));
        lock(&self.repositories).push(Arc::clone(&repository));
        let announced: Arc<dyn Repository> = repository.clone();
        self.opened.fire(&announced);
        repository
    }

    /// Close the repository at `root`, if open, and announce it.
    pub fn remove_repository(&self, root: &Path) -> bool {
        let removed = {
            let mut repositories = lock(&self.repositories);
            let position = repositories.iter().position(|r| r.root() == root);
            position.map(|index| repositories.remove(index))
        };
        match removed {
            Some(repository) => {
                let announced: Arc<dyn Repository> = repository;
                self.closed.fire(&announced);
                true
            }
            None => false,
        }
    }

    pub fn fire_state_changed(&self) {
        self.state_changed.fire(&());
    }

    /// Subscriptions currently held on provider-level events.
    pub fn listener_count(&self) -> usize {
        self.opened.listener_count()
            + self.closed.listener_count()
            + self.state_changed.listener_count()
    }
}

impl VcsProvider for ManualVcs {
    fn repositories(&self) -> Vec<Arc<dyn Repository>> {
        lock(&self.repositories)
            .iter()
            .map(|r| Arc::clone(r) as Arc<dyn Repository>)
            .collect()
    }

    fn on_repository_opened(&self, listener: RepositoryListener) -> Subscription {
        self.opened.subscribe(move |repo: &Arc<dyn Repository>| listener(repo))
    }

    fn on_repository_closed(&self, listener: RepositoryListener) -> Subscription {
        self.closed.subscribe(move |repo: &Arc<dyn Repository>| listener(repo))
    }

    fn on_state_changed(&self, listener: SignalListener) -> Subscription {
        self.state_changed.subscribe(move |_: &()| listener())
    }
}

/// Factory handing out a [`ManualVcs`] once it is marked available.
pub struct ManualVcsFactory {
    provider: Arc<ManualVcs>,
    available: AtomicBool,
    failing: AtomicBool,
    activations: AtomicUsize,
    delay: Option<Duration>,
}

impl ManualVcsFactory {
    pub fn new(provider: Arc<ManualVcs>) -> Self {
        Self {
            provider,
            available: AtomicBool::new(true),
            failing: AtomicBool::new(false),
            activations: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Start unavailable, as when the host's VCS integration is not loaded yet.
    pub fn unavailable(provider: Arc<ManualVcs>) -> Self {
        let factory = Self::new(provider);
        factory.available.store(false, Ordering::SeqCst);
        factory
    }

    /// Make each activation take `delay` before answering.
    pub fn with_activation_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make activations return an error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of activation attempts so far.
    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VcsProviderFactory for ManualVcsFactory {
    async fn activate(&self) -> Result<Option<Arc<dyn VcsProvider>>> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(SpecWatchError::Vcs("activation failed".to_string()));
        }
        if !self.available.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(Arc::clone(&self.provider) as Arc<dyn VcsProvider>))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_marker_events_reach_root_watchers_only() {
        let workspace = ManualWorkspace::new(["/ws/a", "/ws/b"]);
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_clone = Arc::clone(&hits);
        let _watch = workspace
            .watch_marker(
                Path::new("/ws/a"),
                ".specify",
                Arc::new(move |_: MarkerEvent| {
                    hits_clone.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();

        assert!(workspace.fire_marker_event(Path::new("/ws/a"), MarkerEvent::Created));
        assert!(!workspace.fire_marker_event(Path::new("/ws/b"), MarkerEvent::Created));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(workspace.watcher_count(), 1);
    }

    #[test]
    fn test_refused_root_cannot_be_watched() {
        let workspace = ManualWorkspace::new(["/remote/x"]);
        workspace.refuse_watch("/remote/x");
        let result =
            workspace.watch_marker(Path::new("/remote/x"), ".specify", Arc::new(|_: MarkerEvent| {}));
        assert!(matches!(result, Err(SpecWatchError::Unsupported(_))));
    }

    #[test]
    fn test_repository_open_close_events() {
        let vcs = ManualVcs::new();
        let opened = Arc::new(Mutex::new(Vec::new()));
        let opened_clone = Arc::clone(&opened);
        let _sub = vcs.on_repository_opened(Box::new(move |repo: &Arc<dyn Repository>| {
            opened_clone.lock().unwrap().push(repo.root().to_path_buf());
        }));

        let repo = vcs.add_repository("/ws/a");
        repo.set_head(Some("001-x"));

        assert_eq!(*opened.lock().unwrap(), vec![PathBuf::from("/ws/a")]);
        assert_eq!(vcs.repositories()[0].head_branch().as_deref(), Some("001-x"));
        assert!(vcs.remove_repository(Path::new("/ws/a")));
        assert!(!vcs.remove_repository(Path::new("/ws/a")));
        assert!(vcs.repositories().is_empty());
    }

    #[tokio::test]
    async fn test_factory_availability_toggle() {
        let factory = ManualVcsFactory::unavailable(Arc::new(ManualVcs::new()));
        assert!(factory.activate().await.unwrap().is_none());

        factory.set_available(true);
        assert!(factory.activate().await.unwrap().is_some());

        factory.set_failing(true);
        assert!(factory.activate().await.is_err());
        assert_eq!(factory.activations(), 3);
    }
}
