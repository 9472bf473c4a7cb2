//! Git provider backed by `git2`.
//!
//! The factory discovers repositories for the workspace roots; when none is
//! found the provider counts as not available (the resolver retries later).
//! Once active, the provider follows root-set changes, opening and closing
//! repositories as roots come and go. HEAD is read fresh on every
//! [`Repository::head_branch`] call, and HEAD moves are watched with a
//! debounced `notify` watcher on the git directory.

use crate::error::{Result, SpecWatchError};
use crate::event::{Emitter, Subscription};
use crate::ports::vcs::{RepositoryListener, SignalListener};
use crate::ports::{Repository, RootsChange, VcsProvider, VcsProviderFactory, WorkspaceHost};
use crate::types::WorkspaceRoot;
use async_trait::async_trait;
use git2::ErrorCode;
use notify::{RecursiveMode, Watcher};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One git working tree.
#[derive(Debug)]
pub struct GitRepository {
    root: PathBuf,
    git_dir: PathBuf,
    debounce: Duration,
}

impl GitRepository {
    /// Find the repository containing `path`. Bare repositories are skipped.
    pub fn discover(path: &Path, debounce: Duration) -> Result<Option<Self>> {
        let repo = match git2::Repository::discover(path) {
            Ok(repo) => repo,
            Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let Some(workdir) = repo.workdir() else {
            return Ok(None);
        };
        Ok(Some(Self {
            root: normalize_dir(workdir),
            git_dir: normalize_dir(repo.path()),
            debounce,
        }))
    }

    fn read_head(&self) -> Result<Option<String>> {
        let repo = git2::Repository::open(&self.git_dir)?;
        match repo.head() {
            Ok(head) if head.is_branch() => Ok(head.shorthand().map(str::to_string)),
            // Detached HEAD names no branch.
            Ok(_) => Ok(None),
            Err(err) if err.code() == ErrorCode::UnbornBranch => {
                let head = repo.find_reference("HEAD")?;
                Ok(head
                    .symbolic_target()
                    .and_then(|target| target.strip_prefix("refs/heads/"))
                    .map(str::to_string))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// `git2` reports directories with a trailing separator.
fn normalize_dir(path: &Path) -> PathBuf {
    path.components().collect()
}

impl Repository for GitRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    fn head_branch(&self) -> Option<String> {
        match self.read_head() {
            Ok(branch) => branch,
            Err(err) => {
                tracing::debug!(repo = %self.root.display(), "Failed to read HEAD: {err}");
                None
            }
        }
    }

    fn on_head_changed(&self, listener: SignalListener) -> Subscription {
        let head_path = self.git_dir.join("HEAD");
        let debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    if events
                        .iter()
                        .any(|e| e.event.paths.iter().any(|p| p == &head_path))
                    {
                        listener();
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::debug!("HEAD watcher error: {:?}", error);
                    }
                }
            }
        });

        let mut debouncer = match debouncer {
            Ok(debouncer) => debouncer,
            Err(err) => {
                tracing::debug!(repo = %self.root.display(), "Failed to create HEAD watcher: {err}");
                return Subscription::noop();
            }
        };
        if let Err(err) = debouncer
            .watcher()
            .watch(&self.git_dir, RecursiveMode::NonRecursive)
        {
            tracing::debug!(repo = %self.root.display(), "Failed to watch git dir: {err}");
            return Subscription::noop();
        }

        Subscription::new(move || drop(debouncer))
    }
}

/// Git provider following the workspace root set.
pub struct GitProvider {
    debounce: Duration,
    repositories: Mutex<Vec<Arc<GitRepository>>>,
    opened: Emitter<Arc<dyn Repository>>,
    closed: Emitter<Arc<dyn Repository>>,
    state_changed: Emitter<()>,
    roots_subscription: Mutex<Option<Subscription>>,
}

impl GitProvider {
    fn new(debounce: Duration) -> Arc<Self> {
        Arc::new(Self {
            debounce,
            repositories: Mutex::new(Vec::new()),
            opened: Emitter::new(),
            closed: Emitter::new(),
            state_changed: Emitter::new(),
            roots_subscription: Mutex::new(None),
        })
    }

    /// Re-sync on every root-set change. Discovery hits the disk, so it runs
    /// on the blocking pool when a runtime is available.
    fn follow(self: &Arc<Self>, host: &Arc<dyn WorkspaceHost>, runtime: Option<Handle>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let host_weak = Arc::downgrade(host);
        let subscription = host.on_roots_changed(Box::new(move |_: &RootsChange| {
            let (Some(provider), Some(host)) = (weak.upgrade(), host_weak.upgrade()) else {
                return;
            };
            let roots = host.roots();
            let resync = move || {
                provider.sync(&roots);
                provider.state_changed.fire(&());
            };
            match &runtime {
                Some(runtime) => drop(runtime.spawn_blocking(resync)),
                None => resync(),
            }
        }));
        *lock(&self.roots_subscription) = Some(subscription);
    }

    /// Re-discover repositories for `roots`, announcing opens and closes.
    pub fn sync(&self, roots: &[WorkspaceRoot]) {
        let discovered = discover_all(roots, self.debounce);

        let (opened, closed) = {
            let mut current = lock(&self.repositories);
            let closed: Vec<Arc<GitRepository>> = current
                .iter()
                .filter(|r| !discovered.iter().any(|d| d.root == r.root))
                .cloned()
                .collect();
            current.retain(|r| discovered.iter().any(|d| d.root == r.root));

            let mut opened = Vec::new();
            for repo in discovered {
                if !current.iter().any(|r| r.root == repo.root) {
                    let repo = Arc::new(repo);
                    current.push(Arc::clone(&repo));
                    opened.push(repo);
                }
            }
            (opened, closed)
        };

        for repo in closed {
            tracing::debug!(repo = %repo.root.display(), "Repository closed");
            let repo: Arc<dyn Repository> = repo;
            self.closed.fire(&repo);
        }
        for repo in opened {
            tracing::debug!(repo = %repo.root.display(), "Repository opened");
            let repo: Arc<dyn Repository> = repo;
            self.opened.fire(&repo);
        }
    }

    pub fn repository_count(&self) -> usize {
        lock(&self.repositories).len()
    }
}

impl Drop for GitProvider {
    fn drop(&mut self) {
        if let Some(mut subscription) = lock(&self.roots_subscription).take() {
            subscription.dispose();
        }
    }
}

fn discover_all(roots: &[WorkspaceRoot], debounce: Duration) -> Vec<GitRepository> {
    let mut found: Vec<GitRepository> = Vec::new();
    for root in roots {
        match GitRepository::discover(&root.path, debounce) {
            Ok(Some(repo)) => {
                if !found.iter().any(|r| r.root == repo.root) {
                    found.push(repo);
                }
            }
            Ok(None) => {}
            Err(err) => {
                tracing::debug!(root = %root.path.display(), "Git discovery failed: {err}");
            }
        }
    }
    found
}

impl VcsProvider for GitProvider {
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

/// Activates a [`GitProvider`] for the workspace.
pub struct GitProviderFactory {
    host: Arc<dyn WorkspaceHost>,
    debounce: Duration,
}

impl GitProviderFactory {
    pub fn new(host: Arc<dyn WorkspaceHost>, debounce: Duration) -> Self {
        Self { host, debounce }
    }
}

#[async_trait]
impl VcsProviderFactory for GitProviderFactory {
    async fn activate(&self) -> Result<Option<Arc<dyn VcsProvider>>> {
        let roots = self.host.roots();
        let debounce = self.debounce;
        let discovered = tokio::task::spawn_blocking(move || discover_all(&roots, debounce))
            .await
            .map_err(|err| SpecWatchError::Vcs(format!("git discovery task failed: {err}")))?;

        if discovered.is_empty() {
            return Ok(None);
        }

        let provider = GitProvider::new(self.debounce);
        lock(&provider.repositories).extend(discovered.into_iter().map(Arc::new));
        provider.follow(&self.host, Handle::try_current().ok());
        tracing::info!(
            repositories = provider.repository_count(),
            "Git provider activated"
        );
        Ok(Some(provider as Arc<dyn VcsProvider>))
    }
}
