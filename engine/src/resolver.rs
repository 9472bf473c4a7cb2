//! Active spec resolution.
//!
//! Precedence, evaluated from scratch on every refresh (first match wins):
//!
//! 1. override value (`SPECIFY_FEATURE`), authoritative even if the spec is
//!    missing on disk;
//! 2. current branch of the first open repository that has one;
//! 3. the highest-numbered directory under the specs root, provided its
//!    primary document exists;
//! 4. nothing: `source = unknown`.
//!
//! Refresh triggers are root-set changes, repository open/HEAD change,
//! provider state changes, the override poll task, and explicit
//! [`ActiveSpecResolver::refresh`] calls.

use crate::config::ResolverConfig;
use crate::event::{Emitter, Subscription};
use crate::ports::vcs::RepositoryListener;
use crate::ports::{
    DirEntry, EntryKind, EnvOverride, FileSystem, NoVcs, OverrideSource, Repository,
    RootsChange, VcsProvider, VcsProviderFactory, WorkspaceHost, normalize_name,
};
use crate::registry::HandleRegistry;
use crate::types::{ActiveSpecState, SpecSource};
use chrono::Utc;
use regex_lite::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

static NUMERIC_PREFIX: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"^([0-9]+)").ok());

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Resolver settings and collaborators that are not part of the workspace.
#[derive(Clone)]
pub struct ResolverOptions {
    pub specs_dir: String,
    pub primary_document: String,
    /// `None` disables override polling.
    pub poll_interval: Option<Duration>,
    pub override_source: Arc<dyn OverrideSource>,
    pub vcs: Arc<dyn VcsProviderFactory>,
}

impl ResolverOptions {
    /// Build options from configuration.
    ///
    /// The override source reads `config.override_var` from the process
    /// environment. `vcs` is only consulted when `config.vcs_enabled` is set.
    pub fn from_config(config: &ResolverConfig, vcs: Arc<dyn VcsProviderFactory>) -> Self {
        let vcs: Arc<dyn VcsProviderFactory> = if config.vcs_enabled {
            vcs
        } else {
            Arc::new(NoVcs)
        };
        Self {
            specs_dir: config.specs_dir.clone(),
            primary_document: config.primary_document.clone(),
            poll_interval: config.poll_interval(),
            override_source: Arc::new(EnvOverride::new(&config.override_var)),
            vcs,
        }
    }

    pub fn with_override_source(mut self, source: Arc<dyn OverrideSource>) -> Self {
        self.override_source = source;
        self
    }

    pub fn with_vcs(mut self, vcs: Arc<dyn VcsProviderFactory>) -> Self {
        self.vcs = vcs;
        self
    }

    pub fn with_poll_interval(mut self, interval: Option<Duration>) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self::from_config(&ResolverConfig::default(), Arc::new(NoVcs))
    }
}

impl std::fmt::Debug for ResolverOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverOptions")
            .field("specs_dir", &self.specs_dir)
            .field("primary_document", &self.primary_document)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

/// Provider attachment state.
enum VcsAttachment {
    Detached,
    /// An activation is in flight; other callers skip the VCS source.
    Attaching,
    Attached(Arc<dyn VcsProvider>),
}

/// Resolves the active spec and republishes it when it changes.
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct ActiveSpecResolver {
    inner: Arc<ResolverInner>,
}

struct ResolverInner {
    host: Arc<dyn WorkspaceHost>,
    fs: Arc<dyn FileSystem>,
    options: ResolverOptions,

    state: RwLock<Arc<ActiveSpecState>>,
    changed: Emitter<ActiveSpecState>,

    vcs: Mutex<VcsAttachment>,
    /// HEAD subscriptions keyed by repository root; `None` once disposed.
    head_watchers: Mutex<Option<HandleRegistry<PathBuf>>>,
    /// Provider subscriptions; `None` once disposed.
    subscriptions: Mutex<Option<Vec<Subscription>>>,

    /// Override value seen by the last read.
    last_override: Mutex<Option<String>>,
    poll_cancel: CancellationToken,

    refresh_gate: tokio::sync::Mutex<()>,
    runtime: OnceLock<Handle>,
    disposed: AtomicBool,
}

impl ActiveSpecResolver {
    pub fn new(
        host: Arc<dyn WorkspaceHost>,
        fs: Arc<dyn FileSystem>,
        options: ResolverOptions,
    ) -> Self {
        Self {
            inner: Arc::new(ResolverInner {
                host,
                fs,
                options,
                state: RwLock::new(Arc::new(ActiveSpecState::unknown())),
                changed: Emitter::new(),
                vcs: Mutex::new(VcsAttachment::Detached),
                head_watchers: Mutex::new(Some(HandleRegistry::new())),
                subscriptions: Mutex::new(Some(Vec::new())),
                last_override: Mutex::new(None),
                poll_cancel: CancellationToken::new(),
                refresh_gate: tokio::sync::Mutex::new(()),
                runtime: OnceLock::new(),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Follow root-set changes, snapshot the override, try to attach to the
    /// VCS provider, resolve once, then start override polling.
    pub async fn initialize(&self) {
        let inner = &self.inner;
        if inner.is_disposed() {
            return;
        }
        if let Ok(handle) = Handle::try_current() {
            let _ = inner.runtime.set(handle);
        }

        // The specs root is the first root that has one.
        let weak = Arc::downgrade(inner);
        inner.register(inner.host.on_roots_changed(Box::new(move |change: &RootsChange| {
            if let Some(inner) = weak.upgrade() {
                tracing::trace!(
                    added = change.added.len(),
                    removed = change.removed.len(),
                    "Workspace roots changed"
                );
                inner.schedule_refresh();
            }
        })));

        *lock(&inner.last_override) = inner.read_override();
        inner.ensure_attached().await;
        inner.refresh().await;
        inner.start_polling();
    }

    /// Recompute the active spec and publish if it changed.
    pub async fn refresh(&self) {
        self.inner.refresh().await;
    }

    /// Latest published state.
    pub fn current_state(&self) -> Arc<ActiveSpecState> {
        self.inner.current()
    }

    /// Receive every future state change.
    pub fn on_state_changed<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ActiveSpecState) + Send + Sync + 'static,
    {
        self.inner.changed.subscribe(listener)
    }

    /// Channel form of [`ActiveSpecResolver::on_state_changed`].
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<ActiveSpecState>) {
        self.inner.changed.subscribe_channel()
    }

    /// Whether a VCS provider is currently attached.
    pub fn is_vcs_attached(&self) -> bool {
        matches!(*lock(&self.inner.vcs), VcsAttachment::Attached(_))
    }

    /// Number of repositories with a live HEAD subscription.
    pub fn watched_repository_count(&self) -> usize {
        lock(&self.inner.head_watchers)
            .as_ref()
            .map_or(0, HandleRegistry::len)
    }

    /// Stop polling and release every subscription. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }
}

impl ResolverInner {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn current(&self) -> Arc<ActiveSpecState> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn read_override(&self) -> Option<String> {
        normalize_name(self.options.override_source.read().as_deref())
    }

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
            tracing::debug!("Resolver refresh requested before initialize; ignoring");
            return;
        };
        let weak = Arc::downgrade(self);
        runtime.spawn(async move {
            if let Some(inner) = weak.upgrade() {
                inner.refresh().await;
            }
        });
    }

    // ---- VCS attachment ----

    /// Attached provider, attaching first if needed.
    ///
    /// Returns `None` while another activation is in flight.
    async fn ensure_attached(self: &Arc<Self>) -> Option<Arc<dyn VcsProvider>> {
        {
            let mut attachment = lock(&self.vcs);
            match &*attachment {
                VcsAttachment::Attached(provider) => return Some(Arc::clone(provider)),
                VcsAttachment::Attaching => return None,
                VcsAttachment::Detached => *attachment = VcsAttachment::Attaching,
            }
        }

        let activated = match self.options.vcs.activate().await {
            Ok(Some(provider)) => Some(provider),
            Ok(None) => {
                tracing::trace!("VCS provider not available");
                None
            }
            Err(err) => {
                tracing::debug!("VCS provider activation failed: {err}");
                None
            }
        };

        let provider = {
            let mut attachment = lock(&self.vcs);
            // Checked under the lock; dispose raises the flag before it
            // resets the attachment.
            match activated {
                Some(provider) if !self.is_disposed() => {
                    *attachment = VcsAttachment::Attached(Arc::clone(&provider));
                    provider
                }
                _ => {
                    *attachment = VcsAttachment::Detached;
                    return None;
                }
            }
        };
        self.attach(&provider);
        tracing::debug!(
            repositories = provider.repositories().len(),
            "VCS provider attached"
        );
        Some(provider)
    }

    fn attach(self: &Arc<Self>, provider: &Arc<dyn VcsProvider>) {
        let weak = Arc::downgrade(self);
        let opened: RepositoryListener = Box::new(move |repository: &Arc<dyn Repository>| {
            if let Some(inner) = weak.upgrade() {
                inner.watch_head(repository);
                inner.schedule_refresh();
            }
        });
        self.register(provider.on_repository_opened(opened));

        let weak = Arc::downgrade(self);
        let closed: RepositoryListener = Box::new(move |repository: &Arc<dyn Repository>| {
            if let Some(inner) = weak.upgrade() {
                inner.unwatch_head(repository.root());
            }
        });
        self.register(provider.on_repository_closed(closed));

        let weak = Arc::downgrade(self);
        self.register(provider.on_state_changed(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.schedule_refresh();
            }
        })));

        for repository in provider.repositories() {
            self.watch_head(&repository);
        }
    }

    fn watch_head(self: &Arc<Self>, repository: &Arc<dyn Repository>) {
        let mut guard = lock(&self.head_watchers);
        let Some(registry) = guard.as_mut() else {
            return;
        };
        let weak = Arc::downgrade(self);
        let created = registry.insert_with(repository.root().to_path_buf(), |_| {
            Some(repository.on_head_changed(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.schedule_refresh();
                }
            })))
        });
        if created {
            tracing::trace!(repository = %repository.root().display(), "Watching HEAD");
        }
    }

    fn unwatch_head(&self, root: &Path) {
        if let Some(registry) = lock(&self.head_watchers).as_mut()
            && registry.remove(&root.to_path_buf())
        {
            tracing::trace!(repository = %root.display(), "Stopped watching HEAD");
        }
    }

    // ---- resolution ----

    async fn refresh(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        let _gate = self.refresh_gate.lock().await;
        if self.is_disposed() {
            return;
        }
        let next = self.resolve().await;
        self.publish(next);
    }

    async fn resolve(self: &Arc<Self>) -> ActiveSpecState {
        let specs_root = self.resolve_specs_root().await;

        let override_value = self.read_override();
        *lock(&self.last_override) = override_value.clone();
        if let Some(name) = override_value {
            let exists = self.spec_exists(specs_root.as_deref(), &name).await;
            return resolved(name, SpecSource::Env, exists);
        }

        if let Some(name) = self.branch_candidate().await {
            let exists = self.spec_exists(specs_root.as_deref(), &name).await;
            return resolved(name, SpecSource::Vcs, exists);
        }

        if let Some(root) = specs_root.as_deref()
            && let Some(name) = self.fallback_candidate(root).await
        {
            if self.spec_exists(Some(root), &name).await {
                return resolved(name, SpecSource::Fallback, true);
            }
            tracing::trace!(spec = %name, "Fallback candidate has no primary document");
        }

        ActiveSpecState::unknown()
    }

    /// First workspace root that has a specs directory.
    async fn resolve_specs_root(&self) -> Option<PathBuf> {
        for root in self.host.roots() {
            let candidate = root.path.join(&self.options.specs_dir);
            match self.fs.stat(&candidate).await {
                Ok(stat) if stat.is_dir() => return Some(candidate),
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => tracing::debug!("Specs root check failed: {err}"),
            }
        }
        None
    }

    async fn branch_candidate(self: &Arc<Self>) -> Option<String> {
        let provider = self.ensure_attached().await?;
        provider
            .repositories()
            .iter()
            .find_map(|repository| normalize_name(repository.head_branch().as_deref()))
    }

    async fn fallback_candidate(&self, specs_root: &Path) -> Option<String> {
        match self.fs.read_dir(specs_root).await {
            Ok(entries) => select_fallback(entries),
            Err(err) => {
                tracing::debug!("Listing specs failed: {err}");
                None
            }
        }
    }

    async fn spec_exists(&self, specs_root: Option<&Path>, name: &str) -> bool {
        let Some(specs_root) = specs_root else {
            return false;
        };
        if !is_single_component(name) {
            return false;
        }
        let document = specs_root.join(name).join(&self.options.primary_document);
        self.fs
            .stat(&document)
            .await
            .is_ok_and(|stat| stat.is_file())
    }

    fn publish(&self, next: ActiveSpecState) {
        if self.is_disposed() {
            return;
        }
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.same_resolution(&next) {
                return;
            }
            *state = Arc::new(next.clone());
        }
        tracing::info!(
            spec = next.spec_name.as_deref().unwrap_or("-"),
            source = %next.source,
            exists = next.spec_exists,
            "Active spec changed"
        );
        self.changed.fire(&next);
    }

    // ---- override polling ----

    fn start_polling(self: &Arc<Self>) {
        let Some(period) = self.options.poll_interval else {
            tracing::trace!("Override polling disabled");
            return;
        };
        let Some(runtime) = self.runtime.get() else {
            return;
        };
        let cancel = self.poll_cancel.clone();
        let weak = Arc::downgrade(self);
        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(inner) = weak.upgrade() else {
                            break;
                        };
                        inner.poll_override().await;
                    }
                }
            }
            tracing::trace!("Override polling stopped");
        });
    }

    async fn poll_override(self: &Arc<Self>) {
        let current = self.read_override();
        let changed = {
            let mut last = lock(&self.last_override);
            if *last == current {
                false
            } else {
                *last = current;
                true
            }
        };
        if changed {
            tracing::debug!("Override value changed");
            self.refresh().await;
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.poll_cancel.cancel();
        let registry = lock(&self.head_watchers).take();
        if let Some(mut registry) = registry {
            registry.dispose_all();
        }
        let subscriptions = lock(&self.subscriptions).take();
        for mut subscription in subscriptions.into_iter().flatten() {
            subscription.dispose();
        }
        *lock(&self.vcs) = VcsAttachment::Detached;
        self.changed.close();
    }
}

impl Drop for ResolverInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn resolved(name: String, source: SpecSource, spec_exists: bool) -> ActiveSpecState {
    ActiveSpecState {
        spec_name: Some(name),
        source,
        spec_exists,
        timestamp: Utc::now(),
    }
}

/// Leading decimal digits of `name`, saturating at `u64::MAX`.
fn numeric_prefix(name: &str) -> Option<u64> {
    let captures = NUMERIC_PREFIX.as_ref()?.captures(name)?;
    let digits = captures.get(1)?.as_str();
    Some(digits.parse().unwrap_or(u64::MAX))
}

/// Pick the fallback candidate from a specs listing.
///
/// Only directories count. The greatest numeric prefix wins; names without
/// one rank below every numbered name. The listing is scanned in lexical
/// order and the first name wins a tie.
fn select_fallback(entries: Vec<DirEntry>) -> Option<String> {
    let mut names: Vec<String> = entries
        .into_iter()
        .filter(|entry| entry.kind == EntryKind::Directory)
        .filter_map(|entry| normalize_name(Some(&entry.name)))
        .collect();
    names.sort();

    let mut best: Option<(Option<u64>, String)> = None;
    for name in names {
        let rank = numeric_prefix(&name);
        if best.as_ref().is_none_or(|(best_rank, _)| rank > *best_rank) {
            best = Some((rank, name));
        }
    }
    best.map(|(_, name)| name)
}

/// `true` when `name` is exactly one ordinary path component.
fn is_single_component(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn dirs(names: &[&str]) -> Vec<DirEntry> {
        names
            .iter()
            .map(|name| DirEntry::new(*name, EntryKind::Directory))
            .collect()
    }

    #[test]
    fn test_numeric_prefix() {
        assert_eq!(numeric_prefix("010-beta"), Some(10));
        assert_eq!(numeric_prefix("7"), Some(7));
        assert_eq!(numeric_prefix("draft-2"), None);
        assert_eq!(numeric_prefix(""), None);
        assert_eq!(numeric_prefix("99999999999999999999999-huge"), Some(u64::MAX));
    }

    #[test]
    fn test_highest_prefix_wins() {
        assert_eq!(
            select_fallback(dirs(&["001-alpha", "010-beta-feature", "002-gamma"])),
            Some("010-beta-feature".to_string())
        );
    }

    #[test]
    fn test_tie_goes_to_lexically_first() {
        assert_eq!(
            select_fallback(dirs(&["010-b", "010-a"])),
            Some("010-a".to_string())
        );
        // Same value, different spelling
        assert_eq!(
            select_fallback(dirs(&["10-x", "010-y"])),
            Some("010-y".to_string())
        );
    }

    #[test]
    fn test_unnumbered_names_rank_last() {
        assert_eq!(
            select_fallback(dirs(&["zeta", "000-first"])),
            Some("000-first".to_string())
        );
        assert_eq!(
            select_fallback(dirs(&["notes", "drafts"])),
            Some("drafts".to_string())
        );
    }

    #[test]
    fn test_files_are_ignored() {
        let mut entries = dirs(&["001-real"]);
        entries.push(DirEntry::new("999-readme.md", EntryKind::File));
        entries.push(DirEntry::new("500-link", EntryKind::Other));
        assert_eq!(select_fallback(entries), Some("001-real".to_string()));
        assert_eq!(select_fallback(Vec::new()), None);
    }

    #[test]
    fn test_single_component_guard() {
        assert!(is_single_component("004-search"));
        assert!(!is_single_component("../x"));
        assert!(!is_single_component("a/b"));
        assert!(!is_single_component(".."));
        assert!(!is_single_component("/abs"));
        assert!(!is_single_component(""));
    }

    #[test]
    fn test_options_from_config() {
        let config = ResolverConfig {
            poll_interval_ms: 0,
            vcs_enabled: false,
            ..ResolverConfig::default()
        };
        let options = ResolverOptions::from_config(&config, Arc::new(NoVcs));
        assert_eq!(options.poll_interval, None);
        assert_eq!(options.specs_dir, "specs");
        assert_eq!(options.primary_document, "spec.md");
    }
}
