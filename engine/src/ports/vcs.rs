//! Version-control provider port.
//!
//! The provider is optional and discovered at runtime: a
//! [`VcsProviderFactory`] is asked to activate it, and may answer "not
//! available (yet)". Once activated, the provider reports open repositories
//! and their current branch, and announces repository open/close, provider
//! state changes and per-repository HEAD changes.

use crate::error::Result;
use crate::event::Subscription;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub type RepositoryListener = Box<dyn Fn(&Arc<dyn Repository>) + Send + Sync>;
pub type SignalListener = Box<dyn Fn() + Send + Sync>;

/// One open repository.
pub trait Repository: Send + Sync {
    /// Working tree root; used as the repository identity.
    fn root(&self) -> &Path;

    /// Current branch name, if HEAD is on a branch.
    fn head_branch(&self) -> Option<String>;

    /// Subscribe to HEAD moves (checkout, branch switch, new commit).
    fn on_head_changed(&self, listener: SignalListener) -> Subscription;
}

/// An attached version-control provider.
pub trait VcsProvider: Send + Sync {
    /// Open repositories, in provider order.
    fn repositories(&self) -> Vec<Arc<dyn Repository>>;

    fn on_repository_opened(&self, listener: RepositoryListener) -> Subscription;

    fn on_repository_closed(&self, listener: RepositoryListener) -> Subscription;

    /// Provider-wide state change (initialization finished, rescan, ...).
    fn on_state_changed(&self, listener: SignalListener) -> Subscription;
}

/// Lazily activates the provider.
#[async_trait]
pub trait VcsProviderFactory: Send + Sync {
    /// Try to activate the provider.
    ///
    /// `Ok(None)` means the provider is not available right now and may be
    /// retried later.
    ///
    /// # Errors
    ///
    /// Returns an error when activation itself failed.
    async fn activate(&self) -> Result<Option<Arc<dyn VcsProvider>>>;
}

/// Factory for hosts without version control.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVcs;

#[async_trait]
impl VcsProviderFactory for NoVcs {
    async fn activate(&self) -> Result<Option<Arc<dyn VcsProvider>>> {
        Ok(None)
    }
}
