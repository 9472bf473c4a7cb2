//! Local disk adapters.
//!
//! [`LocalFileSystem`] answers stat/list through `tokio::fs`.
//! [`LocalWorkspace`] holds a settable root list and watches each root
//! directory (non-recursively) with a debounced `notify` watcher, reporting
//! only events that touch the marker entry.

use crate::adapters::RootSet;
use crate::error::{Result, SpecWatchError};
use crate::event::Subscription;
use crate::ports::{
    DirEntry, EntryKind, FileStat, FileSystem, MarkerEvent, MarkerListener, RootsChange,
    WorkspaceHost,
};
use crate::types::WorkspaceRoot;
use async_trait::async_trait;
use notify::{EventKind, RecursiveMode, Watcher};
use notify_debouncer_full::{DebounceEventResult, new_debouncer};
use std::fs::FileType;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Filesystem adapter backed by real disk I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

fn kind_of(file_type: FileType) -> EntryKind {
    if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::File
    } else {
        EntryKind::Other
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|source| SpecWatchError::Stat {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(FileStat {
            kind: kind_of(metadata.file_type()),
        })
    }

    async fn read_dir(&self, path: &Path) -> Result<Vec<DirEntry>> {
        let read_err = |source: std::io::Error| SpecWatchError::ReadDir {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = tokio::fs::read_dir(path).await.map_err(read_err)?;
        let mut entries = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(read_err)? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                tracing::trace!(path = %entry.path().display(), "Skipping non-UTF-8 entry");
                continue;
            };
            let mut file_type = entry.file_type().await.map_err(read_err)?;
            if file_type.is_symlink() {
                // Report what the link points at; dangling links stay Other.
                match tokio::fs::metadata(entry.path()).await {
                    Ok(target) => file_type = target.file_type(),
                    Err(_) => {
                        entries.push(DirEntry::new(name, EntryKind::Other));
                        continue;
                    }
                }
            }
            entries.push(DirEntry::new(name, kind_of(file_type)));
        }
        Ok(entries)
    }
}

/// Workspace host over local directories.
pub struct LocalWorkspace {
    roots: RootSet,
    debounce: Duration,
}

impl LocalWorkspace {
    pub fn new<I, P>(paths: I, debounce: Duration) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            roots: RootSet::new(paths),
            debounce,
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
}

impl WorkspaceHost for LocalWorkspace {
    fn roots(&self) -> Vec<WorkspaceRoot> {
        self.roots.get()
    }

    fn on_roots_changed(&self, listener: Box<dyn Fn(&RootsChange) + Send + Sync>) -> Subscription {
        self.roots.subscribe(listener)
    }

    fn watch_marker(
        &self,
        root: &Path,
        name: &str,
        listener: MarkerListener,
    ) -> Result<Subscription> {
        let marker_path = root.join(name);
        let watch_err = |err: notify::Error| SpecWatchError::Watch {
            path: root.to_path_buf(),
            message: err.to_string(),
        };

        let mut debouncer = new_debouncer(self.debounce, None, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    // One notification per batch; the consumer re-stats anyway.
                    let last = events
                        .iter()
                        .rev()
                        .filter(|e| e.event.paths.iter().any(|p| p.starts_with(&marker_path)))
                        .find_map(|e| marker_event(&e.event.kind));
                    if let Some(event) = last {
                        tracing::trace!(marker = %marker_path.display(), ?event, "Marker event");
                        listener(event);
                    }
                }
                Err(errors) => {
                    for error in errors {
                        tracing::debug!("Marker watcher error: {:?}", error);
                    }
                }
            }
        })
        .map_err(watch_err)?;

        debouncer
            .watcher()
            .watch(root, RecursiveMode::NonRecursive)
            .map_err(watch_err)?;

        tracing::trace!(root = %root.display(), "Marker watcher started");
        Ok(Subscription::new(move || drop(debouncer)))
    }
}

fn marker_event(kind: &EventKind) -> Option<MarkerEvent> {
    match kind {
        EventKind::Create(_) => Some(MarkerEvent::Created),
        EventKind::Modify(_) => Some(MarkerEvent::Changed),
        EventKind::Remove(_) => Some(MarkerEvent::Deleted),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_stat_distinguishes_kinds() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("file.txt"), "x").unwrap();

        let fs = LocalFileSystem;
        assert!(fs.stat(&dir.path().join("sub")).await.unwrap().is_dir());
        assert!(fs.stat(&dir.path().join("file.txt")).await.unwrap().is_file());

        let missing = fs.stat(&dir.path().join("nope")).await.unwrap_err();
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_read_dir_reports_kinds() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("001-a")).unwrap();
        fs::write(dir.path().join("README.md"), "x").unwrap();

        let mut entries = LocalFileSystem.read_dir(dir.path()).await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(
            entries,
            vec![
                DirEntry::new("001-a", EntryKind::Directory),
                DirEntry::new("README.md", EntryKind::File),
            ]
        );
    }

    #[tokio::test]
    async fn test_read_dir_missing_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(LocalFileSystem.read_dir(&dir.path().join("gone")).await.is_err());
    }

    #[test]
    fn test_set_roots_reports_diff() {
        let workspace = LocalWorkspace::new(["/ws/a"], Duration::from_millis(50));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let _sub = workspace.on_roots_changed(Box::new(move |change: &RootsChange| {
            seen_clone.lock().unwrap().push(change.clone());
        }));

        workspace.set_roots(["/ws/a", "/ws/b"]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].added, vec![WorkspaceRoot::new("/ws/b", 1)]);
        assert_eq!(workspace.roots().len(), 2);
    }

    #[test]
    fn test_watch_missing_root_fails() {
        let dir = TempDir::new().unwrap();
        let workspace = LocalWorkspace::new([dir.path()], Duration::from_millis(50));
        let result = workspace.watch_marker(&dir.path().join("absent"), ".specify", Arc::new(|_: MarkerEvent| {}));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_marker_created_and_removed() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().canonicalize().unwrap();
        let workspace = LocalWorkspace::new([&root], Duration::from_millis(50));

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut sub = workspace
            .watch_marker(&root, ".specify", Arc::new(move |event: MarkerEvent| {
                let _ = tx.send(event);
            }))
            .unwrap();

        // Unrelated entries are filtered out.
        fs::create_dir(root.join("specs")).unwrap();
        fs::create_dir(root.join(".specify")).unwrap();
        assert_eq!(next_event(&mut rx).await, MarkerEvent::Created);

        fs::remove_dir(root.join(".specify")).unwrap();
        let mut event = next_event(&mut rx).await;
        while event != MarkerEvent::Deleted {
            event = next_event(&mut rx).await;
        }

        // The listener goes away with the watcher.
        sub.dispose();
        while timeout(Duration::from_secs(5), rx.recv()).await.unwrap().is_some() {}
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<MarkerEvent>) -> MarkerEvent {
        timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap()
    }

    #[test]
    fn test_marker_event_mapping() {
        use notify::event::{CreateKind, RemoveKind};
        assert_eq!(
            marker_event(&EventKind::Create(CreateKind::Folder)),
            Some(MarkerEvent::Created)
        );
        assert_eq!(
            marker_event(&EventKind::Remove(RemoveKind::Folder)),
            Some(MarkerEvent::Deleted)
        );
        assert_eq!(marker_event(&EventKind::Access(notify::event::AccessKind::Any)), None);
    }
}
