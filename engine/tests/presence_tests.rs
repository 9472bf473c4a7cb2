//! Presence detector behavior against real directories and a host-driven workspace.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use specwatch_engine::adapters::{LocalFileSystem, ManualWorkspace};
use specwatch_engine::ports::MarkerEvent;
use specwatch_engine::{PresenceDetector, PresenceOptions, PresenceStatus};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(150);

struct Fixture {
    _dir: TempDir,
    a: PathBuf,
    b: PathBuf,
}

fn two_roots() -> Fixture {
    let dir = TempDir::new().expect("temp dir");
    let a = dir.path().join("a");
    let b = dir.path().join("b");
    fs::create_dir(&a).expect("root a");
    fs::create_dir(&b).expect("root b");
    Fixture { _dir: dir, a, b }
}

fn mark(root: &Path) {
    fs::create_dir(root.join(".specify")).expect("create marker");
}

fn detector(workspace: &Arc<ManualWorkspace>) -> PresenceDetector {
    PresenceDetector::new(
        workspace.clone(),
        Arc::new(LocalFileSystem),
        PresenceOptions::default(),
    )
}

async fn next(rx: &mut UnboundedReceiver<PresenceStatus>) -> PresenceStatus {
    timeout(WAIT, rx.recv())
        .await
        .expect("notification in time")
        .expect("channel open")
}

async fn assert_quiet(rx: &mut UnboundedReceiver<PresenceStatus>) {
    if let Ok(Some(extra)) = timeout(QUIET, rx.recv()).await {
        panic!("unexpected notification: {extra:?}");
    }
}

#[tokio::test]
async fn marker_in_one_root_marks_workspace() {
    let fx = two_roots();
    mark(&fx.b);
    let workspace = Arc::new(ManualWorkspace::new([&fx.a, &fx.b]));
    let detector = detector(&workspace);

    detector.initialize().await;

    let status = detector.current_status();
    assert!(status.any_root_has_marker);
    let flags: Vec<bool> = status.roots.iter().map(|r| r.has_marker).collect();
    assert_eq!(flags, vec![false, true]);
    assert_eq!(
        status.marked_roots().map(|r| r.path.clone()).collect::<Vec<_>>(),
        vec![fx.b.clone()]
    );
    detector.dispose();
}

#[tokio::test]
async fn delete_event_flips_presence_once() {
    let fx = two_roots();
    mark(&fx.a);
    let workspace = Arc::new(ManualWorkspace::new([&fx.a, &fx.b]));
    let detector = detector(&workspace);
    detector.initialize().await;
    assert!(detector.current_status().any_root_has_marker);

    let (_sub, mut rx) = detector.subscribe_channel();
    fs::remove_dir(fx.a.join(".specify")).expect("remove marker");
    assert!(workspace.fire_marker_event(&fx.a, MarkerEvent::Deleted));

    let status = next(&mut rx).await;
    assert!(!status.any_root_has_marker);
    assert_quiet(&mut rx).await;
    assert!(!detector.current_status().any_root_has_marker);
    detector.dispose();
}

#[tokio::test]
async fn create_event_is_detected() {
    let fx = two_roots();
    let workspace = Arc::new(ManualWorkspace::new([&fx.a]));
    let detector = detector(&workspace);
    detector.initialize().await;

    let (_sub, mut rx) = detector.subscribe_channel();
    mark(&fx.a);
    workspace.fire_marker_event(&fx.a, MarkerEvent::Created);

    assert!(next(&mut rx).await.any_root_has_marker);
    detector.dispose();
}

#[tokio::test]
async fn added_root_with_marker_updates_without_refresh() {
    let fx = two_roots();
    mark(&fx.b);
    let workspace = Arc::new(ManualWorkspace::new([&fx.a]));
    let detector = detector(&workspace);
    detector.initialize().await;
    assert!(!detector.current_status().any_root_has_marker);

    let (_sub, mut rx) = detector.subscribe_channel();
    workspace.set_roots([&fx.a, &fx.b]);

    let status = next(&mut rx).await;
    assert!(status.any_root_has_marker);
    assert_eq!(status.roots.len(), 2);
    assert!(workspace.is_watching(&fx.b));
    assert_eq!(detector.watcher_count(), 2);
    detector.dispose();
}

#[tokio::test]
async fn removed_root_loses_its_watcher() {
    let fx = two_roots();
    mark(&fx.b);
    let workspace = Arc::new(ManualWorkspace::new([&fx.a, &fx.b]));
    let detector = detector(&workspace);
    detector.initialize().await;

    let (_sub, mut rx) = detector.subscribe_channel();
    workspace.set_roots([&fx.a]);

    let status = next(&mut rx).await;
    assert!(!status.any_root_has_marker);
    assert!(!workspace.is_watching(&fx.b));
    assert!(workspace.is_watching(&fx.a));
    detector.dispose();
}

#[tokio::test]
async fn repeated_refresh_notifies_once() {
    let fx = two_roots();
    mark(&fx.a);
    let workspace = Arc::new(ManualWorkspace::new([&fx.a]));
    let detector = detector(&workspace);
    let (_sub, mut rx) = detector.subscribe_channel();

    detector.initialize().await;
    detector.refresh().await;
    detector.refresh().await;

    assert!(next(&mut rx).await.any_root_has_marker);
    assert_quiet(&mut rx).await;
    detector.dispose();
}

#[tokio::test]
async fn unwatchable_root_is_still_scanned() {
    let fx = two_roots();
    mark(&fx.a);
    let workspace = Arc::new(ManualWorkspace::new([&fx.a, &fx.b]));
    workspace.refuse_watch(&fx.a);
    let detector = detector(&workspace);

    detector.initialize().await;

    assert!(detector.current_status().any_root_has_marker);
    assert!(!workspace.is_watching(&fx.a));
    assert!(workspace.is_watching(&fx.b));
    detector.dispose();
}

#[tokio::test]
async fn dispose_releases_everything() {
    let fx = two_roots();
    let workspace = Arc::new(ManualWorkspace::new([&fx.a, &fx.b]));
    let detector = detector(&workspace);
    detector.initialize().await;
    assert_eq!(workspace.watcher_count(), 2);

    let (_sub, mut rx) = detector.subscribe_channel();
    detector.dispose();
    detector.dispose();

    assert_eq!(workspace.watcher_count(), 0);
    assert_eq!(detector.watcher_count(), 0);
    assert!(detector.is_disposed());

    // Late events go nowhere and the channel is closed.
    mark(&fx.a);
    assert!(!workspace.fire_marker_event(&fx.a, MarkerEvent::Created));
    workspace.set_roots([&fx.b]);
    assert_eq!(timeout(WAIT, rx.recv()).await.expect("closed channel"), None);
}

#[tokio::test]
async fn dispose_before_initialize_is_safe() {
    let fx = two_roots();
    mark(&fx.a);
    let workspace = Arc::new(ManualWorkspace::new([&fx.a]));
    let detector = detector(&workspace);

    detector.dispose();
    detector.initialize().await;
    detector.refresh().await;
    detector.dispose();

    assert_eq!(workspace.watcher_count(), 0);
    assert_eq!(*detector.current_status(), PresenceStatus::default());
}
