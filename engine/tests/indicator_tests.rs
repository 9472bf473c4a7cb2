//! Status indicator following both engines.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use pretty_assertions::assert_eq;
use specwatch_engine::adapters::{LocalFileSystem, ManualVcs, ManualVcsFactory, ManualWorkspace};
use specwatch_engine::ports::MarkerEvent;
use specwatch_engine::{
    ActiveSpecResolver, IndicatorView, PresenceDetector, PresenceOptions, ResolverOptions,
    StatusIndicator,
};
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn indicator_tracks_marker_and_branch() {
    let dir = TempDir::new().expect("temp dir");
    let root = dir.path().to_path_buf();
    fs::create_dir_all(root.join("specs").join("002-active")).expect("spec dir");
    fs::write(root.join("specs").join("002-active").join("spec.md"), "x").expect("spec.md");

    let workspace = Arc::new(ManualWorkspace::new([&root]));
    let vcs = Arc::new(ManualVcs::new());
    let repo = vcs.add_repository(&root);
    repo.set_head(Some("002-active"));

    let presence = PresenceDetector::new(
        workspace.clone(),
        Arc::new(LocalFileSystem),
        PresenceOptions::default(),
    );
    let resolver = ActiveSpecResolver::new(
        workspace.clone(),
        Arc::new(LocalFileSystem),
        ResolverOptions::default()
            .with_override_source(Arc::new(|| -> Option<String> { None }))
            .with_vcs(Arc::new(ManualVcsFactory::new(vcs)))
            .with_poll_interval(None),
    );
    presence.initialize().await;
    resolver.initialize().await;

    let mut indicator = StatusIndicator::new(&presence, &resolver);
    // No marker yet: hidden even though a spec resolved.
    assert_eq!(indicator.current_view(), IndicatorView::default());

    let (_sub, mut rx) = indicator.subscribe_channel();
    fs::create_dir(root.join(".specify")).expect("marker");
    workspace.fire_marker_event(&root, MarkerEvent::Created);

    let view = timeout(WAIT, rx.recv())
        .await
        .expect("view in time")
        .expect("channel open");
    assert!(view.visible);
    assert_eq!(view.text, "🌱 002-active");
    assert_eq!(view.tooltip, "Spec-Kit detected: 002-active");

    repo.set_head(Some("main"));
    let view = timeout(WAIT, rx.recv())
        .await
        .expect("view in time")
        .expect("channel open");
    assert_eq!(view.text, "🌱 main");

    indicator.dispose();
    presence.dispose();
    resolver.dispose();
    assert!(timeout(WAIT, rx.recv()).await.expect("closed").is_none());
}
