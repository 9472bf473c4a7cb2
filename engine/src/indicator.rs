//! Status indicator view model.
//!
//! [`StatusIndicator`] listens to both engines and keeps a rendered
//! [`IndicatorView`]. It never triggers a refresh itself.

use crate::event::{Emitter, Subscription};
use crate::presence::PresenceDetector;
use crate::resolver::ActiveSpecResolver;
use crate::types::{ActiveSpecState, PresenceStatus};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

const GLYPH: &str = "🌱";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// What a status bar item should show.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndicatorView {
    pub visible: bool,
    pub text: String,
    pub tooltip: String,
}

impl IndicatorView {
    pub fn render(status: &PresenceStatus, state: &ActiveSpecState) -> Self {
        if !status.any_root_has_marker {
            return Self::default();
        }
        match state.spec_name.as_deref() {
            Some(name) => Self {
                visible: true,
                text: format!("{GLYPH} {name}"),
                tooltip: format!("Spec-Kit detected: {name}"),
            },
            None => Self {
                visible: true,
                text: GLYPH.to_string(),
                tooltip: "Spec-Kit detected in this workspace".to_string(),
            },
        }
    }
}

/// Passive subscriber combining presence and active spec into one view.
pub struct StatusIndicator {
    inner: Arc<IndicatorInner>,
    subscriptions: Vec<Subscription>,
}

struct IndicatorInner {
    inputs: Mutex<(Arc<PresenceStatus>, Arc<ActiveSpecState>)>,
    view: Mutex<IndicatorView>,
    changed: Emitter<IndicatorView>,
}

impl IndicatorInner {
    fn update(&self, status: Option<&PresenceStatus>, state: Option<&ActiveSpecState>) {
        let next = {
            let mut inputs = lock(&self.inputs);
            if let Some(status) = status {
                inputs.0 = Arc::new(status.clone());
            }
            if let Some(state) = state {
                inputs.1 = Arc::new(state.clone());
            }
            IndicatorView::render(&inputs.0, &inputs.1)
        };
        {
            let mut view = lock(&self.view);
            if *view == next {
                return;
            }
            *view = next.clone();
        }
        self.changed.fire(&next);
    }
}

impl StatusIndicator {
    /// Start from both engines' current values and follow their changes.
    pub fn new(presence: &PresenceDetector, resolver: &ActiveSpecResolver) -> Self {
        let status = presence.current_status();
        let state = resolver.current_state();
        let view = IndicatorView::render(&status, &state);
        let inner = Arc::new(IndicatorInner {
            inputs: Mutex::new((status, state)),
            view: Mutex::new(view),
            changed: Emitter::new(),
        });

        let on_presence = Arc::clone(&inner);
        let on_spec = Arc::clone(&inner);
        let subscriptions = vec![
            presence.on_status_changed(move |status: &PresenceStatus| {
                on_presence.update(Some(status), None);
            }),
            resolver.on_state_changed(move |state: &ActiveSpecState| {
                on_spec.update(None, Some(state));
            }),
        ];

        Self {
            inner,
            subscriptions,
        }
    }

    pub fn current_view(&self) -> IndicatorView {
        lock(&self.inner.view).clone()
    }

    pub fn on_view_changed<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&IndicatorView) + Send + Sync + 'static,
    {
        self.inner.changed.subscribe(listener)
    }

    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<IndicatorView>) {
        self.inner.changed.subscribe_channel()
    }

    /// Stop following the engines. Idempotent.
    pub fn dispose(&mut self) {
        for mut subscription in self.subscriptions.drain(..) {
            subscription.dispose();
        }
        self.inner.changed.close();
    }
}
