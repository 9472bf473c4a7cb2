//! Change notification plumbing.
//!
//! [`Emitter`] is a synchronous fan-out channel: `fire` calls every listener
//! in subscription order on the caller's thread. Nothing is buffered, so a
//! listener only sees values fired after it subscribed. [`Subscription`] is
//! the disposable handle returned by every subscribe-style API in this
//! crate, including watcher and VCS registrations.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Disposable handle. Disposal is idempotent and also runs on drop.
#[must_use = "dropping a Subscription disposes it immediately"]
pub struct Subscription {
    disposer: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Wrap a disposer that runs at most once.
    pub fn new(disposer: impl FnOnce() + Send + 'static) -> Self {
        Self {
            disposer: Some(Box::new(disposer)),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { disposer: None }
    }

    /// Release the underlying resource. Panics from the disposer are swallowed.
    pub fn dispose(&mut self) {
        if let Some(disposer) = self.disposer.take()
            && catch_unwind(AssertUnwindSafe(disposer)).is_err()
        {
            tracing::debug!("Subscription disposer panicked; ignoring");
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposer.is_none()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

struct EmitterState<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
    closed: bool,
}

/// Synchronous multi-listener event channel.
pub struct Emitter<T> {
    state: Arc<Mutex<EmitterState<T>>>,
}

impl<T: 'static> Emitter<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(EmitterState {
                next_id: 0,
                listeners: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Register a listener. After [`Emitter::close`] this returns an inert handle.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = {
            let mut state = lock(&self.state);
            if state.closed {
                return Subscription::noop();
            }
            let id = state.next_id;
            state.next_id += 1;
            state.listeners.push((id, Arc::new(listener)));
            id
        };

        let weak = Arc::downgrade(&self.state);
        Subscription::new(move || {
            if let Some(state) = weak.upgrade() {
                lock(&state).listeners.retain(|(existing, _)| *existing != id);
            }
        })
    }

    /// Deliver `value` to every current listener, in subscription order.
    ///
    /// Listeners are snapshotted first so a listener may unsubscribe (or
    /// subscribe) from inside its own callback.
    pub fn fire(&self, value: &T) {
        let listeners: Vec<Listener<T>> = {
            let state = lock(&self.state);
            if state.closed {
                return;
            }
            state.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };

        for listener in listeners {
            listener(value);
        }
    }

    /// Drop all listeners and refuse new ones. Idempotent.
    pub fn close(&self) {
        let drained = {
            let mut state = lock(&self.state);
            state.closed = true;
            std::mem::take(&mut state.listeners)
        };
        // Listener closures may own channel senders; drop them outside the lock.
        drop(drained);
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.state).listeners.len()
    }
}

impl<T: Clone + Send + 'static> Emitter<T> {
    /// Subscribe through an unbounded channel.
    ///
    /// The receiver yields `None` once the emitter is closed or the returned
    /// subscription is disposed.
    pub fn subscribe_channel(&self) -> (Subscription, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |value: &T| {
            let _ = tx.send(value.clone());
        });
        (subscription, rx)
    }
}

impl<T: 'static> Default for Emitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<S>(mutex: &Mutex<S>) -> MutexGuard<'_, S> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fire_reaches_listeners_in_order() {
        let emitter = Emitter::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = Arc::clone(&seen);
        let _a = emitter.subscribe(move |v| s1.lock().unwrap().push(("a", *v)));
        let s2 = Arc::clone(&seen);
        let _b = emitter.subscribe(move |v| s2.lock().unwrap().push(("b", *v)));

        emitter.fire(&1);
        emitter.fire(&2);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![("a", 1), ("b", 1), ("a", 2), ("b", 2)]
        );
    }

    #[test]
    fn test_dispose_unsubscribes_and_is_idempotent() {
        let emitter = Emitter::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let mut sub = emitter.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        emitter.fire(&());
        sub.dispose();
        sub.dispose();
        emitter.fire(&());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(sub.is_disposed());
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_drop_unsubscribes() {
        let emitter = Emitter::<()>::new();
        {
            let _sub = emitter.subscribe(|_| {});
            assert_eq!(emitter.listener_count(), 1);
        }
        assert_eq!(emitter.listener_count(), 0);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let emitter = Arc::new(Emitter::<u8>::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let slot_clone = Arc::clone(&slot);
        let hits_clone = Arc::clone(&hits);
        let sub = emitter.subscribe(move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
            if let Some(mut own) = slot_clone.lock().unwrap().take() {
                own.dispose();
            }
        });
        *slot.lock().unwrap() = Some(sub);

        emitter.fire(&0);
        emitter.fire(&0);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_stops_delivery_and_rejects_new_listeners() {
        let emitter = Emitter::<u8>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _sub = emitter.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        emitter.close();
        emitter.close();
        emitter.fire(&1);

        let late = emitter.subscribe(|_| {});
        assert!(late.is_disposed());
        assert!(emitter.is_closed());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disposer_panic_is_swallowed() {
        let mut sub = Subscription::new(|| panic!("disposer failure"));
        sub.dispose();
        assert!(sub.is_disposed());
    }

    #[tokio::test]
    async fn test_channel_closes_with_emitter() {
        let emitter = Emitter::<String>::new();
        let (_sub, mut rx) = emitter.subscribe_channel();

        emitter.fire(&"first".to_string());
        emitter.close();

        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert_eq!(rx.recv().await, None);
    }
}
