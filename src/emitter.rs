//! Listener registration primitives: a keyed [`Emitter`] and the scoped
//! [`Subscription`] handle controlling each listener's lifetime.
//!
//! Listeners are never removed by reference; every registration hands back a
//! [`Subscription`] and releasing it (explicitly or by drop) is the only way
//! to detach. Components accumulate their subscriptions in lists and release
//! them in bulk when tearing a phase down, which keeps handlers from leaking
//! across reconnects.

use std::{
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
};

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;
type HandlerMap<K, E> = Mutex<HashMap<K, Vec<(u64, Handler<E>)>>>;

/// A listener registry keyed by an event discriminant `K`, dispatching
/// payloads of type `E`.
///
/// Dispatch snapshots the handler list before invoking, so handlers may
/// re-enter the emitter (subscribe, release, emit) freely. A handler released
/// during a dispatch still observes the event of that dispatch.
pub struct Emitter<K, E> {
    seq: AtomicU64,
    handlers: Arc<HandlerMap<K, E>>,
}

impl<K: Eq + Hash + Clone + Send + 'static, E: 'static> Emitter<K, E> {
    /// Create an empty emitter.
    pub fn new() -> Self {
        Self {
            seq: AtomicU64::new(0),
            handlers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Attach `handler` to the given event key.
    ///
    /// The handler stays attached until the returned [`Subscription`] is
    /// released or dropped.
    pub fn on(
        &self,
        key: K,
        handler: impl Fn(&E) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.seq.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        let handlers: Weak<HandlerMap<K, E>> = Arc::downgrade(&self.handlers);
        Subscription::new(move || {
            if let Some(handlers) = handlers.upgrade() {
                let mut handlers = handlers.lock().unwrap();
                if let Some(list) = handlers.get_mut(&key) {
                    list.retain(|(i, _)| *i != id);
                    if list.is_empty() {
                        handlers.remove(&key);
                    }
                }
            }
        })
    }

    /// Dispatch `event` to every handler attached to `key`.
    pub fn emit(&self, key: &K, event: &E) {
        let snapshot: Vec<Handler<E>> = match self.handlers.lock().unwrap().get(key) {
            Some(list) => list.iter().map(|(_, h)| h.clone()).collect(),
            None => return,
        };
        for handler in snapshot {
            handler(event);
        }
    }

    /// Number of handlers currently attached to `key`.
    pub fn listener_count(&self, key: &K) -> usize {
        self.handlers
            .lock()
            .unwrap()
            .get(key)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl<K: Eq + Hash + Clone + Send + 'static, E: 'static> Default for Emitter<K, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, E> fmt::Debug for Emitter<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter").finish_non_exhaustive()
    }
}

/// A scoped listener (or timer) registration.
///
/// [`release`](Subscription::release) detaches the listener; it is idempotent
/// and a no-op after the first call. Dropping the handle releases it, so
/// clearing a `Vec<Arc<Subscription>>` is the bulk-release discipline used
/// during cleanup.
pub struct Subscription {
    cancel: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    /// Wrap a cancellation action. The action runs at most once.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Mutex::new(Some(Box::new(cancel))),
        }
    }

    /// Detach the listener. Idempotent.
    pub fn release(&self) {
        let cancel = self.cancel.lock().unwrap().take();
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let released = self.cancel.lock().unwrap().is_none();
        f.debug_struct("Subscription")
            .field("released", &released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_reaches_every_handler() {
        let emitter: Emitter<&'static str, u32> = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c1 = count.clone();
        let c2 = count.clone();
        let _s1 = emitter.on("ev", move |v| {
            c1.fetch_add(*v as usize, Ordering::SeqCst);
        });
        let _s2 = emitter.on("ev", move |v| {
            c2.fetch_add(*v as usize, Ordering::SeqCst);
        });
        emitter.emit(&"ev", &2);
        emitter.emit(&"other", &100);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn release_is_idempotent() {
        let emitter: Emitter<&'static str, ()> = Emitter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = emitter.on("ev", move |()| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        sub.release();
        sub.release();
        emitter.emit(&"ev", &());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(emitter.listener_count(&"ev"), 0);
    }

    #[test]
    fn drop_releases() {
        let emitter: Emitter<&'static str, ()> = Emitter::new();
        {
            let _sub = emitter.on("ev", |()| {});
            assert_eq!(emitter.listener_count(&"ev"), 1);
        }
        assert_eq!(emitter.listener_count(&"ev"), 0);
    }

    #[test]
    fn bulk_release() {
        let emitter: Emitter<u8, ()> = Emitter::new();
        let mut subs = Vec::new();
        for key in 0..4u8 {
            subs.push(Arc::new(emitter.on(key, |()| {})));
        }
        subs.clear();
        for key in 0..4u8 {
            assert_eq!(emitter.listener_count(&key), 0);
        }
    }

    #[test]
    fn handler_may_release_itself_during_emit() {
        let emitter: Arc<Emitter<&'static str, ()>> = Arc::new(Emitter::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let s = slot.clone();
        let sub = emitter.on("ev", move |()| {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = s.lock().unwrap().take() {
                sub.release();
            }
        });
        *slot.lock().unwrap() = Some(sub);
        emitter.emit(&"ev", &());
        emitter.emit(&"ev", &());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
