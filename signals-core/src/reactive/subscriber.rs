//! Subscriber types for the reactive system.
//!
//! A [`Subscriber`] wraps a transient change listener registered through
//! [`Usage::on_next_change`](super::Usage::on_next_change). The same
//! subscriber is attached to every signal a usage captured, so a single
//! listener observes a change to any of them.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Unique identifier for a subscriber.
///
/// Effects, tracking contexts and change listeners each get one. The ID is
/// used to find and remove registrations without comparing closures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Listener invoked when a dependency changes.
///
/// The argument is `true` when the change had already happened at
/// registration time. Returning `false` removes the listener.
pub type TransientListener = Box<dyn FnMut(bool) -> bool + Send>;

enum SubscriberState {
    Idle(TransientListener),
    /// The listener is out of the lock. `pending` records a notification
    /// that arrived meanwhile.
    Running { pending: bool },
    Closed,
}

/// A change listener shared between all signals of one usage.
pub struct Subscriber {
    id: SubscriberId,
    state: Mutex<SubscriberState>,
}

impl Subscriber {
    /// Create a new subscriber with the given listener.
    pub fn new<F>(listener: F) -> Self
    where
        F: FnMut(bool) -> bool + Send + 'static,
    {
        Self::with_id(SubscriberId::new(), listener)
    }

    /// Create a subscriber with an ID chosen up front, so the listener can
    /// refer to its own registration.
    pub(crate) fn with_id<F>(id: SubscriberId, listener: F) -> Self
    where
        F: FnMut(bool) -> bool + Send + 'static,
    {
        Self {
            id,
            state: Mutex::new(SubscriberState::Idle(Box::new(listener))),
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the listener has been removed.
    pub fn is_closed(&self) -> bool {
        matches!(*self.state.lock(), SubscriberState::Closed)
    }

    /// Invoke the listener. Returns whether the subscriber is still active.
    ///
    /// The listener is taken out of the lock while it runs, so it may write
    /// signals that notify this same subscriber. A notification arriving
    /// while the listener runs, from this thread or another, is delivered
    /// once more after it returns, unless it asked to be removed.
    pub fn notify(&self, initial: bool) -> bool {
        let mut listener = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, SubscriberState::Running { pending: false }) {
                SubscriberState::Idle(listener) => listener,
                SubscriberState::Running { .. } => {
                    *state = SubscriberState::Running { pending: true };
                    return true;
                }
                SubscriberState::Closed => {
                    *state = SubscriberState::Closed;
                    return false;
                }
            }
        };

        let mut initial = initial;
        loop {
            let keep = listener(initial);

            let mut state = self.state.lock();
            let rerun = match &mut *state {
                SubscriberState::Running { pending } if keep => std::mem::take(pending),
                _ => {
                    *state = SubscriberState::Closed;
                    return false;
                }
            };
            if !rerun {
                *state = SubscriberState::Idle(listener);
                return true;
            }
            initial = false;
        }
    }

    /// Drop the listener. Later notifications are ignored.
    pub fn close(&self) {
        *self.state.lock() = SubscriberState::Closed;
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Handle that removes a registration when invoked.
///
/// Returned by [`effect`](super::effect) and
/// [`Usage::on_next_change`](super::Usage::on_next_change). Cloning shares
/// the registration; the first `cleanup` call wins and later calls do
/// nothing. Dropping the handle does not clean up.
#[derive(Clone)]
pub struct CleanupCallback {
    cleanup: Arc<Mutex<Option<Box<dyn FnOnce() + Send>>>>,
}

impl CleanupCallback {
    /// Wrap a cleanup action.
    pub fn new<F>(cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            cleanup: Arc::new(Mutex::new(Some(Box::new(cleanup)))),
        }
    }

    /// A callback with nothing to clean up.
    pub fn noop() -> Self {
        Self {
            cleanup: Arc::new(Mutex::new(None)),
        }
    }

    /// Run the cleanup action if it has not run yet.
    pub fn cleanup(&self) {
        let cleanup = self.cleanup.lock().take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }

    /// Whether the cleanup action has already run.
    pub fn is_cleaned_up(&self) -> bool {
        self.cleanup.lock().is_none()
    }
}

impl fmt::Debug for CleanupCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupCallback")
            .field("cleaned_up", &self.is_cleaned_up())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, AtomicUsize};
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn subscriber_notify_calls_listener() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let subscriber = Subscriber::new(move |initial| {
            assert!(!initial);
            calls_clone.fetch_add(1, Ordering::SeqCst);
            true
        });

        assert!(subscriber.notify(false));
        assert!(subscriber.notify(false));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscriber_closes_when_listener_returns_false() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let subscriber = Subscriber::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            false
        });

        assert!(!subscriber.notify(false));
        assert!(subscriber.is_closed());
        assert!(!subscriber.notify(false));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn closed_subscriber_is_not_invoked() {
        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();

        let subscriber = Subscriber::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            true
        });
        subscriber.close();

        assert!(!subscriber.notify(false));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn notification_during_listener_is_delivered_after_it_returns() {
        let calls = Arc::new(AtomicI32::new(0));
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));

        let subscriber = Arc::new(Subscriber::new({
            let calls = calls.clone();
            let entered = entered.clone();
            let release = release.clone();
            move |_| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    entered.wait();
                    release.wait();
                }
                true
            }
        }));

        let first = {
            let subscriber = subscriber.clone();
            thread::spawn(move || subscriber.notify(false))
        };
        entered.wait();
        assert!(subscriber.notify(false));
        release.wait();

        assert!(first.join().unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!subscriber.is_closed());
    }

    #[test]
    fn pending_notification_is_dropped_when_listener_closes() {
        let calls = Arc::new(AtomicI32::new(0));
        let slot: Arc<Mutex<Option<Arc<Subscriber>>>> = Arc::new(Mutex::new(None));

        let subscriber = Arc::new(Subscriber::new({
            let calls = calls.clone();
            let slot = slot.clone();
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let me = slot.lock().clone();
                if let Some(me) = me {
                    me.notify(false);
                }
                false
            }
        }));
        *slot.lock() = Some(subscriber.clone());

        assert!(!subscriber.notify(false));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        slot.lock().take();
    }

    #[test]
    fn cleanup_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();

        let callback = CleanupCallback::new(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });
        let shared = callback.clone();

        callback.cleanup();
        shared.cleanup();

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(shared.is_cleaned_up());
    }
}
