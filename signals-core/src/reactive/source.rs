//! Versioned change sources.
//!
//! Every signal that can be depended on owns a [`Source`]: an identity, a
//! monotonically increasing version and the subscribers to notify when the
//! version moves. The version is the single source of truth for "changed";
//! values are never compared to detect a change.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use smallvec::SmallVec;
use tracing::trace;

use super::subscriber::{Subscriber, SubscriberId};

/// Unique identifier for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SignalId(u64);

impl SignalId {
    /// Generate a new unique signal ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SignalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity, version and subscribers of one signal.
pub(crate) struct Source {
    id: SignalId,
    version: AtomicU64,
    /// Serializes writers. Transactions take these in ID order.
    write_lock: Mutex<()>,
    subscribers: Mutex<Vec<Arc<Subscriber>>>,
}

impl Source {
    pub(crate) fn new() -> Self {
        Self {
            id: SignalId::new(),
            version: AtomicU64::new(0),
            write_lock: Mutex::new(()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn id(&self) -> SignalId {
        self.id
    }

    pub(crate) fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Advance the version. Callers hold the value lock so readers see the
    /// value and version move together.
    pub(crate) fn bump(&self) -> u64 {
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(signal = %self.id, version, "version bumped");
        version
    }

    pub(crate) fn subscribe(&self, subscriber: Arc<Subscriber>) {
        self.subscribers.lock().push(subscriber);
    }

    pub(crate) fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().retain(|s| s.id() != id);
    }

    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Notify every subscriber, in registration order.
    ///
    /// Must be called without holding any signal lock: listeners run
    /// synchronously and may read or write signals.
    pub(crate) fn notify(&self) {
        let subscribers: SmallVec<[Arc<Subscriber>; 4]> =
            self.subscribers.lock().iter().cloned().collect();

        if subscribers.is_empty() {
            return;
        }

        trace!(signal = %self.id, count = subscribers.len(), "notifying subscribers");

        let mut closed: SmallVec<[SubscriberId; 4]> = SmallVec::new();
        for subscriber in subscribers {
            if !subscriber.notify(false) {
                closed.push(subscriber.id());
            }
        }

        if !closed.is_empty() {
            self.subscribers
                .lock()
                .retain(|s| !closed.contains(&s.id()) && !s.is_closed());
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("id", &self.id)
            .field("version", &self.version())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

/// Something a tracked activity can depend on.
pub(crate) trait Dependency: Send + Sync {
    fn source(&self) -> &Source;

    /// Whether the dependency moved past the version captured at read time.
    fn has_changed_since(&self, version: u64) -> bool {
        self.source().version() != version
    }

    /// Whether a write to `signal` changes this dependency.
    fn depends_on(&self, signal: SignalId) -> bool {
        self.source().id() == signal
    }
}

impl Dependency for Source {
    fn source(&self) -> &Source {
        self
    }
}
