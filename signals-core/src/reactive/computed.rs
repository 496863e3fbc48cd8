//! Computed Signal
//!
//! A ComputedSignal is a cached derived value that re-evaluates only when
//! something it read has changed.
//!
//! # How Computed Signals Work
//!
//! 1. On first `value()`, the computation runs in its own tracking context
//!    and the result is cached together with the captured [`Usage`].
//!
//! 2. A one-shot listener on that usage marks the cache stale when any
//!    input changes. Marking it stale bumps the computed signal's own
//!    version and notifies its dependents.
//!
//! 3. The next `value()` recomputes. Nothing is recomputed eagerly.
//!
//! Readers depend on the computed signal itself, never on its inputs.
//!
//! # Thread Safety
//!
//! The cache lock is not held while the computation runs, so computations
//! may read other computed signals freely. Two threads that find the cache
//! stale at the same time may both compute; the last one to finish wins.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use super::context::ReactiveContext;
use super::source::{Dependency, SignalId, Source};
use super::subscriber::CleanupCallback;
use super::transaction;
use super::usage::{track, untracked, Usage};
use super::Signal;

/// Cache state of a computed signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Never computed.
    Empty,

    /// The cached value is up to date.
    Clean,

    /// An input changed; the next read recomputes.
    Stale,
}

struct CacheSlot<T> {
    value: Option<T>,
    usage: Usage,
    stale: bool,
    subscription: Option<CleanupCallback>,
}

struct ComputedInner<T> {
    source: Source,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    cache: Mutex<CacheSlot<T>>,
}

impl<T> ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// The cached value if it is fresh.
    fn cached(&self) -> Option<T> {
        let needs_invalidation = {
            let slot = self.cache.lock();
            match &slot.value {
                None => return None,
                Some(_) if slot.stale => return None,
                Some(value) if !slot.usage.has_changes() => return Some(value.clone()),
                Some(_) => true,
            }
        };

        // An input changed but its notification has not reached us yet.
        // Announce the change now: once we recompute, the old listener is
        // gone and would never fire.
        if needs_invalidation {
            self.invalidate();
        }
        None
    }

    fn refresh(self: &Arc<Self>) -> T {
        if let Some(value) = self.cached() {
            return value;
        }

        let (value, usage) = track(|| (self.compute)());

        let previous = {
            let mut slot = self.cache.lock();
            slot.value = Some(value.clone());
            slot.usage = usage.clone();
            slot.stale = false;
            slot.subscription.take()
        };
        if let Some(previous) = previous {
            previous.cleanup();
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        let subscription = usage.on_next_change(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.invalidate();
            }
            false
        });

        let replaced = {
            let mut slot = self.cache.lock();
            if slot.usage.ptr_eq(&usage) {
                slot.subscription.replace(subscription)
            } else {
                // A concurrent refresh stored a newer usage.
                Some(subscription)
            }
        };
        if let Some(replaced) = replaced {
            replaced.cleanup();
        }

        value
    }

    fn invalidate(&self) {
        {
            let mut slot = self.cache.lock();
            if slot.stale || slot.value.is_none() {
                return;
            }
            slot.stale = true;
            self.source.bump();
        }
        debug!(signal = %self.source.id(), "computed signal invalidated");
        self.source.notify();
    }

    fn state(&self) -> CacheState {
        let slot = self.cache.lock();
        match slot.value {
            None => CacheState::Empty,
            Some(_) if slot.stale || slot.usage.has_changes() => CacheState::Stale,
            Some(_) => CacheState::Clean,
        }
    }
}

impl<T> Dependency for ComputedInner<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn source(&self) -> &Source {
        &self.source
    }

    fn has_changed_since(&self, version: u64) -> bool {
        if self.source.version() != version {
            return true;
        }
        let slot = self.cache.lock();
        slot.stale || slot.usage.has_changes()
    }

    fn depends_on(&self, signal: SignalId) -> bool {
        if self.source.id() == signal {
            return true;
        }
        let usage = self.cache.lock().usage.clone();
        usage.depends_on(signal)
    }
}

/// A read-only signal whose value is derived from other signals.
///
/// # Example
///
/// ```rust,ignore
/// let first = ValueSignal::new("Ada".to_string());
/// let last = ValueSignal::new("Lovelace".to_string());
///
/// let full = computed({
///     let (first, last) = (first.clone(), last.clone());
///     move || format!("{} {}", first.value(), last.value())
/// });
///
/// assert_eq!(full.value(), "Ada Lovelace");
/// ```
pub struct ComputedSignal<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> ComputedSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a computed signal. Nothing runs until the first read.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(ComputedInner {
                source: Source::new(),
                compute: Box::new(compute),
                cache: Mutex::new(CacheSlot {
                    value: None,
                    usage: Usage::none(),
                    stale: false,
                    subscription: None,
                }),
            }),
        }
    }

    /// Current cache state.
    pub fn state(&self) -> CacheState {
        self.inner.state()
    }

    /// Number of times the cache has been invalidated.
    pub fn version(&self) -> u64 {
        self.inner.source.version()
    }

    /// Number of listeners depending on this signal.
    pub fn subscriber_count(&self) -> usize {
        self.inner.source.subscriber_count()
    }
}

impl<T> Signal<T> for ComputedSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> SignalId {
        self.inner.source.id()
    }

    fn value(&self) -> T {
        // Staged writes must not end up in the shared cache.
        let value = if transaction::in_transaction() {
            untracked(|| (self.inner.compute)())
        } else {
            self.inner.refresh()
        };

        // Captured after the refresh. An invalidation racing with it leaves
        // the cache stale, which `has_changed_since` reports.
        let version = self.inner.source.version();
        ReactiveContext::track_dependency(self.id(), version, || {
            self.inner.clone() as Arc<dyn Dependency>
        });
        value
    }

    fn peek(&self) -> T {
        untracked(|| (self.inner.compute)())
    }
}

impl<T> Clone for ComputedSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for ComputedSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputedSignal")
            .field("id", &self.inner.source.id())
            .field("state", &self.state())
            .finish()
    }
}

/// Shorthand for [`ComputedSignal::new`].
pub fn computed<T, F>(compute: F) -> ComputedSignal<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    ComputedSignal::new(compute)
}

// ---- Tests ----

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{ValueSignal, WritableSignal};
    use std::sync::atomic::{AtomicI32, Ordering};

    fn counted<T, F>(counter: &Arc<AtomicI32>, f: F) -> impl Fn() -> T + Send + Sync + 'static
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let counter = counter.clone();
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
            f()
        }
    }

    #[test]
    fn computes_lazily_and_caches() {
        let runs = Arc::new(AtomicI32::new(0));
        let source = ValueSignal::new(2);
        let doubled = {
            let source = source.clone();
            computed(counted(&runs, move || source.value() * 2))
        };

        assert_eq!(doubled.state(), CacheState::Empty);
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        assert_eq!(doubled.value(), 4);
        assert_eq!(doubled.value(), 4);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(doubled.state(), CacheState::Clean);
    }

    #[test]
    fn recomputes_after_input_changes() {
        let runs = Arc::new(AtomicI32::new(0));
        let source = ValueSignal::new(1);
        let plus_one = {
            let source = source.clone();
            computed(counted(&runs, move || source.value() + 1))
        };

        assert_eq!(plus_one.value(), 2);
        source.set(10);
        assert_eq!(plus_one.state(), CacheState::Stale);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        assert_eq!(plus_one.value(), 11);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn peek_bypasses_cache() {
        let runs = Arc::new(AtomicI32::new(0));
        let source = ValueSignal::new(1);
        let same = {
            let source = source.clone();
            computed(counted(&runs, move || source.value()))
        };

        let (_, usage) = track(|| same.peek());
        assert!(usage.is_none());
        same.peek();

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(same.state(), CacheState::Empty);
    }

    #[test]
    fn readers_depend_on_computed_not_inputs() {
        let source = ValueSignal::new(1);
        let derived = {
            let source = source.clone();
            computed(move || source.value() * 10)
        };

        let (_, usage) = track(|| derived.value());
        assert_eq!(usage.signal_ids(), vec![derived.id()]);

        source.set(2);
        assert!(usage.has_changes());
        assert_eq!(derived.version(), 1);
    }

    #[test]
    fn chained_computeds_propagate_invalidation() {
        let source = ValueSignal::new(1);
        let first = {
            let source = source.clone();
            computed(move || source.value() + 1)
        };
        let second = {
            let first = first.clone();
            computed(move || first.value() * 2)
        };

        assert_eq!(second.value(), 4);
        source.set(5);
        assert_eq!(second.state(), CacheState::Stale);
        assert_eq!(second.value(), 12);
    }

    #[test]
    fn invalidation_notifies_once_until_recomputed() {
        let source = ValueSignal::new(0);
        let derived = {
            let source = source.clone();
            computed(move || source.value())
        };
        derived.value();

        source.set(1);
        source.set(2);
        assert_eq!(derived.version(), 1);

        assert_eq!(derived.value(), 2);
        source.set(3);
        assert_eq!(derived.version(), 2);
    }

    #[test]
    fn dropping_computed_releases_input_listener() {
        let source = ValueSignal::new(0);
        let derived = {
            let source = source.clone();
            computed(move || source.value())
        };
        derived.value();
        assert_eq!(source.subscriber_count(), 1);

        drop(derived);
        source.set(1);
        assert_eq!(source.subscriber_count(), 0);
    }
}
