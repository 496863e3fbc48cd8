//! Value Signal
//!
//! The storage variant: one value behind a lock plus the [`Source`] that
//! carries its version and subscribers. Every other signal variant derives
//! its state from value signals.
//!
//! # Writes
//!
//! Read-modify-write operations compute the new value from a snapshot
//! outside any lock, then take the write lock and check that the version
//! still matches the snapshot. On a mismatch they start over. The value
//! and version change together under the value lock, and subscribers are
//! notified after every lock has been released.
//!
//! # Equality
//!
//! A plain [`ValueSignal::new`] treats every write as a change. A signal
//! built with [`ValueSignal::with_equality`] skips writes whose new value is
//! equal to the current one: no version bump, no notification.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{RwLock, RwLockWriteGuard};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::trace;

use super::context::ReactiveContext;
use super::runtime::Runtime;
use super::signal::{Signal, WritableSignal};
use super::source::{Dependency, SignalId, Source};
use super::transaction::{self, PendingInstall, StagedWrite};
use crate::error::Rejection;
use crate::operation::Operation;

type Equality<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

struct ValueInner<T> {
    source: Arc<Source>,
    value: RwLock<T>,
    equality: Option<Equality<T>>,
}

impl<T> ValueInner<T> {
    fn is_equal(&self, current: &T, next: &T) -> bool {
        self.equality.as_ref().is_some_and(|eq| eq(current, next))
    }
}

/// The outcome a write function picks for the current value.
pub(crate) enum Change<T> {
    /// Store a new value.
    Set(T),
    /// Leave the value alone and report success.
    Keep,
    /// Leave the value alone and report a rejection.
    Reject(Rejection),
}

/// How a write depends on the value it replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    /// The new value does not depend on the current one.
    Blind,
    /// The new value is computed from the current one.
    ReadModifyWrite,
}

/// A writable signal that stores its value directly.
///
/// Cloning is cheap and yields a handle to the same signal.
pub struct ValueSignal<T> {
    inner: Arc<ValueInner<T>>,
}

impl<T> ValueSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a signal with an initial value.
    pub fn new(value: T) -> Self {
        Self::build(value, None)
    }

    /// Create a signal that ignores writes of values `equality` deems equal
    /// to the current one.
    pub fn with_equality<F>(value: T, equality: F) -> Self
    where
        F: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self::build(value, Some(Arc::new(equality)))
    }

    fn build(value: T, equality: Option<Equality<T>>) -> Self {
        Self {
            inner: Arc::new(ValueInner {
                source: Arc::new(Source::new()),
                value: RwLock::new(value),
                equality,
            }),
        }
    }

    /// The number of committed writes so far.
    pub fn version(&self) -> u64 {
        self.inner.source.version()
    }

    /// The number of change listeners currently registered.
    pub fn subscriber_count(&self) -> usize {
        self.inner.source.subscriber_count()
    }

    fn dependency(&self) -> Arc<dyn Dependency> {
        self.inner.source.clone()
    }

    /// Value and version, read together.
    fn snapshot(&self) -> (T, u64) {
        let value = self.inner.value.read();
        (value.clone(), self.inner.source.version())
    }

    fn staged_value(&self) -> Option<T> {
        transaction::with_staged(self.id(), |write| {
            write
                .as_any()
                .downcast_ref::<PendingWrite<T>>()
                .and_then(|pending| pending.value.clone())
        })
    }

    /// Read inside a transaction: the staged value if there is one,
    /// otherwise the committed value, recorded as a transaction read.
    ///
    /// The version is the one read together with the committed value. A
    /// staged value pairs with the version current at the time of the read.
    fn transactional_read(&self, record: bool) -> (T, u64) {
        if let Some(staged) = self.staged_value() {
            return (staged, self.version());
        }
        let (value, version) = self.snapshot();
        if record {
            transaction::record_read(self.id(), version, || self.dependency());
        }
        (value, version)
    }

    /// Apply a write computed by `change`.
    pub(crate) fn write_with<F>(&self, access: Access, mut change: F) -> Operation<T>
    where
        F: FnMut(&T) -> Change<T>,
    {
        if transaction::in_transaction() {
            return self.stage(access, change);
        }

        let source = &self.inner.source;
        loop {
            let (current, version) = self.snapshot();
            let next = match change(&current) {
                Change::Set(next) => next,
                Change::Keep => return Operation::Applied(current),
                Change::Reject(rejection) => return Operation::Rejected(rejection),
            };
            if self.inner.is_equal(&current, &next) {
                return Operation::Applied(current);
            }

            let write_lock = source.lock_writes();
            if access == Access::ReadModifyWrite && source.version() != version {
                drop(write_lock);
                trace!(signal = %self.id(), "version moved during update, retrying");
                continue;
            }
            if let Err(rejection) = Runtime::check_write(self.id()) {
                return Operation::Rejected(rejection);
            }

            let mut value = self.inner.value.write();
            let previous = std::mem::replace(&mut *value, next);
            source.bump();
            drop(value);
            drop(write_lock);

            source.notify();
            return Operation::Applied(previous);
        }
    }

    fn stage<F>(&self, access: Access, mut change: F) -> Operation<T>
    where
        F: FnMut(&T) -> Change<T>,
    {
        let (current, _) = self.transactional_read(access == Access::ReadModifyWrite);
        let next = match change(&current) {
            Change::Set(next) => next,
            Change::Keep => return Operation::Applied(current),
            Change::Reject(rejection) => return transaction::reject(rejection),
        };
        if let Err(rejection) = Runtime::check_write(self.id()) {
            return transaction::reject(rejection);
        }

        transaction::stage(
            self.id(),
            Box::new(PendingWrite {
                target: self.inner.clone(),
                value: Some(next),
                forced: false,
            }),
        );
        Operation::Applied(current)
    }

    fn stage_modification<G, F>(&self, mut guard: G, mut modifier: F) -> Operation<()>
    where
        G: FnMut(&T) -> bool,
        F: FnMut(&mut T),
    {
        let (mut value, _) = self.transactional_read(true);
        if !guard(&value) {
            return transaction::reject(Rejection::UnexpectedValue);
        }
        if let Err(rejection) = Runtime::check_write(self.id()) {
            return transaction::reject(rejection);
        }
        modifier(&mut value);

        transaction::stage(
            self.id(),
            Box::new(PendingWrite {
                target: self.inner.clone(),
                value: Some(value),
                forced: true,
            }),
        );
        Operation::Applied(())
    }
}

impl<T> Signal<T> for ValueSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> SignalId {
        self.inner.source.id()
    }

    fn value(&self) -> T {
        if transaction::in_transaction() {
            let (value, version) = self.transactional_read(true);
            ReactiveContext::track_dependency(self.id(), version, || self.dependency());
            return value;
        }

        let (value, version) = self.snapshot();
        ReactiveContext::track_dependency(self.id(), version, || self.dependency());
        value
    }

    fn peek(&self) -> T {
        if transaction::in_transaction() {
            return self.transactional_read(false).0;
        }
        self.inner.value.read().clone()
    }
}

impl<T> WritableSignal<T> for ValueSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn update_if<F>(&self, mut f: F) -> Operation<T>
    where
        F: FnMut(&T) -> Option<T>,
    {
        self.write_with(Access::ReadModifyWrite, |current| match f(current) {
            Some(next) => Change::Set(next),
            None => Change::Reject(Rejection::UnexpectedValue),
        })
    }

    fn modify_if<G, F>(&self, mut guard: G, mut modifier: F) -> Operation<()>
    where
        G: FnMut(&T) -> bool,
        F: FnMut(&mut T),
    {
        if transaction::in_transaction() {
            return self.stage_modification(guard, modifier);
        }

        let source = &self.inner.source;
        let write_lock = source.lock_writes();
        {
            let current = self.inner.value.read();
            if !guard(&current) {
                return Operation::Rejected(Rejection::UnexpectedValue);
            }
        }
        if let Err(rejection) = Runtime::check_write(self.id()) {
            return Operation::Rejected(rejection);
        }

        let mut value = self.inner.value.write();
        modifier(&mut value);
        source.bump();
        drop(value);
        drop(write_lock);

        source.notify();
        Operation::Applied(())
    }

    fn set(&self, value: T) -> Operation<T> {
        self.write_with(Access::Blind, |_| Change::Set(value.clone()))
    }
}

impl<T> Clone for ValueSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Signals compare by identity, not by value.
impl<T> PartialEq for ValueSignal<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<T> Eq for ValueSignal<T> {}

impl<T> Hash for ValueSignal<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.source.id().hash(state);
    }
}

impl<T> fmt::Debug for ValueSignal<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueSignal")
            .field("id", &self.inner.source.id())
            .field("version", &self.inner.source.version())
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

impl<T> Serialize for ValueSignal<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.peek().serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for ValueSignal<T>
where
    T: Clone + Send + Sync + Deserialize<'de> + 'static,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(ValueSignal::new)
    }
}

/// A value staged by a transaction.
struct PendingWrite<T> {
    target: Arc<ValueInner<T>>,
    value: Option<T>,
    /// In-place modifications notify even when the value compares equal.
    forced: bool,
}

impl<T> StagedWrite for PendingWrite<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn dependency(&self) -> Arc<dyn Dependency> {
        self.target.source.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn lock(&mut self) -> Box<dyn PendingInstall + '_> {
        let target = &self.target;
        Box::new(LockedWrite {
            guard: target.value.write(),
            target,
            value: &mut self.value,
            forced: self.forced,
        })
    }
}

struct LockedWrite<'a, T> {
    guard: RwLockWriteGuard<'a, T>,
    target: &'a ValueInner<T>,
    value: &'a mut Option<T>,
    forced: bool,
}

impl<T> PendingInstall for LockedWrite<'_, T> {
    fn install(&mut self) -> bool {
        let Some(next) = self.value.take() else {
            return false;
        };
        if !self.forced && self.target.is_equal(&self.guard, &next) {
            return false;
        }
        *self.guard = next;
        self.target.source.bump();
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::track;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::thread;

    #[test]
    fn signal_creation_and_read() {
        let signal = ValueSignal::new(42);
        assert_eq!(signal.value(), 42);
        assert_eq!(signal.peek(), 42);
        assert_eq!(signal.version(), 0);
    }

    #[test]
    fn set_returns_previous_and_bumps_version() {
        let signal = ValueSignal::new(0);

        assert_eq!(signal.set(10), Operation::Applied(0));
        assert_eq!(signal.set(10), Operation::Applied(10));
        assert_eq!(signal.peek(), 10);
        assert_eq!(signal.version(), 2);
    }

    #[test]
    fn failed_replace_leaves_version_unchanged() {
        let signal = ValueSignal::new(1);
        assert!(signal.replace(&2, 3).is_rejected());
        assert_eq!(signal.version(), 0);
        assert_eq!(signal.peek(), 1);
    }

    #[test]
    fn equality_suppresses_redundant_writes() {
        let signal = ValueSignal::with_equality(5, |a: &i32, b: &i32| a == b);
        let (_, usage) = track(|| signal.value());

        assert_eq!(signal.set(5), Operation::Applied(5));
        assert_eq!(signal.version(), 0);
        assert!(!usage.has_changes());

        signal.set(6);
        assert_eq!(signal.version(), 1);
        assert!(usage.has_changes());
    }

    #[test]
    fn modify_always_notifies() {
        let signal = ValueSignal::with_equality(vec![1, 2], |a: &Vec<i32>, b: &Vec<i32>| a == b);
        let (_, usage) = track(|| signal.value());

        assert!(signal.modify(|_| {}).is_applied());
        assert_eq!(signal.version(), 1);
        assert!(usage.has_changes());

        signal.modify(|v| v.push(3));
        assert_eq!(signal.peek(), vec![1, 2, 3]);
    }

    #[test]
    fn guarded_modify_rejects_without_change() {
        let signal = ValueSignal::new(vec![1]);
        let outcome = signal.modify_if(|v| v.is_empty(), |v| v.clear());
        assert_eq!(outcome, Operation::Rejected(Rejection::UnexpectedValue));
        assert_eq!(signal.version(), 0);
    }

    #[test]
    fn peek_does_not_track() {
        let signal = ValueSignal::new(1);
        let (_, usage) = track(|| signal.peek());
        assert!(usage.is_none());
    }

    #[test]
    fn write_notifies_listeners() {
        let signal = ValueSignal::new(0);
        let (_, usage) = track(|| signal.value());

        let calls = Arc::new(AtomicI32::new(0));
        let calls_clone = calls.clone();
        let _cleanup = usage.on_next_change(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            true
        });

        signal.set(1);
        signal.update(|v| v + 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let signal = ValueSignal::new(0usize);
        let threads = 8;
        let per_thread = 250;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        assert!(signal.update(|v| v + 1).is_applied());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("writer thread panicked");
        }

        assert_eq!(signal.peek(), threads * per_thread);
        assert_eq!(signal.version(), (threads * per_thread) as u64);
    }

    #[test]
    fn transactional_read_captures_version_of_value_seen() {
        use crate::reactive::context::ContextKind;
        use crate::reactive::run_in_transaction;
        use std::sync::atomic::AtomicBool;

        // Every write bumps once, so the value always equals the version.
        let signal = ValueSignal::new(0u64);
        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let (signal, stop) = (signal.clone(), stop.clone());
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    signal.update(|v| v + 1);
                }
            })
        };

        let mismatches = Arc::new(AtomicI32::new(0));
        for _ in 0..500 {
            let _ = run_in_transaction(|| {
                let context = ReactiveContext::enter(ContextKind::Tracking);
                let value = signal.value();
                let captured = context.finish();
                if captured[&signal.id()].version != value {
                    mismatches.fetch_add(1, Ordering::SeqCst);
                }
            });
        }
        stop.store(true, Ordering::SeqCst);
        writer.join().expect("writer thread panicked");

        assert_eq!(mismatches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn clones_share_identity() {
        let a = ValueSignal::new(1);
        let b = a.clone();
        let c = ValueSignal::new(1);

        assert_eq!(a, b);
        assert_ne!(a, c);
        b.set(2);
        assert_eq!(a.peek(), 2);
    }

    #[test]
    fn serializes_as_plain_value() {
        let signal = ValueSignal::new(vec![1, 2, 3]);
        let json = serde_json::to_string(&signal).expect("serialize");
        assert_eq!(json, "[1,2,3]");

        let restored: ValueSignal<Vec<i32>> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(restored.peek(), vec![1, 2, 3]);
        assert_ne!(restored, signal);
    }
}
