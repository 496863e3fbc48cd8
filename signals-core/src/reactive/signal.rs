//! Signal Traits
//!
//! [`Signal`] is the read capability every signal variant shares.
//! [`WritableSignal`] adds writes on top of two primitives that concrete
//! signals implement:
//!
//! - `update_if`: replace the value with a function of the current value,
//!   or reject the write by returning `None`.
//! - `modify_if`: change the current value in place. The version is always
//!   bumped, even when the result compares equal to what was there before.
//!
//! Everything else (`set`, `replace`, `update`, `modify` and the mapping
//! constructors) is provided in terms of those two.
//!
//! # Reads
//!
//! `value()` records the signal in the innermost tracking context. `peek()`
//! never does. Inside a transaction both see the transaction's own staged
//! writes.

use std::fmt;
use std::sync::Arc;

use super::mapped::{MappedSignal, WritableMappedSignal, WriteBack};
use super::source::SignalId;
use crate::operation::Operation;

/// Read access to a reactive value.
pub trait Signal<T>: Send + Sync {
    /// The identity of this signal.
    fn id(&self) -> SignalId;

    /// Read the value and record the read in the current tracking context.
    fn value(&self) -> T;

    /// Read the value without recording it.
    fn peek(&self) -> T;

    /// A read-only signal that projects this signal's value.
    fn map<C, F>(&self, projection: F) -> MappedSignal<T, C>
    where
        Self: Sized + Clone + 'static,
        T: 'static,
        C: 'static,
        F: Fn(&T) -> C + Send + Sync + 'static,
    {
        MappedSignal::new(Arc::new(self.clone()), Arc::new(projection))
    }
}

/// Write access to a reactive value.
pub trait WritableSignal<T>: Signal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Write `f(current)` unless `f` returns `None`.
    ///
    /// `f` may run more than once when another writer gets in between the
    /// read and the write. Returns the value that was replaced. A `None` from
    /// `f` yields [`Rejection::UnexpectedValue`](crate::Rejection::UnexpectedValue).
    fn update_if<F>(&self, f: F) -> Operation<T>
    where
        F: FnMut(&T) -> Option<T>;

    /// Apply `modifier` to the current value in place if `guard` accepts it.
    ///
    /// Dependents are always notified, since an in-place change can leave
    /// the value equal to itself.
    fn modify_if<G, F>(&self, guard: G, modifier: F) -> Operation<()>
    where
        G: FnMut(&T) -> bool,
        F: FnMut(&mut T);

    /// Set a new value. Returns the previous one.
    fn set(&self, value: T) -> Operation<T> {
        self.update_if(|_| Some(value.clone()))
    }

    /// Set `value` if the current value equals `expected`.
    fn replace(&self, expected: &T, value: T) -> Operation<()>
    where
        T: PartialEq,
    {
        self.update_if(|current| (current == expected).then(|| value.clone()))
            .discard()
    }

    /// Replace the value with `f(current)`. Returns the previous value.
    ///
    /// `f` must be free of side effects: it is re-run on contention.
    fn update<F>(&self, mut f: F) -> Operation<T>
    where
        F: FnMut(&T) -> T,
    {
        self.update_if(|current| Some(f(current)))
    }

    /// Change the value in place and notify dependents.
    fn modify<F>(&self, modifier: F) -> Operation<()>
    where
        F: FnMut(&mut T),
    {
        self.modify_if(|_| true, modifier)
    }

    /// A view with the same identity that only allows reads.
    fn as_readonly(&self) -> ReadonlySignal<T>
    where
        Self: Sized + Clone + 'static,
    {
        ReadonlySignal::new(Arc::new(self.clone()))
    }

    /// A writable projection that writes back by rebuilding the parent value.
    fn map_rebuild<C, P, R>(&self, projection: P, rebuild: R) -> WritableMappedSignal<Self, T, C>
    where
        Self: Sized + Clone + 'static,
        C: Clone + Send + Sync + 'static,
        P: Fn(&T) -> C + Send + Sync + 'static,
        R: Fn(&T, C) -> T + Send + Sync + 'static,
    {
        WritableMappedSignal::new(
            self.clone(),
            Arc::new(projection),
            WriteBack::Rebuild(Arc::new(rebuild)),
        )
    }

    /// A writable projection that merges the new child into the parent.
    fn map_merge<C, P, M>(&self, projection: P, merge: M) -> WritableMappedSignal<Self, T, C>
    where
        Self: Sized + Clone + 'static,
        C: Clone + Send + Sync + 'static,
        P: Fn(&T) -> C + Send + Sync + 'static,
        M: Fn(&T, C) -> T + Send + Sync + 'static,
    {
        WritableMappedSignal::new(
            self.clone(),
            Arc::new(projection),
            WriteBack::Merge(Arc::new(merge)),
        )
    }

    /// A writable projection that mutates the parent value in place.
    fn map_mutable<C, P, M>(&self, projection: P, modifier: M) -> WritableMappedSignal<Self, T, C>
    where
        Self: Sized + Clone + 'static,
        C: Clone + Send + Sync + 'static,
        P: Fn(&T) -> C + Send + Sync + 'static,
        M: Fn(&mut T, C) + Send + Sync + 'static,
    {
        WritableMappedSignal::new(
            self.clone(),
            Arc::new(projection),
            WriteBack::InPlace(Arc::new(modifier)),
        )
    }
}

/// A read-only view of another signal.
///
/// Shares the identity of the signal it was created from.
pub struct ReadonlySignal<T> {
    inner: Arc<dyn Signal<T>>,
}

impl<T> ReadonlySignal<T> {
    pub fn new(inner: Arc<dyn Signal<T>>) -> Self {
        Self { inner }
    }
}

impl<T> Clone for ReadonlySignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Signal<T> for ReadonlySignal<T> {
    fn id(&self) -> SignalId {
        self.inner.id()
    }

    fn value(&self) -> T {
        self.inner.value()
    }

    fn peek(&self) -> T {
        self.inner.peek()
    }
}

impl<T> fmt::Debug for ReadonlySignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadonlySignal")
            .field("id", &self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Rejection;
    use crate::reactive::{track, ValueSignal};

    #[test]
    fn replace_compares_by_value() {
        let signal = ValueSignal::new(String::from("a"));

        assert!(signal.replace(&String::from("a"), String::from("b")).is_applied());
        assert_eq!(
            signal.replace(&String::from("a"), String::from("c")),
            Operation::Rejected(Rejection::UnexpectedValue)
        );
        assert_eq!(signal.peek(), "b");
    }

    #[test]
    fn update_returns_previous_value() {
        let signal = ValueSignal::new(10);
        assert_eq!(signal.update(|v| v + 5), Operation::Applied(10));
        assert_eq!(signal.peek(), 15);
    }

    #[test]
    fn readonly_view_shares_identity() {
        let signal = ValueSignal::new(1);
        let readonly = signal.as_readonly();

        assert_eq!(readonly.id(), signal.id());

        let (value, usage) = track(|| readonly.value());
        assert_eq!(value, 1);

        signal.set(2);
        assert!(usage.has_changes());
        assert_eq!(readonly.peek(), 2);
    }

    #[test]
    fn readonly_view_is_object_safe() {
        let signal = ValueSignal::new(3);
        let views: Vec<Box<dyn Signal<i32>>> = vec![
            Box::new(signal.clone()),
            Box::new(signal.as_readonly()),
            Box::new(signal.map(|v| v * 2)),
        ];
        let values: Vec<i32> = views.iter().map(|s| s.peek()).collect();
        assert_eq!(values, vec![3, 3, 6]);
    }
}
