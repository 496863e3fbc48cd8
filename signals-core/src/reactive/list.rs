//! List Signal
//!
//! An ordered collection whose entries are independent [`ValueSignal`]s.
//!
//! The list's shape lives in a value signal of its own holding an immutable
//! slice of entry handles. Structural changes (insert, move, remove, clear)
//! replace that slice and bump only the list's version. Writing an entry
//! bumps only that entry's version. A reader that only looked at the shape
//! is therefore never notified about entry edits, and a reader of one entry
//! never hears about structural changes.
//!
//! `value()` returns the slice itself, so a snapshot taken earlier is never
//! affected by later structural changes.

use std::fmt;
use std::sync::Arc;

use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::signal::{Signal, WritableSignal};
use super::source::SignalId;
use super::transaction;
use super::value::{Access, Change, ValueSignal};
use crate::error::{Rejection, SignalError};
use crate::operation::Operation;

/// The entries of a list at one point in time.
pub type Entries<T> = Arc<[ValueSignal<T>]>;

/// One side of a [`ListPosition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anchor {
    /// The start of the list when used as `after`, its end as `before`.
    Edge,
    /// A specific entry.
    Entry(SignalId),
}

/// A place in a list, described by the neighbours it must have.
///
/// `after` names what must directly precede the place, `before` what must
/// directly follow it. Positions are resolved against the entries at the
/// time of the write, so concurrent edits that move a neighbour make the
/// position invalid instead of silently landing somewhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListPosition {
    after: Option<Anchor>,
    before: Option<Anchor>,
}

impl ListPosition {
    /// The start of the list.
    pub fn first() -> Self {
        Self {
            after: Some(Anchor::Edge),
            before: None,
        }
    }

    /// The end of the list.
    pub fn last() -> Self {
        Self {
            after: None,
            before: Some(Anchor::Edge),
        }
    }

    /// Directly after `entry`.
    pub fn after<T>(entry: &ValueSignal<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self {
            after: Some(Anchor::Entry(entry.id())),
            before: None,
        }
    }

    /// Directly before `entry`.
    pub fn before<T>(entry: &ValueSignal<T>) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self {
            after: None,
            before: Some(Anchor::Entry(entry.id())),
        }
    }

    /// Between two anchors that must be adjacent.
    pub fn between(after: Anchor, before: Anchor) -> Self {
        Self {
            after: Some(after),
            before: Some(before),
        }
    }

    pub fn after_anchor(&self) -> Option<Anchor> {
        self.after
    }

    pub fn before_anchor(&self) -> Option<Anchor> {
        self.before
    }

    /// The insertion index in `entries`, if the position is valid there.
    fn resolve<T>(&self, entries: &[ValueSignal<T>]) -> Option<usize>
    where
        T: Clone + Send + Sync + 'static,
    {
        let index_of = |id: SignalId| entries.iter().position(|entry| entry.id() == id);

        let from_after = match self.after {
            None => None,
            Some(Anchor::Edge) => Some(0),
            Some(Anchor::Entry(id)) => Some(index_of(id)? + 1),
        };
        let from_before = match self.before {
            None => None,
            Some(Anchor::Edge) => Some(entries.len()),
            Some(Anchor::Entry(id)) => Some(index_of(id)?),
        };

        match (from_after, from_before) {
            (Some(a), Some(b)) if a == b => Some(a),
            (Some(_), Some(_)) => None,
            (Some(index), None) | (None, Some(index)) => Some(index),
            (None, None) => None,
        }
    }

    /// Whether the entry at `index` sits at this position.
    fn matches<T>(&self, entries: &[ValueSignal<T>], index: usize) -> bool
    where
        T: Clone + Send + Sync + 'static,
    {
        let after_ok = match self.after {
            None => true,
            Some(Anchor::Edge) => index == 0,
            Some(Anchor::Entry(id)) => index > 0 && entries[index - 1].id() == id,
        };
        let before_ok = match self.before {
            None => true,
            Some(Anchor::Edge) => index + 1 == entries.len(),
            Some(Anchor::Entry(id)) => entries.get(index + 1).is_some_and(|e| e.id() == id),
        };
        after_ok && before_ok
    }
}

/// An ordered list of independently writable entries.
pub struct ListSignal<T> {
    entries: ValueSignal<Entries<T>>,
}

impl<T> ListSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty list.
    pub fn new() -> Self {
        Self {
            entries: ValueSignal::new(Arc::from(Vec::new())),
        }
    }

    /// Number of structural changes so far.
    pub fn version(&self) -> u64 {
        self.entries.version()
    }

    /// Current number of entries, without tracking.
    pub fn len(&self) -> usize {
        self.entries.peek().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a value at the start. Returns the new entry.
    ///
    /// Rejected like any other write, for example from an effect that read
    /// the list.
    pub fn insert_first(&self, value: T) -> Operation<ValueSignal<T>> {
        let entry = ValueSignal::new(value);
        self.splice(|entries| Ok(spliced(entries, 0, &entry)))
            .map(|_| entry)
    }

    /// Insert a value at the end. Returns the new entry.
    pub fn insert_last(&self, value: T) -> Operation<ValueSignal<T>> {
        let entry = ValueSignal::new(value);
        self.splice(|entries| Ok(spliced(entries, entries.len(), &entry)))
            .map(|_| entry)
    }

    /// Insert a value at `index`, which may be at most the current length.
    pub fn insert_at(&self, index: usize, value: T) -> Result<ValueSignal<T>, SignalError> {
        let entry = ValueSignal::new(value);
        let outcome = self.splice(|entries| {
            if index > entries.len() {
                return Err(Rejection::IndexOutOfBounds {
                    index,
                    len: entries.len(),
                });
            }
            Ok(spliced(entries, index, &entry))
        });

        match outcome {
            Operation::Applied(_) => Ok(entry),
            Operation::Rejected(Rejection::IndexOutOfBounds { index, len }) => {
                Err(SignalError::IndexOutOfBounds { index, len })
            }
            Operation::Rejected(rejection) => Err(rejection.into()),
        }
    }

    /// Insert a value at `position`.
    pub fn insert_at_position(&self, value: T, position: ListPosition) -> Operation<ValueSignal<T>> {
        let entry = ValueSignal::new(value);
        self.splice(|entries| {
            let index = position.resolve(&entries[..]).ok_or(Rejection::InvalidPosition)?;
            Ok(spliced(entries, index, &entry))
        })
        .map(|_| entry)
    }

    /// Move an existing entry to `position`.
    ///
    /// The position is resolved with the entry itself taken out of the list.
    pub fn move_to(&self, entry: &ValueSignal<T>, position: ListPosition) -> Operation<()> {
        self.splice(|entries| {
            let current = entries
                .iter()
                .position(|e| e == entry)
                .ok_or(Rejection::InvalidPosition)?;
            let mut remaining: Vec<ValueSignal<T>> = entries.to_vec();
            let moved = remaining.remove(current);
            let index = position
                .resolve(&remaining[..])
                .ok_or(Rejection::InvalidPosition)?;
            remaining.insert(index, moved);
            Ok(remaining.into())
        })
        .discard()
    }

    /// Remove an entry by identity. Returns whether it was present.
    ///
    /// Removing an entry that is not in the list changes nothing.
    pub fn remove(&self, entry: &ValueSignal<T>) -> bool {
        let mut removed = false;
        let outcome = self.entries.write_with(Access::ReadModifyWrite, |entries| {
            match entries.iter().position(|e| e == entry) {
                Some(index) => {
                    removed = true;
                    let mut remaining = entries.to_vec();
                    remaining.remove(index);
                    Change::Set(remaining.into())
                }
                None => {
                    removed = false;
                    Change::Keep
                }
            }
        });
        outcome.is_applied() && removed
    }

    /// Remove every entry. Always counts as a structural change.
    pub fn clear(&self) -> Operation<()> {
        self.entries
            .write_with(Access::Blind, |_| Change::Set(Arc::from(Vec::new())))
            .discard()
    }

    /// Check that `entry` currently sits at `position`.
    ///
    /// The list shape is read tracked, so inside a transaction the check is
    /// validated again at commit, and a failed check dooms the transaction.
    pub fn verify_position(&self, entry: &ValueSignal<T>, position: ListPosition) -> Operation<()> {
        let entries = self.entries.value();
        let valid = entries
            .iter()
            .position(|e| e == entry)
            .is_some_and(|index| position.matches(&entries[..], index));

        if valid {
            Operation::Applied(())
        } else {
            transaction::reject(Rejection::InvalidPosition)
        }
    }

    fn splice<F>(&self, mut f: F) -> Operation<Entries<T>>
    where
        F: FnMut(&Entries<T>) -> Result<Entries<T>, Rejection>,
    {
        self.entries
            .write_with(Access::ReadModifyWrite, |entries| match f(entries) {
                Ok(next) => Change::Set(next),
                Err(rejection) => Change::Reject(rejection),
            })
    }
}

fn spliced<T>(entries: &[ValueSignal<T>], index: usize, entry: &ValueSignal<T>) -> Entries<T> {
    let mut next = Vec::with_capacity(entries.len() + 1);
    next.extend_from_slice(&entries[..index]);
    next.push(entry.clone());
    next.extend_from_slice(&entries[index..]);
    next.into()
}

impl<T> Default for ListSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Signal<Entries<T>> for ListSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn id(&self) -> SignalId {
        self.entries.id()
    }

    fn value(&self) -> Entries<T> {
        self.entries.value()
    }

    fn peek(&self) -> Entries<T> {
        self.entries.peek()
    }
}

impl<T> Clone for ListSignal<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> PartialEq for ListSignal<T> {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl<T> Eq for ListSignal<T> {}

impl<T> fmt::Debug for ListSignal<T>
where
    T: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListSignal")
            .field("id", &self.id())
            .field("entries", &self.peek())
            .finish()
    }
}

impl<T> Serialize for ListSignal<T>
where
    T: Clone + Send + Sync + Serialize + 'static,
{
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let entries = self.peek();
        let mut seq = serializer.serialize_seq(Some(entries.len()))?;
        for entry in entries.iter() {
            seq.serialize_element(&entry.peek())?;
        }
        seq.end()
    }
}

impl<'de, T> Deserialize<'de> for ListSignal<T>
where
    T: Clone + Send + Sync + Deserialize<'de> + 'static,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let values = Vec::<T>::deserialize(deserializer)?;
        let entries: Vec<ValueSignal<T>> = values.into_iter().map(ValueSignal::new).collect();
        Ok(Self {
            entries: ValueSignal::new(entries.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{run_in_transaction, track, Effect};
    use parking_lot::Mutex;

    fn values<T>(list: &ListSignal<T>) -> Vec<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        list.peek().iter().map(|entry| entry.peek()).collect()
    }

    #[test]
    fn inserts_in_order() {
        let list = ListSignal::new();
        list.insert_last("b");
        list.insert_first("a");
        list.insert_last("d");
        list.insert_at(2, "c").expect("index in range");

        assert_eq!(values(&list), vec!["a", "b", "c", "d"]);
        assert_eq!(list.version(), 4);
    }

    #[test]
    fn insert_at_rejects_out_of_range() {
        let list = ListSignal::new();
        list.insert_last(1);

        let error = list.insert_at(3, 2).expect_err("index out of range");
        assert!(matches!(error, SignalError::IndexOutOfBounds { index: 3, len: 1 }));
        assert_eq!(list.len(), 1);
        assert_eq!(list.version(), 1);
    }

    #[test]
    fn out_of_range_insert_dooms_transaction() {
        let list = ListSignal::new();
        let other = ValueSignal::new(0);
        let mut error = None;

        let outcome = run_in_transaction(|| {
            other.set(1);
            error = list.insert_at(5, 1).err();
        });

        assert!(matches!(
            error,
            Some(SignalError::IndexOutOfBounds { index: 5, len: 0 })
        ));
        assert_eq!(
            outcome,
            Operation::Rejected(Rejection::IndexOutOfBounds { index: 5, len: 0 })
        );
        assert_eq!(other.peek(), 0);
        assert!(list.is_empty());
    }

    #[test]
    fn insert_from_effect_reading_list_is_rejected() {
        let list: ListSignal<usize> = ListSignal::new();
        let outcome: Arc<Mutex<Option<Operation<ValueSignal<usize>>>>> =
            Arc::new(Mutex::new(None));

        let effect = Effect::new({
            let (list, outcome) = (list.clone(), outcome.clone());
            move || {
                let len = list.value().len();
                *outcome.lock() = Some(list.insert_last(len));
            }
        });

        let outcome = outcome.lock().clone();
        assert!(matches!(
            outcome,
            Some(Operation::Rejected(Rejection::EffectLoop { .. }))
        ));
        assert!(effect.is_disposed());
        assert!(list.is_empty());
    }

    #[test]
    fn snapshot_is_immutable() {
        let list = ListSignal::new();
        list.insert_last(1);
        let snapshot = list.value();

        list.insert_first(0);
        list.insert_last(2);

        assert_eq!(snapshot.len(), 1);
        assert_eq!(list.len(), 3);
    }

    #[test]
    fn entry_edits_do_not_touch_shape() {
        let list = ListSignal::new();
        let entry = list.insert_last(1).ok().expect("append");
        let (_, shape) = track(|| list.value());
        let (_, single) = track(|| entry.value());

        entry.set(2);
        assert!(!shape.has_changes());
        assert!(single.has_changes());

        let (_, single) = track(|| entry.value());
        list.insert_last(3);
        assert!(shape.has_changes());
        assert!(!single.has_changes());
        assert_eq!(entry.version(), 1);
    }

    #[test]
    fn remove_is_identity_based() {
        let list = ListSignal::new();
        let a = list.insert_last(1).ok().expect("append");
        let b = list.insert_last(1).ok().expect("append");
        let version = list.version();

        assert!(list.remove(&a));
        assert_eq!(list.version(), version + 1);
        assert_eq!(list.peek().to_vec(), vec![b.clone()]);

        assert!(!list.remove(&a));
        assert_eq!(list.version(), version + 1);
    }

    #[test]
    fn clear_always_bumps() {
        let list: ListSignal<i32> = ListSignal::new();
        assert!(list.clear().is_applied());
        assert_eq!(list.version(), 1);

        list.insert_last(1);
        list.clear();
        assert!(list.is_empty());
        assert_eq!(list.version(), 3);
    }

    #[test]
    fn positions_resolve_against_neighbours() {
        let list = ListSignal::new();
        let a = list
            .insert_at_position("a", ListPosition::last())
            .ok()
            .expect("append");
        let c = list
            .insert_at_position("c", ListPosition::after(&a))
            .ok()
            .expect("after a");
        let between = ListPosition::between(Anchor::Entry(a.id()), Anchor::Entry(c.id()));
        assert!(list.insert_at_position("b", between).is_applied());
        assert!(list
            .insert_at_position("start", ListPosition::first())
            .is_applied());

        assert_eq!(values(&list), vec!["start", "a", "b", "c"]);

        let invalid = list.insert_at_position("x", between);
        assert_eq!(invalid.rejection(), Some(&Rejection::InvalidPosition));
        assert_eq!(list.len(), 4);
    }

    #[test]
    fn move_to_reorders_without_touching_entry() {
        let list = ListSignal::new();
        let a = list.insert_last("a").ok().expect("append");
        let b = list.insert_last("b").ok().expect("append");
        let c = list.insert_last("c").ok().expect("append");

        assert!(list.move_to(&c, ListPosition::first()).is_applied());
        assert_eq!(values(&list), vec!["c", "a", "b"]);
        assert!(list.move_to(&c, ListPosition::after(&b)).is_applied());
        assert_eq!(values(&list), vec!["a", "b", "c"]);
        assert_eq!(c.version(), 0);

        let stranger = ValueSignal::new("z");
        assert!(list.move_to(&stranger, ListPosition::first()).is_rejected());
        assert!(list.move_to(&a, ListPosition::after(&a)).is_rejected());
    }

    #[test]
    fn verify_position_guards_transaction() {
        let list = ListSignal::new();
        let a = list.insert_last(1).ok().expect("append");
        let b = list.insert_last(2).ok().expect("append");

        assert!(list.verify_position(&a, ListPosition::first()).is_applied());
        assert!(list.verify_position(&b, ListPosition::after(&a)).is_applied());
        assert!(list.verify_position(&b, ListPosition::last()).is_applied());
        assert!(list.verify_position(&a, ListPosition::last()).is_rejected());

        let outcome = run_in_transaction(|| {
            list.verify_position(&a, ListPosition::last());
            b.set(20);
        });
        assert_eq!(outcome, Operation::Rejected(Rejection::InvalidPosition));
        assert_eq!(b.peek(), 2);
    }

    #[test]
    fn structural_changes_in_transaction_commit_together() {
        let list = ListSignal::new();
        let outcome = run_in_transaction(|| {
            list.insert_last(1);
            list.insert_last(2);
            assert_eq!(list.len(), 2);
        });

        assert!(outcome.is_applied());
        assert_eq!(values(&list), vec![1, 2]);
        assert_eq!(list.version(), 1);
    }

    #[test]
    fn serializes_entry_values() {
        let list = ListSignal::new();
        list.insert_last(1);
        list.insert_last(2);

        let json = serde_json::to_string(&list).expect("serialize");
        assert_eq!(json, "[1,2]");

        let restored: ListSignal<i32> = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(values(&restored), vec![1, 2]);
    }
}
