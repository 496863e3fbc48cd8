//! Reactive Context
//!
//! The reactive context tracks which activity is currently collecting
//! dependencies. When a signal is read, it records itself and the version
//! it was read at into the innermost context.
//!
//! # Implementation
//!
//! We use a thread-local stack. Entering a tracked activity (a `track`
//! call, an effect run or a computed evaluation) pushes an entry; the guard
//! pops it when dropped, including during unwinding.
//!
//! Only the innermost entry collects. A computed signal evaluated inside an
//! effect records its own inputs into its own entry; the effect's entry only
//! sees the computed signal itself. An `untracked` block pushes an entry
//! that collects nothing.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::IndexMap;

use super::source::{Dependency, SignalId};
use super::SubscriberId;

/// A dependency captured together with the version it was read at.
#[derive(Clone)]
pub(crate) struct Captured {
    pub(crate) dependency: Arc<dyn Dependency>,
    pub(crate) version: u64,
}

impl Captured {
    pub(crate) fn is_stale(&self) -> bool {
        self.dependency.has_changed_since(self.version)
    }
}

pub(crate) type Dependencies = IndexMap<SignalId, Captured>;

/// What kind of activity a context entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContextKind {
    /// A plain tracked activity or a computed evaluation.
    Tracking,
    /// An effect run. Used to detect effects that write their own inputs.
    Effect(SubscriberId),
    /// Reads are not recorded.
    Untracked,
}

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = RefCell::new(Vec::new());
}

/// An entry in the reactive context stack.
struct ContextEntry {
    subscriber_id: SubscriberId,
    kind: ContextKind,
    /// First read of each signal wins.
    dependencies: Dependencies,
}

/// Guard that pops the context when dropped.
///
/// Not `Send`: the guard belongs to the thread whose stack it pushed onto.
pub struct ReactiveContext {
    subscriber_id: SubscriberId,
    _thread_bound: PhantomData<*const ()>,
}

impl ReactiveContext {
    pub(crate) fn enter(kind: ContextKind) -> Self {
        let subscriber_id = match kind {
            ContextKind::Effect(id) => id,
            _ => SubscriberId::new(),
        };

        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().push(ContextEntry {
                subscriber_id,
                kind,
                dependencies: IndexMap::new(),
            });
        });

        Self {
            subscriber_id,
            _thread_bound: PhantomData,
        }
    }

    /// Check if reads on this thread are currently being recorded.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .is_some_and(|entry| entry.kind != ContextKind::Untracked)
        })
    }

    /// Get the subscriber ID of the innermost recording context, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .filter(|entry| entry.kind != ContextKind::Untracked)
                .map(|entry| entry.subscriber_id)
        })
    }

    /// Record a read of `signal` at `version`.
    ///
    /// `dependency` is only called when a context is recording, so readers
    /// outside any tracked activity do not pay for the `Arc` clone.
    pub(crate) fn track_dependency<F>(signal: SignalId, version: u64, dependency: F)
    where
        F: FnOnce() -> Arc<dyn Dependency>,
    {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let Some(entry) = stack.last_mut() else {
                return;
            };
            if entry.kind == ContextKind::Untracked {
                return;
            }
            entry.dependencies.entry(signal).or_insert_with(|| Captured {
                dependency: dependency(),
                version,
            });
        });
    }

    /// Whether an effect is running on this thread and has read `signal`,
    /// directly or through a computed signal derived from it.
    ///
    /// Returns the innermost such effect.
    pub(crate) fn effect_depending_on(signal: SignalId) -> Option<SubscriberId> {
        CONTEXT_STACK.with(|stack| {
            stack.borrow().iter().rev().find_map(|entry| match entry.kind {
                ContextKind::Effect(id)
                    if entry.dependencies.contains_key(&signal)
                        || entry
                            .dependencies
                            .values()
                            .any(|captured| captured.dependency.depends_on(signal)) =>
                {
                    Some(id)
                }
                _ => None,
            })
        })
    }

    /// Take the dependencies collected so far and leave the context.
    pub(crate) fn finish(self) -> Dependencies {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow_mut()
                .last_mut()
                .map(|entry| std::mem::take(&mut entry.dependencies))
                .unwrap_or_default()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the right context.
            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.subscriber_id, self.subscriber_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.subscriber_id, entry.subscriber_id
                );
            }
        });
    }
}
