//! Reactive Primitives
//!
//! This module implements the reactive state engine: value signals, derived
//! signals, lists, effects and transactions.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A [`ValueSignal`] is a container for mutable state with a version that
//! grows by one on every committed write. Reading it with `value()` inside a
//! tracked activity records the signal and the version seen; `peek()` reads
//! without recording.
//!
//! ## Derived Signals
//!
//! A [`ComputedSignal`] caches the result of a function and recomputes only
//! after something it read has changed. A [`MappedSignal`] projects another
//! signal; its writable form [`WritableMappedSignal`] writes back into the
//! parent.
//!
//! ## Lists
//!
//! A [`ListSignal`] is an ordered list of value signals. The list shape and
//! each entry change independently.
//!
//! ## Effects
//!
//! An [`Effect`] runs an action and runs it again whenever something the
//! action read changes.
//!
//! ## Transactions
//!
//! [`run_in_transaction`] stages writes and applies them only if nothing the
//! task read changed in the meantime.
//!
//! # Implementation Notes
//!
//! Dependency tracking uses a thread-local stack of tracking contexts.
//! Signals never hold references to the activities that read them; instead
//! each [`Usage`] subscribes a listener to the signals it captured.

mod computed;
mod context;
mod effect;
mod list;
mod mapped;
mod runtime;
mod signal;
mod source;
mod subscriber;
mod transaction;
mod usage;
mod value;

pub use computed::{computed, CacheState, ComputedSignal};
pub use context::ReactiveContext;
pub use effect::{effect, Effect, EffectDispatcher, EffectJob, ImmediateDispatcher, QueuedDispatcher};
pub use list::{Anchor, Entries, ListPosition, ListSignal};
pub use mapped::{MappedSignal, WritableMappedSignal, WriteBack};
pub use runtime::{Runtime, RuntimeConfig};
pub use signal::{ReadonlySignal, Signal, WritableSignal};
pub use source::SignalId;
pub use subscriber::{CleanupCallback, Subscriber, SubscriberId, TransientListener};
pub use transaction::{
    in_transaction, retry_transaction, retry_transaction_with, run_in_transaction,
    run_without_transaction,
};
pub use usage::{is_tracking, track, untracked, Usage};
pub use value::ValueSignal;
