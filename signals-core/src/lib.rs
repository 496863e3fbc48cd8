//! Signals Core
//!
//! This crate provides a fine-grained reactive state engine. It implements:
//!
//! - Value signals with versioned, compare-and-swap writes
//! - Computed and mapped signals derived from other signals
//! - List signals whose shape and entries change independently
//! - Effects that re-run when what they read changes
//! - Optimistic transactions that apply all of their writes or none
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: signal variants, dependency tracking, effects, transactions
//! - `operation`: the result type of writes and transactions
//! - `error`: rejections and caller errors
//!
//! # Example
//!
//! ```rust,ignore
//! use signals_core::{computed, effect, ValueSignal, Signal, WritableSignal};
//!
//! // Create a signal
//! let count = ValueSignal::new(0);
//!
//! // Create a derived value
//! let doubled = computed({
//!     let count = count.clone();
//!     move || count.value() * 2
//! });
//!
//! // Create an effect
//! let cleanup = effect(move || {
//!     println!("Doubled: {}", doubled.value());
//! });
//!
//! // Update the signal
//! count.set(5);
//! // Effect automatically runs, prints: "Doubled: 10"
//!
//! cleanup.cleanup();
//! ```

pub mod error;
pub mod operation;
pub mod reactive;

pub use error::{Rejection, SignalError};
pub use operation::Operation;
pub use reactive::{
    computed, effect, in_transaction, is_tracking, retry_transaction, retry_transaction_with,
    run_in_transaction, run_without_transaction, track, untracked, Anchor, CacheState,
    CleanupCallback, ComputedSignal, Effect, EffectDispatcher, ImmediateDispatcher, ListPosition,
    ListSignal, MappedSignal, QueuedDispatcher, ReadonlySignal, Runtime, RuntimeConfig, Signal,
    SignalId, SubscriberId, Usage, ValueSignal, WritableMappedSignal, WritableSignal, WriteBack,
};
