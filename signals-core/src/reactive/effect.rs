//! Effect Implementation
//!
//! An Effect is a side-effecting action that runs again whenever a signal
//! it read during its last run changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its action to establish initial
//!    dependencies.
//!
//! 2. The usage captured during the run gets a one-shot change listener.
//!    When it fires, the effect is scheduled to run again.
//!
//! 3. Each run captures a fresh usage and registers a fresh listener, so
//!    the dependency set follows whatever the action read most recently.
//!
//! # Lifecycle
//!
//! An effect is either active or cancelled. Only an active effect stores a
//! new listener after a run; a run that finishes after cancellation drops
//! its listener instead, so a racing re-run never resurrects the effect.
//! Disposing does not interrupt a run that is already in progress.
//!
//! # Scheduling
//!
//! Runs go through an [`EffectDispatcher`]. The default runs them right
//! away on the thread that made the change. [`QueuedDispatcher`] collects
//! them until the host calls [`QueuedDispatcher::run_pending`].
//!
//! A change that arrives while the effect is running, from any thread,
//! makes the running thread go around once more instead of running the
//! action concurrently.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::context::{ContextKind, ReactiveContext};
use super::runtime::{Reactive, Runtime};
use super::subscriber::{CleanupCallback, SubscriberId};
use super::transaction::run_without_transaction;
use super::usage::Usage;

/// A unit of work handed to a dispatcher.
pub type EffectJob = Box<dyn FnOnce() + Send>;

/// Decides when scheduled effect runs happen.
pub trait EffectDispatcher: Send + Sync {
    fn dispatch(&self, job: EffectJob);
}

/// Runs effects synchronously on the thread that scheduled them.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateDispatcher;

impl EffectDispatcher for ImmediateDispatcher {
    fn dispatch(&self, job: EffectJob) {
        job();
    }
}

/// Holds effect runs until the host drains the queue.
#[derive(Default)]
pub struct QueuedDispatcher {
    queue: Mutex<VecDeque<EffectJob>>,
}

impl QueuedDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of runs waiting.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Run queued jobs until the queue is empty, including jobs queued by
    /// the runs themselves. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.queue.lock().pop_front();
            let Some(job) = job else {
                return ran;
            };
            job();
            ran += 1;
        }
    }
}

impl EffectDispatcher for QueuedDispatcher {
    fn dispatch(&self, job: EffectJob) {
        self.queue.lock().push_back(job);
    }
}

impl fmt::Debug for QueuedDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedDispatcher")
            .field("pending", &self.pending())
            .finish()
    }
}

enum Lifecycle {
    /// Holds the listener registered after the latest run.
    Active(Option<CleanupCallback>),
    Cancelled,
}

enum RunState {
    Idle,
    Running { rerun: bool },
}

struct EffectInner {
    id: SubscriberId,
    action: Mutex<Box<dyn FnMut() + Send>>,
    run_state: Mutex<RunState>,
    lifecycle: Mutex<Lifecycle>,
    dispatcher: Arc<dyn EffectDispatcher>,
    run_count: AtomicUsize,
    dependency_count: AtomicUsize,
}

impl EffectInner {
    fn is_disposed(&self) -> bool {
        matches!(*self.lifecycle.lock(), Lifecycle::Cancelled)
    }

    fn schedule(self: &Arc<Self>) {
        if self.is_disposed() {
            return;
        }
        let inner = self.clone();
        self.dispatcher.dispatch(Box::new(move || inner.execute()));
    }

    fn execute(self: &Arc<Self>) {
        {
            let mut state = self.run_state.lock();
            match &mut *state {
                RunState::Running { rerun } => {
                    *rerun = true;
                    return;
                }
                RunState::Idle => *state = RunState::Running { rerun: false },
            }
        }

        loop {
            if !self.is_disposed() {
                self.run_once();
            }

            let mut state = self.run_state.lock();
            match &mut *state {
                RunState::Running { rerun } if *rerun => *rerun = false,
                _ => {
                    *state = RunState::Idle;
                    return;
                }
            }
        }
    }

    fn run_once(self: &Arc<Self>) {
        let context = ReactiveContext::enter(ContextKind::Effect(self.id));
        let outcome = {
            let mut action = self.action.lock();
            let action = &mut *action;
            run_without_transaction(|| catch_unwind(AssertUnwindSafe(action)))
        };
        let usage = Usage::from_dependencies(context.finish());

        self.run_count.fetch_add(1, Ordering::Relaxed);
        self.dependency_count.store(usage.len(), Ordering::Relaxed);
        if let Err(panic) = outcome {
            warn!(
                effect = %self.id,
                message = panic_message(panic.as_ref()),
                "effect action panicked"
            );
        }

        let inner = self.clone();
        let registration = usage.on_next_change(move |_| {
            inner.schedule();
            false
        });

        let stale = {
            let mut lifecycle = self.lifecycle.lock();
            match &mut *lifecycle {
                Lifecycle::Active(slot) => slot.replace(registration),
                Lifecycle::Cancelled => Some(registration),
            }
        };
        if let Some(stale) = stale {
            stale.cleanup();
        }
    }

    fn dispose(&self) {
        let registration = {
            let mut lifecycle = self.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Cancelled) {
                Lifecycle::Active(registration) => registration,
                Lifecycle::Cancelled => return,
            }
        };
        if let Some(registration) = registration {
            registration.cleanup();
        }
        Runtime::unregister(self.id);
        debug!(effect = %self.id, runs = self.run_count.load(Ordering::Relaxed), "effect disposed");
    }
}

impl Reactive for EffectInner {
    fn subscriber_id(&self) -> SubscriberId {
        self.id
    }

    fn dispose(&self) {
        EffectInner::dispose(self);
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        Runtime::unregister(self.id);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}

/// A side-effecting action that re-runs when its dependencies change.
///
/// Dropping the handle does not stop the effect: it lives for as long as
/// any signal it depends on can still notify it. Call [`Effect::dispose`]
/// or the callback from [`Effect::cleanup_callback`] to stop it.
///
/// # Example
///
/// ```rust,ignore
/// let count = ValueSignal::new(0);
///
/// let effect = Effect::new({
///     let count = count.clone();
///     move || println!("Count is: {}", count.value())
/// });
///
/// count.set(5);  // Prints: "Count is: 5"
/// effect.dispose();
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create an effect that runs on the writing thread.
    ///
    /// The action runs once before this returns.
    pub fn new<F>(action: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        Self::with_dispatcher(action, Arc::new(ImmediateDispatcher))
    }

    /// Create an effect whose runs, including the first, go through
    /// `dispatcher`.
    pub fn with_dispatcher<F>(action: F, dispatcher: Arc<dyn EffectDispatcher>) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let inner = Arc::new(EffectInner {
            id: SubscriberId::new(),
            action: Mutex::new(Box::new(action)),
            run_state: Mutex::new(RunState::Idle),
            lifecycle: Mutex::new(Lifecycle::Active(None)),
            dispatcher,
            run_count: AtomicUsize::new(0),
            dependency_count: AtomicUsize::new(0),
        });

        let handle: Arc<dyn Reactive> = inner.clone();
        Runtime::register(&handle);
        inner.schedule();

        Self { inner }
    }

    /// Get the effect's subscriber ID.
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Stop the effect. Safe to call from inside its own action and from
    /// other threads; later calls do nothing.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Get the number of times the action has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::Relaxed)
    }

    /// Get the number of signals read during the latest run.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependency_count.load(Ordering::Relaxed)
    }

    /// A callback that disposes this effect.
    pub fn cleanup_callback(&self) -> CleanupCallback {
        let inner = self.inner.clone();
        CleanupCallback::new(move || inner.dispose())
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("disposed", &self.is_disposed())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

/// Run `action` now and again whenever something it read changes.
///
/// Returns a callback that stops the effect.
pub fn effect<F>(action: F) -> CleanupCallback
where
    F: FnMut() + Send + 'static,
{
    Effect::new(action).cleanup_callback()
}

// ---- Tests ----
