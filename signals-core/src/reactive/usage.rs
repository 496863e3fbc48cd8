//! Usage tracking.
//!
//! [`track`] runs an activity with a fresh tracking context and returns the
//! set of signals it read, each with the version it saw. The resulting
//! [`Usage`] can be polled with [`Usage::has_changes`] or subscribed to with
//! [`Usage::on_next_change`].
//!
//! An activity that read nothing yields the shared [`Usage::none`] value.
//! Callers can check for it by identity with [`Usage::ptr_eq`].

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexMap;
use tracing::trace;

use super::context::{ContextKind, Dependencies, ReactiveContext};
use super::source::{Dependency, SignalId};
use super::subscriber::{CleanupCallback, Subscriber, SubscriberId};
use super::transaction;
use crate::error::SignalError;

struct UsageInner {
    dependencies: Dependencies,
}

/// The signals read by one tracked activity.
#[derive(Clone)]
pub struct Usage {
    inner: Arc<UsageInner>,
}

static NO_USAGE: OnceLock<Usage> = OnceLock::new();

impl Usage {
    /// The usage of an activity that read no signals.
    ///
    /// Always returns the same instance. It never reports changes and never
    /// registers listeners.
    pub fn none() -> Usage {
        NO_USAGE
            .get_or_init(|| Usage {
                inner: Arc::new(UsageInner {
                    dependencies: IndexMap::new(),
                }),
            })
            .clone()
    }

    pub(crate) fn from_dependencies(dependencies: Dependencies) -> Usage {
        if dependencies.is_empty() {
            return Usage::none();
        }
        Usage {
            inner: Arc::new(UsageInner { dependencies }),
        }
    }

    /// Whether two handles refer to the same captured usage.
    pub fn ptr_eq(&self, other: &Usage) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether this is the shared empty usage.
    pub fn is_none(&self) -> bool {
        self.ptr_eq(&Usage::none())
    }

    /// Number of distinct signals read.
    pub fn len(&self) -> usize {
        self.inner.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.dependencies.is_empty()
    }

    /// The IDs of the signals read, in first-read order.
    pub fn signal_ids(&self) -> Vec<SignalId> {
        self.inner.dependencies.keys().copied().collect()
    }

    /// Whether any signal read has changed since it was read.
    ///
    /// Inside a transaction, a pending write to one of the signals counts
    /// as a change.
    pub fn has_changes(&self) -> bool {
        self.inner
            .dependencies
            .iter()
            .any(|(id, captured)| captured.is_stale() || transaction::has_staged(*id))
    }

    /// Whether any signal read is `signal` or derives from it.
    pub(crate) fn depends_on(&self, signal: SignalId) -> bool {
        self.inner
            .dependencies
            .values()
            .any(|captured| captured.dependency.depends_on(signal))
    }

    /// Register a listener for changes to any of the signals read.
    ///
    /// If a change has already happened, the listener is invoked right away
    /// with `true`. It is then invoked with `false` on every later change for
    /// as long as it returns `true`. Invoking the returned callback removes
    /// the listener.
    pub fn on_next_change<F>(&self, listener: F) -> CleanupCallback
    where
        F: FnMut(bool) -> bool + Send + 'static,
    {
        if self.is_empty() {
            return CleanupCallback::noop();
        }

        // A source notifies every subscriber it holds, including ones that
        // registered after the change being announced. Skip those.
        let captured: Vec<(Weak<dyn Dependency>, u64)> = self
            .inner
            .dependencies
            .values()
            .map(|captured| (Arc::downgrade(&captured.dependency), captured.version))
            .collect();
        let id = SubscriberId::new();
        let mut listener = listener;
        let subscriber = Arc::new(Subscriber::with_id(id, move |initial| {
            let changed = captured.iter().any(|(dependency, version)| {
                dependency
                    .upgrade()
                    .is_some_and(|dependency| dependency.has_changed_since(*version))
            });
            if !initial && !changed {
                return true;
            }
            let keep = listener(initial);
            if !keep {
                // Detach from every captured source, not just the notifying one.
                for (dependency, _) in &captured {
                    if let Some(dependency) = dependency.upgrade() {
                        dependency.source().unsubscribe(id);
                    }
                }
            }
            keep
        }));
        for captured in self.inner.dependencies.values() {
            captured.dependency.source().subscribe(subscriber.clone());
        }

        let inner = self.inner.clone();
        let registered = subscriber.clone();
        let cleanup = CleanupCallback::new(move || {
            registered.close();
            for captured in inner.dependencies.values() {
                captured.dependency.source().unsubscribe(registered.id());
            }
        });

        if self.has_changes() {
            trace!(subscriber = %subscriber.id(), "usage already changed at registration");
            if !subscriber.notify(true) {
                cleanup.cleanup();
            }
        }

        cleanup
    }

    /// Fail with [`SignalError::MissingUsage`] if nothing was read.
    pub fn ensure_used(&self, context: impl Into<String>) -> Result<(), SignalError> {
        if self.is_empty() {
            return Err(SignalError::MissingUsage {
                context: context.into(),
            });
        }
        Ok(())
    }

    /// Fail with [`SignalError::DeniedUsage`] if anything was read.
    pub fn ensure_unused(&self, context: impl Into<String>) -> Result<(), SignalError> {
        if !self.is_empty() {
            return Err(SignalError::DeniedUsage {
                context: context.into(),
            });
        }
        Ok(())
    }

    /// Merge several usages. The earliest capture of each signal wins.
    pub fn combine<I>(usages: I) -> Usage
    where
        I: IntoIterator<Item = Usage>,
    {
        let mut dependencies = IndexMap::new();
        for usage in usages {
            for (id, captured) in &usage.inner.dependencies {
                dependencies.entry(*id).or_insert_with(|| captured.clone());
            }
        }
        Usage::from_dependencies(dependencies)
    }
}

impl fmt::Debug for Usage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Usage")
            .field("signals", &self.signal_ids())
            .finish()
    }
}

/// Run `activity` and capture the signals it reads.
pub fn track<R, F>(activity: F) -> (R, Usage)
where
    F: FnOnce() -> R,
{
    let context = ReactiveContext::enter(ContextKind::Tracking);
    let result = activity();
    let usage = Usage::from_dependencies(context.finish());
    (result, usage)
}

/// Run `supplier` without recording any reads into the surrounding activity.
pub fn untracked<R, F>(supplier: F) -> R
where
    F: FnOnce() -> R,
{
    let _context = ReactiveContext::enter(ContextKind::Untracked);
    supplier()
}

/// Whether reads on this thread are currently being recorded.
pub fn is_tracking() -> bool {
    ReactiveContext::is_active()
}
