//! Reactive Runtime
//!
//! The runtime holds the process-wide pieces of the reactive system: the
//! configuration and a registry of live effects.
//!
//! # How It Works
//!
//! 1. Effects register themselves when created and unregister when they
//!    are disposed or dropped.
//!
//! 2. Before a signal write is applied, the runtime checks whether an
//!    effect running on the current thread has already read that signal.
//!    Such a write would re-trigger the effect forever, so it is rejected
//!    and the effect is disposed.
//!
//! 3. Hosts can dispose every live effect at shutdown.
//!
//! # Thread Safety
//!
//! The registry is a `DashMap` keyed by subscriber ID and holding weak
//! references, so it never keeps an effect alive on its own. Effect
//! tracking state itself lives in the thread-local reactive context.

use std::sync::{Arc, OnceLock, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::context::ReactiveContext;
use super::source::SignalId;
use super::subscriber::SubscriberId;
use crate::error::{Rejection, SignalError};

/// Process-wide runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Reject writes that would re-trigger a running effect.
    pub detect_effect_loops: bool,

    /// Attempts made by [`retry_transaction`](super::retry_transaction).
    pub transaction_attempts: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            detect_effect_loops: true,
            transaction_attempts: 3,
        }
    }
}

impl RuntimeConfig {
    /// Parse a configuration document. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self, SignalError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// A trait for registered reactive values that can be disposed.
pub(crate) trait Reactive: Send + Sync {
    /// Get the subscriber ID for this reactive value.
    fn subscriber_id(&self) -> SubscriberId;

    /// Stop reacting to changes.
    fn dispose(&self);
}

/// The global reactive runtime.
pub struct Runtime;

static CONFIG: OnceLock<RwLock<RuntimeConfig>> = OnceLock::new();

// Maps subscriber IDs to weak references to avoid preventing cleanup.
static REGISTRY: OnceLock<DashMap<SubscriberId, Weak<dyn Reactive>>> = OnceLock::new();

fn get_config() -> &'static RwLock<RuntimeConfig> {
    CONFIG.get_or_init(|| RwLock::new(RuntimeConfig::default()))
}

fn get_registry() -> &'static DashMap<SubscriberId, Weak<dyn Reactive>> {
    REGISTRY.get_or_init(DashMap::new)
}

impl Runtime {
    /// The current configuration.
    pub fn config() -> RuntimeConfig {
        get_config().read().clone()
    }

    /// Install a new configuration for the whole process.
    pub fn configure(config: RuntimeConfig) {
        *get_config().write() = config;
    }

    /// Register a reactive value with the runtime.
    pub(crate) fn register(reactive: &Arc<dyn Reactive>) {
        get_registry().insert(reactive.subscriber_id(), Arc::downgrade(reactive));
    }

    /// Unregister a reactive value.
    pub(crate) fn unregister(id: SubscriberId) {
        get_registry().remove(&id);
    }

    /// Number of registered effects that are still alive.
    pub fn active_effects() -> usize {
        get_registry()
            .iter()
            .filter(|entry| entry.value().strong_count() > 0)
            .count()
    }

    /// Dispose every registered effect.
    pub fn dispose_all_effects() {
        let live: Vec<Arc<dyn Reactive>> = get_registry()
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        get_registry().clear();

        for reactive in live {
            reactive.dispose();
        }
    }

    /// Check whether writing `signal` is allowed on this thread right now.
    ///
    /// Rejects the write and disposes the offending effect if a running
    /// effect has already read the signal.
    pub(crate) fn check_write(signal: SignalId) -> Result<(), Rejection> {
        if !get_config().read().detect_effect_loops {
            return Ok(());
        }
        let Some(effect) = ReactiveContext::effect_depending_on(signal) else {
            return Ok(());
        };

        error!(
            %signal,
            %effect,
            "effect writes a signal it depends on; disposing the effect"
        );

        // Clone the handle out so the map shard is not locked during dispose.
        let reactive = get_registry()
            .get(&effect)
            .and_then(|entry| entry.value().upgrade());
        if let Some(reactive) = reactive {
            reactive.dispose();
        }

        Err(Rejection::EffectLoop { signal, effect })
    }

    /// Get the current subscriber being tracked, if any.
    pub fn current_subscriber() -> Option<SubscriberId> {
        ReactiveContext::current_subscriber()
    }

    /// Check if we're inside a reactive context.
    pub fn is_tracking() -> bool {
        ReactiveContext::is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    struct MockReactive {
        id: SubscriberId,
        disposed: AtomicI32,
    }

    impl MockReactive {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: SubscriberId::new(),
                disposed: AtomicI32::new(0),
            })
        }
    }

    impl Reactive for MockReactive {
        fn subscriber_id(&self) -> SubscriberId {
            self.id
        }

        fn dispose(&self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn runtime_registers_and_unregisters() {
        let reactive = MockReactive::new();
        let id = reactive.id;
        let handle: Arc<dyn Reactive> = reactive.clone();

        Runtime::register(&handle);
        assert!(get_registry().contains_key(&id));

        Runtime::unregister(id);
        assert!(!get_registry().contains_key(&id));
    }

    #[test]
    fn registry_does_not_keep_values_alive() {
        let reactive = MockReactive::new();
        let id = reactive.id;
        let handle: Arc<dyn Reactive> = reactive;
        Runtime::register(&handle);
        drop(handle);

        let alive = get_registry()
            .get(&id)
            .map(|entry| entry.value().strong_count())
            .unwrap_or(0);
        assert_eq!(alive, 0);
        Runtime::unregister(id);
    }

    #[test]
    fn writes_outside_effects_are_allowed() {
        assert!(Runtime::check_write(SignalId::new()).is_ok());
    }

    #[test]
    fn config_parses_partial_json() {
        let config = RuntimeConfig::from_json(r#"{ "transaction_attempts": 7 }"#).expect("valid config");
        assert_eq!(config.transaction_attempts, 7);
        assert!(config.detect_effect_loops);

        assert!(matches!(
            RuntimeConfig::from_json("{ not json"),
            Err(SignalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = RuntimeConfig {
            detect_effect_loops: false,
            transaction_attempts: 1,
        };
        let json = serde_json::to_string(&config).expect("serialize");
        assert_eq!(RuntimeConfig::from_json(&json).expect("parse"), config);
    }
}
