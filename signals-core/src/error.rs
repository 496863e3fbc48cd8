//! Error types for the signal engine.
//!
//! Two kinds of failure exist:
//!
//! - [`Rejection`]: an expected, recoverable outcome of concurrent use, such
//!   as a failed compare-and-swap or a transaction whose reads went stale.
//!   Rejections travel inside [`Operation`](crate::Operation) values.
//! - [`SignalError`]: a precondition violation reported to the direct
//!   caller, or a rejection that a caller chose to escalate with `?`.

use thiserror::Error;

use crate::reactive::{SignalId, SubscriberId};

/// Why an operation was not applied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// The current value did not match the expected one.
    #[error("current value does not match the expected value")]
    UnexpectedValue,

    /// A signal read by a transaction changed before the transaction committed.
    #[error("signal {signal} changed after it was read by the transaction")]
    Conflict {
        /// The first stale dependency found during validation.
        signal: SignalId,
    },

    /// A list position referenced entries that are not adjacent or not present.
    #[error("list position is not valid for the current entries")]
    InvalidPosition,

    /// A list index was outside `0..=len`.
    #[error("index {index} is out of range for a list of length {len}")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The list length at the time of the request.
        len: usize,
    },

    /// The write would re-trigger an effect that is currently running.
    #[error("writing signal {signal} would re-trigger running effect {effect}")]
    EffectLoop {
        /// The signal being written.
        signal: SignalId,
        /// The effect that depends on it.
        effect: SubscriberId,
    },
}

/// Errors returned to the direct caller.
#[derive(Debug, Error)]
pub enum SignalError {
    /// A list index was outside `0..=len`.
    #[error("index {index} is out of range for a list of length {len}")]
    IndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The list length at the time of the request.
        len: usize,
    },

    /// A tracked activity was required to read at least one signal.
    #[error("expected the activity to read a signal: {context}")]
    MissingUsage {
        /// Caller supplied description of the activity.
        context: String,
    },

    /// A tracked activity read a signal where that is not allowed.
    #[error("signal usage is not allowed here: {context}")]
    DeniedUsage {
        /// Caller supplied description of the activity.
        context: String,
    },

    /// An optimistic operation was rejected.
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// A runtime configuration document could not be parsed.
    #[error("invalid runtime configuration: {0}")]
    InvalidConfig(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_converts_into_signal_error() {
        let error: SignalError = Rejection::UnexpectedValue.into();
        assert!(matches!(error, SignalError::Rejected(Rejection::UnexpectedValue)));
        assert_eq!(
            error.to_string(),
            "current value does not match the expected value"
        );
    }

    #[test]
    fn index_error_message_names_bounds() {
        let error = SignalError::IndexOutOfBounds { index: 4, len: 2 };
        assert_eq!(
            error.to_string(),
            "index 4 is out of range for a list of length 2"
        );
    }
}
