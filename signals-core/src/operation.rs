//! Operation results.
//!
//! Every write returns an [`Operation`]. Optimistic conflicts are ordinary
//! values rather than errors, so callers can inspect them and decide whether
//! to retry, ignore or escalate.

use crate::error::{Rejection, SignalError};

/// The outcome of a signal write or a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation<T> {
    /// The operation was applied. Carries the operation's result, e.g. the
    /// previous value for `set` and `update`.
    Applied(T),

    /// The operation was not applied and nothing changed.
    Rejected(Rejection),
}

impl<T> Operation<T> {
    /// Whether the operation was applied.
    pub fn is_applied(&self) -> bool {
        matches!(self, Operation::Applied(_))
    }

    /// Whether the operation was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, Operation::Rejected(_))
    }

    /// The result value, if applied.
    pub fn ok(self) -> Option<T> {
        match self {
            Operation::Applied(value) => Some(value),
            Operation::Rejected(_) => None,
        }
    }

    /// The rejection reason, if rejected.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Operation::Applied(_) => None,
            Operation::Rejected(rejection) => Some(rejection),
        }
    }

    /// Map the applied value.
    pub fn map<U, F>(self, f: F) -> Operation<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Operation::Applied(value) => Operation::Applied(f(value)),
            Operation::Rejected(rejection) => Operation::Rejected(rejection),
        }
    }

    /// Discard the applied value.
    pub fn discard(self) -> Operation<()> {
        self.map(|_| ())
    }

    /// Convert into a `Result` so the rejection can be propagated with `?`.
    pub fn into_result(self) -> Result<T, SignalError> {
        match self {
            Operation::Applied(value) => Ok(value),
            Operation::Rejected(rejection) => Err(rejection.into()),
        }
    }
}

impl<T> From<Operation<T>> for Result<T, Rejection> {
    fn from(operation: Operation<T>) -> Self {
        match operation {
            Operation::Applied(value) => Ok(value),
            Operation::Rejected(rejection) => Err(rejection),
        }
    }
}
