//! Error types for guarded cache reads, coalesced calls and the worker pool.

use std::sync::Arc;
use std::time::Duration;

use bulwark_core::StoreError;
use thiserror::Error;

/// Error returned by [`CacheGuard`](crate::guard::CacheGuard) and
/// [`DegradationManager`](crate::degradation::DegradationManager) reads.
///
/// `E` is the error type of the caller's fetch function. It is passed through
/// unchanged in [`GuardError::Fetch`] and never cached.
#[derive(Debug, Clone, Error)]
pub enum GuardError<E> {
    /// The key is confirmed absent at the source.
    ///
    /// This is a normal outcome of the penetration guard, not a failure.
    #[error("value is confirmed absent")]
    EmptyValue,

    /// The degradation breaker is open and no fallback was supplied.
    #[error("cache is degraded")]
    Degraded,

    /// The per-key breakdown lock was not acquired in time.
    #[error("timed out after {timeout:?} waiting for the lock on key `{key}`")]
    LockTimeout {
        /// Key whose lock was contended.
        key: String,
        /// Configured lock-acquisition timeout.
        timeout: Duration,
    },

    /// The fetch function failed.
    #[error("fetch failed: {0}")]
    Fetch(E),

    /// The store failed to read or write.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A cached entry could not be encoded.
    #[error("cache entry encoding failed: {0}")]
    Format(Arc<serde_json::Error>),

    /// The fetch function panicked.
    #[error("fetch panicked: {0}")]
    Panicked(String),

    /// A coalesced load ran without its fetch function.
    ///
    /// Waiters whose leader was cancelled retry the load themselves, so
    /// [`CacheGuard`](crate::guard::CacheGuard) callers do not normally see this.
    #[error("in-flight load was abandoned")]
    Abandoned,
}

impl<E> GuardError<E> {
    /// Returns `true` for [`GuardError::EmptyValue`].
    pub fn is_empty_value(&self) -> bool {
        matches!(self, Self::EmptyValue)
    }

    /// Returns `true` when the outcome should count against the error rate.
    ///
    /// A confirmed-absent key is a successful answer from the source.
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::EmptyValue)
    }
}

impl<E> From<CallError<GuardError<E>>> for GuardError<E> {
    fn from(error: CallError<GuardError<E>>) -> Self {
        match error {
            CallError::Failed(inner) => inner,
            CallError::Panicked(message) => GuardError::Panicked(message),
            CallError::Abandoned => GuardError::Abandoned,
        }
    }
}

/// Error returned by [`KeyedCall::call`](crate::concurrency::KeyedCall::call).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError<E> {
    /// The call ran and returned an error.
    #[error("{0}")]
    Failed(E),

    /// The call panicked; the payload message is preserved.
    #[error("call panicked: {0}")]
    Panicked(String),

    /// The leading caller was cancelled before it published a result.
    #[error("in-flight call was abandoned")]
    Abandoned,
}

/// Error returned by [`WorkerPool`](crate::pool::WorkerPool).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool no longer accepts tasks.
    #[error("worker pool is shutting down")]
    ShuttingDown,

    /// The queue stayed full for the whole submit timeout.
    #[error("worker pool queue is full, submit timed out after {0:?}")]
    SubmitTimeout(Duration),

    /// Workers did not stop within the shutdown timeout.
    #[error("worker pool did not stop within {0:?}")]
    ShutdownTimeout(Duration),
}
