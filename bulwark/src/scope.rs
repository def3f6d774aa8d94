//! Guards that finish a cancellable scope or a unit of work exactly once.
//!
//! Both guards follow the same rule: an explicit finish (`cancel`, `commit`,
//! `rollback`) does the cleanup, otherwise dropping the guard does it and
//! logs a warning that the cleanup was implicit. Cleanup never runs twice.

use std::fmt;
use std::ops::{Deref, DerefMut};

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

type CancelAction = Box<dyn FnOnce() + Send>;
type RollbackAction<T, E> = Box<dyn FnOnce(&mut T) -> Result<(), E> + Send>;

#[inline]
fn record_implicit_release(_kind: &'static str) {
    #[cfg(feature = "metrics")]
    metrics::counter!(*crate::metrics::SCOPE_IMPLICIT_RELEASE, "kind" => _kind).increment(1);
}

/// Owns a cancellable scope and cancels it on every exit path.
///
/// The scope is a [`CancellationToken`]; the operation running inside it
/// watches [`token`](Self::token) or a [`child_token`](Self::child_token).
///
/// ```
/// use bulwark::scope::ScopeGuard;
///
/// let mut scope = ScopeGuard::new("import");
/// let token = scope.child_token();
/// // ... hand `token` to the work ...
/// scope.cancel();
/// assert!(token.is_cancelled());
/// ```
pub struct ScopeGuard {
    name: SmolStr,
    token: CancellationToken,
    on_cancel: Option<CancelAction>,
    cancelled: bool,
}

impl ScopeGuard {
    /// Opens a scope with a fresh token.
    pub fn new(name: impl Into<SmolStr>) -> Self {
        Self::with_token(name, CancellationToken::new())
    }

    /// Opens a scope over a token owned by the caller.
    pub fn with_token(name: impl Into<SmolStr>, token: CancellationToken) -> Self {
        Self {
            name: name.into(),
            token,
            on_cancel: None,
            cancelled: false,
        }
    }

    /// Adds an action run once, right after the token is cancelled.
    pub fn on_cancel<F>(mut self, action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_cancel = Some(Box::new(action));
        self
    }

    /// Scope name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The scope's token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// A child token that is cancelled together with the scope.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Returns `true` once the scope was cancelled through this guard.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Cancels the scope. Only the first call has an effect.
    pub fn cancel(&mut self) {
        if self.cancelled {
            return;
        }
        self.cancelled = true;
        self.token.cancel();
        if let Some(action) = self.on_cancel.take() {
            action();
        }
        debug!(scope = %self.name, "scope cancelled");
    }

    /// Releases the scope, cancelling it if that has not happened yet.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.cancelled {
            return;
        }
        warn!(scope = %self.name, "scope released without cancel, implicit cleanup");
        record_implicit_release("scope");
        self.cancel();
    }
}

impl fmt::Debug for ScopeGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeGuard")
            .field("name", &self.name)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

/// Lifecycle of a [`TransactionGuard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Neither committed nor rolled back.
    Open,
    /// Finalized by `commit`.
    Committed,
    /// The rollback action has run.
    RolledBack,
}

/// Wraps a unit-of-work handle and rolls it back unless it is committed.
///
/// The handle is reachable through `Deref`/`DerefMut`. The rollback action
/// runs at most once: from [`rollback`](Self::rollback), or from drop when
/// the guard is still open.
pub struct TransactionGuard<T, E>
where
    E: fmt::Display,
{
    name: SmolStr,
    handle: T,
    rollback: Option<RollbackAction<T, E>>,
    state: TransactionState,
}

impl<T, E> TransactionGuard<T, E>
where
    E: fmt::Display,
{
    /// Opens a guarded unit of work.
    pub fn new<F>(name: impl Into<SmolStr>, handle: T, rollback: F) -> Self
    where
        F: FnOnce(&mut T) -> Result<(), E> + Send + 'static,
    {
        Self {
            name: name.into(),
            handle,
            rollback: Some(Box::new(rollback)),
            state: TransactionState::Open,
        }
    }

    /// Current state.
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Returns `true` while neither committed nor rolled back.
    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// Marks the unit of work finalized. No-op unless open.
    pub fn commit(&mut self) {
        if self.state != TransactionState::Open {
            return;
        }
        self.state = TransactionState::Committed;
        self.rollback = None;
        debug!(transaction = %self.name, "transaction committed");
    }

    /// Runs the rollback action and returns its result.
    ///
    /// Returns `Ok(())` without doing anything after a commit or a previous
    /// rollback.
    pub fn rollback(&mut self) -> Result<(), E> {
        if self.state != TransactionState::Open {
            return Ok(());
        }
        self.state = TransactionState::RolledBack;
        match self.rollback.take() {
            Some(action) => action(&mut self.handle),
            None => Ok(()),
        }
    }

    /// Releases the guard, rolling back if it is still open.
    pub fn release(self) {
        drop(self);
    }
}

impl<T, E> Deref for TransactionGuard<T, E>
where
    E: fmt::Display,
{
    type Target = T;

    fn deref(&self) -> &T {
        &self.handle
    }
}

impl<T, E> DerefMut for TransactionGuard<T, E>
where
    E: fmt::Display,
{
    fn deref_mut(&mut self) -> &mut T {
        &mut self.handle
    }
}

impl<T, E> Drop for TransactionGuard<T, E>
where
    E: fmt::Display,
{
    fn drop(&mut self) {
        if self.state != TransactionState::Open {
            return;
        }
        warn!(transaction = %self.name, "transaction released while open, rolling back");
        record_implicit_release("transaction");
        if let Err(error) = self.rollback() {
            error!(transaction = %self.name, %error, "implicit rollback failed");
        }
    }
}

impl<T, E> fmt::Debug for TransactionGuard<T, E>
where
    T: fmt::Debug,
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionGuard")
            .field("name", &self.name)
            .field("handle", &self.handle)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_cancel_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut scope = ScopeGuard::new("job").on_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let child = scope.child_token();

        scope.cancel();
        scope.cancel();
        scope.release();

        assert!(child.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_cancels_open_scope() {
        let token = CancellationToken::new();
        {
            let _scope = ScopeGuard::with_token("job", token.clone());
        }
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_rollback_after_commit_is_noop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut tx = TransactionGuard::new("tx", Vec::<u32>::new(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        });

        tx.push(1);
        tx.commit();
        assert_eq!(tx.rollback(), Ok(()));
        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(*tx, vec![1]);
        drop(tx);

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rollback_runs_once_and_returns_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut tx = TransactionGuard::new("tx", (), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("disk gone".to_owned())
        });

        assert_eq!(tx.rollback(), Err("disk gone".to_owned()));
        assert_eq!(tx.rollback(), Ok(()));
        tx.release();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
