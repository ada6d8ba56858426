use async_trait::async_trait;
use futures::future::join_all;
use std::fmt;
use std::future::Future;
use std::mem;
use std::sync::Arc;

use crate::{TransactionError, TransactionResult};

/// Trait for components that need to be notified when a transaction rolls back.
///
/// A hook may be registered at any nesting depth. Hooks registered by scopes
/// that joined an ancestor's transaction travel outward with the failure and
/// run once, when the owning scope actually rolls back.
#[async_trait]
pub trait RollbackHook<F>: Send + Sync {
    /// Called after the owning transaction has been rolled back.
    ///
    /// Errors are logged and collected; they never replace the failure that
    /// caused the rollback.
    async fn on_rollback(&self, transaction: &F) -> TransactionResult<()>;
}

/// Adapts an async closure into a [`RollbackHook`].
pub struct RollbackFn<C>(pub C);

#[async_trait]
impl<F, C, Fut> RollbackHook<F> for RollbackFn<C>
where
    F: Clone + Send + Sync + 'static,
    C: Fn(F) -> Fut + Send + Sync,
    Fut: Future<Output = TransactionResult<()>> + Send + 'static,
{
    async fn on_rollback(&self, transaction: &F) -> TransactionResult<()> {
        (self.0)(transaction.clone()).await
    }
}

/// Rollback hooks accumulated for a single failure.
pub struct RollbackPayload<F> {
    hooks: Vec<Arc<dyn RollbackHook<F>>>,
}

impl<F> Default for RollbackPayload<F> {
    fn default() -> Self {
        Self { hooks: Vec::new() }
    }
}

impl<F> RollbackPayload<F> {
    pub fn push(&mut self, hook: Arc<dyn RollbackHook<F>>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Runs every hook against `transaction`, best effort.
    ///
    /// All hooks are driven to completion even when some of them fail. The
    /// order in which they run is unspecified. Returns the collected errors.
    pub async fn run(self, transaction: &F) -> Vec<TransactionError>
    where
        F: Sync,
    {
        if self.hooks.is_empty() {
            return Vec::new();
        }

        let results = join_all(self.hooks.iter().map(|hook| hook.on_rollback(transaction))).await;

        let failures: Vec<TransactionError> = results.into_iter().filter_map(Result::err).collect();
        for error in &failures {
            tracing::warn!(error = %error, "rollback callback failed");
        }
        failures
    }
}

impl<F> fmt::Debug for RollbackPayload<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackPayload")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

/// Failure of a unit of work.
///
/// Wraps the caller's error together with the rollback hooks collected while
/// the failure travels out through nested scopes. The wrapped error is never
/// replaced: whatever the hooks or the rollback itself do, `into_error`
/// returns the value the work failed with.
pub struct TransactionFailure<E, F> {
    error: E,
    payload: RollbackPayload<F>,
}

impl<E, F> TransactionFailure<E, F> {
    pub fn new(error: E) -> Self {
        Self {
            error,
            payload: RollbackPayload::default(),
        }
    }

    pub fn error(&self) -> &E {
        &self.error
    }

    pub fn into_error(self) -> E {
        self.error
    }

    /// Hooks still waiting for the owning transaction to roll back.
    pub fn pending_callbacks(&self) -> usize {
        self.payload.len()
    }

    pub(crate) fn push_hook(&mut self, hook: Arc<dyn RollbackHook<F>>) {
        self.payload.push(hook);
    }

    /// Drains the payload so it can be consumed exactly once.
    pub(crate) fn take_payload(&mut self) -> RollbackPayload<F> {
        mem::take(&mut self.payload)
    }
}

impl<E, F> From<E> for TransactionFailure<E, F> {
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl<E: fmt::Debug, F> fmt::Debug for TransactionFailure<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionFailure")
            .field("error", &self.error)
            .field("pending_callbacks", &self.payload.len())
            .finish()
    }
}

impl<E: fmt::Display, F> fmt::Display for TransactionFailure<E, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<E: std::error::Error, F> std::error::Error for TransactionFailure<E, F> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.error.source()
    }
}
