use std::future::Future;
use std::sync::Arc;

use crate::adapter::{BackendAdapter, CloseOptions, Facade};
use crate::binding::{self, Binding, Bound};
use crate::config::UnitOfWorkConfig;
use crate::rollback::{RollbackFn, RollbackHook, TransactionFailure};
use crate::{TransactionError, TransactionResult};

/// Result of [`Coordinator::transaction`].
pub type TransactionOutcome<R, E, F> = Result<R, TransactionFailure<E, F>>;

/// Per-call options for [`Coordinator::transaction_with`].
pub struct TransactionOptions<F> {
    external_transaction: Option<F>,
    on_rollback: Option<Arc<dyn RollbackHook<F>>>,
}

impl<F> Default for TransactionOptions<F> {
    fn default() -> Self {
        Self {
            external_transaction: None,
            on_rollback: None,
        }
    }
}

impl<F: Clone + Send + Sync + 'static> TransactionOptions<F> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join an already open transaction instead of starting one.
    ///
    /// The call neither begins, commits nor rolls back anything; the owner of
    /// `transaction` keeps that responsibility.
    pub fn external_transaction(mut self, transaction: F) -> Self {
        self.external_transaction = Some(transaction);
        self
    }

    /// Register a hook to run when the owning transaction rolls back.
    pub fn on_rollback<H: RollbackHook<F> + 'static>(mut self, hook: H) -> Self {
        self.on_rollback = Some(Arc::new(hook));
        self
    }

    /// Closure form of [`TransactionOptions::on_rollback`].
    pub fn on_rollback_fn<C, Fut>(self, callback: C) -> Self
    where
        C: Fn(F) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TransactionResult<()>> + Send + 'static,
    {
        self.on_rollback(RollbackFn(callback))
    }
}

/// Unit of Work coordinator.
///
/// Decides when to open a session, when to start a transaction, how nested
/// calls share it and when everything is committed, rolled back and released.
/// The storage specifics come from the [`BackendAdapter`] it wraps.
///
/// Cloning is cheap; clones share the adapter.
pub struct UnitOfWork<A: BackendAdapter> {
    inner: Arc<Inner<A>>,
}

struct Inner<A> {
    adapter: A,
    config: UnitOfWorkConfig,
}

impl<A: BackendAdapter> UnitOfWork<A> {
    /// Create a new UnitOfWork over the given adapter.
    pub fn new(adapter: A) -> Self {
        Self::with_config(adapter, UnitOfWorkConfig::default())
    }

    pub fn with_config(adapter: A, config: UnitOfWorkConfig) -> Self {
        Self {
            inner: Arc::new(Inner { adapter, config }),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.inner.adapter
    }

    pub fn config(&self) -> &UnitOfWorkConfig {
        &self.inner.config
    }
}

impl<A: BackendAdapter> Clone for UnitOfWork<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A: BackendAdapter> Coordinator for UnitOfWork<A> {
    type Adapter = A;

    fn scope(&self) -> Scope<'_, A> {
        Scope::new(self, None)
    }
}

/// Operations shared by the unbound coordinator and its bound views.
///
/// Entity repositories are generic over this trait so the same repository
/// code runs against fresh sessions, a bound session or a bound transaction.
pub trait Coordinator: Send + Sync {
    type Adapter: BackendAdapter;

    /// The coordinator together with its current binding.
    fn scope(&self) -> Scope<'_, Self::Adapter>;

    fn current_session(&self) -> Option<&Facade<Self::Adapter>> {
        self.scope().current_session()
    }

    fn current_transaction(&self) -> Option<&Facade<Self::Adapter>> {
        self.scope().current_transaction()
    }

    /// Pin `facade` as current, dispatching on how the adapter classifies it.
    fn bind(&self, facade: Facade<Self::Adapter>) -> TransactionResult<Bound<Self::Adapter>> {
        self.scope().bind(facade)
    }

    /// Like [`Coordinator::bind`], refusing a facade the adapter classifies
    /// as a transaction.
    fn bind_session(&self, session: Facade<Self::Adapter>) -> TransactionResult<Bound<Self::Adapter>> {
        if self.scope().adapter().is_transaction(&session) {
            return Err(TransactionError::FacadeKindMismatch { expected: "session" });
        }
        self.bind(session)
    }

    fn bind_transaction(&self, transaction: Facade<Self::Adapter>) -> TransactionResult<Bound<Self::Adapter>> {
        if self.scope().adapter().is_session(&transaction) {
            return Err(TransactionError::FacadeKindMismatch { expected: "transaction" });
        }
        self.bind(transaction)
    }

    /// Run `work` in a transaction with default options.
    fn transaction<R, E, W, Fut>(
        &self,
        work: W,
    ) -> impl Future<Output = TransactionOutcome<R, E, Facade<Self::Adapter>>> + Send
    where
        W: FnOnce(Facade<Self::Adapter>) -> Fut + Send,
        Fut: Future<Output = TransactionOutcome<R, E, Facade<Self::Adapter>>> + Send,
        R: Send,
        E: From<TransactionError> + Send,
    {
        self.scope().transaction(work, TransactionOptions::default())
    }

    /// Run `work` in a transaction.
    ///
    /// Commits when `work` succeeds and rolls back when it fails. On rollback
    /// every hook collected for the failure runs once, then the failure is
    /// returned with its original error untouched.
    fn transaction_with<R, E, W, Fut>(
        &self,
        work: W,
        options: TransactionOptions<Facade<Self::Adapter>>,
    ) -> impl Future<Output = TransactionOutcome<R, E, Facade<Self::Adapter>>> + Send
    where
        W: FnOnce(Facade<Self::Adapter>) -> Fut + Send,
        Fut: Future<Output = TransactionOutcome<R, E, Facade<Self::Adapter>>> + Send,
        R: Send,
        E: From<TransactionError> + Send,
    {
        self.scope().transaction(work, options)
    }

    /// Run a single read or write against the current facade.
    ///
    /// Meant for entity repositories. Uses the bound transaction, else the
    /// bound session, else a fresh session that is released afterwards.
    fn run_in_facade<R, E, W, Fut>(&self, work: W) -> impl Future<Output = Result<R, E>> + Send
    where
        W: FnOnce(Facade<Self::Adapter>) -> Fut + Send,
        Fut: Future<Output = Result<R, E>> + Send,
        R: Send,
        E: From<TransactionError> + Send,
    {
        self.scope().run_in_facade(work)
    }
}

/// A coordinator seen through an optional binding.
pub struct Scope<'a, A: BackendAdapter> {
    unit: &'a UnitOfWork<A>,
    binding: Option<&'a Binding<Facade<A>>>,
}

impl<A: BackendAdapter> Clone for Scope<'_, A> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: BackendAdapter> Copy for Scope<'_, A> {}

impl<'a, A: BackendAdapter> Scope<'a, A> {
    pub(crate) fn new(unit: &'a UnitOfWork<A>, binding: Option<&'a Binding<Facade<A>>>) -> Self {
        Self { unit, binding }
    }

    pub fn adapter(&self) -> &'a A {
        self.unit.adapter()
    }

    pub fn config(&self) -> &'a UnitOfWorkConfig {
        self.unit.config()
    }

    pub fn binding(&self) -> Option<&'a Binding<Facade<A>>> {
        self.binding
    }

    pub fn current_session(&self) -> Option<&'a Facade<A>> {
        self.binding.and_then(Binding::session)
    }

    pub fn current_transaction(&self) -> Option<&'a Facade<A>> {
        self.binding.and_then(Binding::transaction)
    }

    pub fn bind(&self, facade: Facade<A>) -> TransactionResult<Bound<A>> {
        let binding = binding::resolve(self, facade)?;
        match &binding {
            Binding::Session(_) => tracing::debug!("session bound"),
            Binding::Transaction(_) => tracing::debug!("transaction bound"),
        }
        Ok(Bound::new(self.unit.clone(), binding))
    }

    pub async fn transaction<R, E, W, Fut>(
        self,
        work: W,
        options: TransactionOptions<Facade<A>>,
    ) -> TransactionOutcome<R, E, Facade<A>>
    where
        W: FnOnce(Facade<A>) -> Fut,
        Fut: Future<Output = TransactionOutcome<R, E, Facade<A>>>,
        E: From<TransactionError>,
    {
        let TransactionOptions {
            external_transaction,
            on_rollback,
        } = options;

        // A bound transaction is joined just like an external one.
        let joined = external_transaction.or_else(|| self.current_transaction().cloned());
        match joined {
            Some(transaction) => Self::join(transaction, work, on_rollback).await,
            None => self.run_owned(work, on_rollback).await,
        }
    }

    async fn join<R, E, W, Fut>(
        transaction: Facade<A>,
        work: W,
        on_rollback: Option<Arc<dyn RollbackHook<Facade<A>>>>,
    ) -> TransactionOutcome<R, E, Facade<A>>
    where
        W: FnOnce(Facade<A>) -> Fut,
        Fut: Future<Output = TransactionOutcome<R, E, Facade<A>>>,
    {
        tracing::debug!("joining external transaction");
        work(transaction).await.map_err(|mut failure| {
            // The owner of the transaction runs it on rollback.
            if let Some(hook) = on_rollback {
                failure.push_hook(hook);
            }
            failure
        })
    }

    async fn run_owned<R, E, W, Fut>(
        self,
        work: W,
        on_rollback: Option<Arc<dyn RollbackHook<Facade<A>>>>,
    ) -> TransactionOutcome<R, E, Facade<A>>
    where
        W: FnOnce(Facade<A>) -> Fut,
        Fut: Future<Output = TransactionOutcome<R, E, Facade<A>>>,
        E: From<TransactionError>,
    {
        let (session, owns_session) = match self.current_session() {
            Some(session) => (session.clone(), false),
            None => {
                let session = self
                    .adapter()
                    .start_new_session()
                    .await
                    .map_err(|err| TransactionFailure::new(E::from(err)))?;
                (session, true)
            }
        };

        let outcome = self.run_in_transaction(&session, work, on_rollback).await;

        if owns_session {
            self.release(&session, CloseOptions::owned()).await;
        }
        outcome
    }

    async fn run_in_transaction<R, E, W, Fut>(
        self,
        session: &Facade<A>,
        work: W,
        on_rollback: Option<Arc<dyn RollbackHook<Facade<A>>>>,
    ) -> TransactionOutcome<R, E, Facade<A>>
    where
        W: FnOnce(Facade<A>) -> Fut,
        Fut: Future<Output = TransactionOutcome<R, E, Facade<A>>>,
        E: From<TransactionError>,
    {
        let adapter = self.adapter();
        let transaction = adapter
            .begin_transaction(session)
            .await
            .map_err(|err| TransactionFailure::new(E::from(err)))?;
        tracing::debug!("transaction started");

        let outcome = match work(transaction.clone()).await {
            Ok(value) => match adapter.commit_transaction(&transaction).await {
                Ok(()) => {
                    tracing::debug!("transaction committed");
                    Ok(value)
                }
                Err(err) => {
                    tracing::warn!(error = %err, "commit failed, rolling back");
                    Err(TransactionFailure::new(E::from(err)))
                }
            },
            Err(failure) => Err(failure),
        };

        let outcome = match outcome {
            Ok(value) => Ok(value),
            Err(failure) => Err(self.roll_back(&transaction, failure, on_rollback).await),
        };

        self.release(&transaction, CloseOptions::owned()).await;
        outcome
    }

    async fn roll_back<E>(
        self,
        transaction: &Facade<A>,
        mut failure: TransactionFailure<E, Facade<A>>,
        on_rollback: Option<Arc<dyn RollbackHook<Facade<A>>>>,
    ) -> TransactionFailure<E, Facade<A>> {
        match self.adapter().rollback_transaction(transaction).await {
            Ok(()) => tracing::debug!("transaction rolled back"),
            Err(err) => tracing::error!(error = %err, "rollback failed"),
        }

        if let Some(hook) = on_rollback {
            failure.push_hook(hook);
        }

        let payload = failure.take_payload();
        if !payload.is_empty() {
            let total = payload.len();
            let failed = payload.run(transaction).await.len();
            tracing::debug!(total, failed, "rollback callbacks executed");
        }
        failure
    }

    pub async fn run_in_facade<R, E, W, Fut>(self, work: W) -> Result<R, E>
    where
        W: FnOnce(Facade<A>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<TransactionError>,
    {
        let bound = self
            .current_transaction()
            .or_else(|| self.current_session())
            .cloned();

        let (facade, owned) = match bound {
            Some(facade) => (facade, false),
            None => (self.adapter().start_new_session().await?, true),
        };

        let outcome = work(facade.clone()).await;

        if owned {
            self.release(&facade, CloseOptions::owned()).await;
        } else if self.config().close_after_use {
            self.release(&facade, CloseOptions::default()).await;
        }
        outcome
    }

    async fn release(self, facade: &Facade<A>, options: CloseOptions) {
        if let Err(err) = self.adapter().close(facade, options).await {
            tracing::warn!(error = %err, "failed to release facade");
        }
    }
}
