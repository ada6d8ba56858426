use async_trait::async_trait;

use crate::TransactionResult;

/// Facade type of an adapter.
pub type Facade<A> = <A as BackendAdapter>::Facade;

/// Options passed to [`BackendAdapter::close`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseOptions {
    /// The coordinator created this facade for the scope being closed.
    pub owned: bool,
}

impl CloseOptions {
    pub fn owned() -> Self {
        Self { owned: true }
    }
}

/// Storage primitives consumed by the coordinator.
///
/// An adapter is written once per storage technology. It knows how to obtain
/// sessions, how to tell sessions and transactions apart and how to drive a
/// transaction through its lifecycle. It holds no coordination logic: deciding
/// when to begin, commit, roll back or release belongs to the coordinator.
///
/// Sessions and transactions share a single `Facade` type, since a
/// transaction can be used anywhere a session can.
#[async_trait]
pub trait BackendAdapter: Send + Sync + 'static {
    /// Something a query can be run against.
    type Facade: Clone + Send + Sync + 'static;

    /// Returns a usable session, either a fresh connection or a shared one.
    async fn start_new_session(&self) -> TransactionResult<Self::Facade>;

    /// Whether `facade` is a session.
    fn is_session(&self, facade: &Self::Facade) -> bool;

    /// Whether `facade` is a transaction.
    fn is_transaction(&self, facade: &Self::Facade) -> bool;

    /// Begins a transaction on `session`, returning it in the open state.
    async fn begin_transaction(&self, session: &Self::Facade) -> TransactionResult<Self::Facade>;

    /// Commits an open transaction.
    async fn commit_transaction(&self, transaction: &Self::Facade) -> TransactionResult<()>;

    /// Rolls back an open transaction.
    async fn rollback_transaction(&self, transaction: &Self::Facade) -> TransactionResult<()>;

    /// Releases or closes `facade`.
    ///
    /// Must tolerate facades that were already released, and must leave
    /// alone facades the adapter does not own.
    async fn close(&self, facade: &Self::Facade, options: CloseOptions) -> TransactionResult<()>;
}
