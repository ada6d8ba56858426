//! Repository Unit of Work
//!
//! Coordinates sessions and transactions for repository-style data access.
//! Entity repositories run their queries through a [`Coordinator`] instead of
//! acquiring connections themselves, so the same repository code works on a
//! fresh session, inside a transaction, or joined to a transaction opened
//! further up the call chain. Storage specifics live behind
//! [`BackendAdapter`]; [`postgres`] is the PostgreSQL implementation.

pub mod adapter;
pub mod binding;
pub mod config;
pub mod error;
pub mod postgres;
pub mod rollback;
pub mod state;
pub mod unit_of_work;

pub use adapter::{BackendAdapter, CloseOptions, Facade};
pub use binding::{Binding, Bound};
pub use config::{PgAdapterConfig, UnitOfWorkConfig};
pub use error::{TransactionError, TransactionResult};
pub use rollback::{RollbackFn, RollbackHook, RollbackPayload, TransactionFailure};
pub use state::TransactionState;
pub use unit_of_work::{Coordinator, Scope, TransactionOptions, TransactionOutcome, UnitOfWork};
