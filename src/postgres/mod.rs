//! PostgreSQL backend adapter.
//!
//! Sessions are pooled connections or one shared standalone connection.
//! Transactions are driven with plain `BEGIN` / `COMMIT` / `ROLLBACK` on the
//! session's connection. A transaction dropped while open never leaks into
//! later work: its pooled connection is closed rather than recycled, and a
//! standalone connection is rolled back before it is used again.

mod adapter;
mod session;
mod transaction;

pub use adapter::{PgAdapter, PgConnector, PgFacade};
pub use session::{PgConnectionGuard, PgSession};
pub use transaction::PgTransaction;
