use sqlx::pool::PoolConnection;
use sqlx::{PgConnection, Postgres};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};
use uuid::Uuid;

use crate::{TransactionError, TransactionResult};

/// Physical connection behind a session.
pub(crate) enum SessionConnection {
    Pooled(PoolConnection<Postgres>),
    Standalone(PgConnection),
}

impl Deref for SessionConnection {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        match self {
            SessionConnection::Pooled(conn) => &**conn,
            SessionConnection::Standalone(conn) => conn,
        }
    }
}

impl DerefMut for SessionConnection {
    fn deref_mut(&mut self) -> &mut PgConnection {
        match self {
            SessionConnection::Pooled(conn) => &mut **conn,
            SessionConnection::Standalone(conn) => conn,
        }
    }
}

impl SessionConnection {
    /// A pooled connection left inside `BEGIN` must never be handed to
    /// another caller. Ask the pool to close it instead of recycling it.
    fn discard_if_pooled(&mut self) {
        if let SessionConnection::Pooled(conn) = self {
            conn.close_on_drop();
        }
    }
}

/// The connection slot shared by every clone of a session.
pub(crate) struct Slot {
    connection: Option<SessionConnection>,
    in_transaction: bool,
}

impl Drop for Slot {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }
        if let Some(conn) = self.connection.as_mut() {
            tracing::warn!("session dropped inside an open transaction, discarding its connection");
            conn.discard_if_pooled();
        }
    }
}

/// Connection-like handle a query can be run against.
///
/// Clones share the same connection. Once released the connection is gone
/// and [`PgSession::acquire`] fails with `FacadeReleased`.
#[derive(Clone)]
pub struct PgSession {
    id: Uuid,
    pooled: bool,
    slot: Arc<Mutex<Slot>>,
    abandoned: Arc<AtomicBool>,
}

impl PgSession {
    pub(crate) fn pooled(conn: PoolConnection<Postgres>) -> Self {
        Self::from_connection(SessionConnection::Pooled(conn), true)
    }

    /// Wraps a connection the caller opened and keeps ownership of.
    pub fn standalone(conn: PgConnection) -> Self {
        Self::from_connection(SessionConnection::Standalone(conn), false)
    }

    fn from_connection(conn: SessionConnection, pooled: bool) -> Self {
        Self {
            id: Uuid::new_v4(),
            pooled,
            slot: Arc::new(Mutex::new(Slot {
                connection: Some(conn),
                in_transaction: false,
            })),
            abandoned: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    pub async fn is_released(&self) -> bool {
        self.slot.lock().await.connection.is_none()
    }

    /// Whether the connection is currently inside `BEGIN`.
    pub async fn in_transaction(&self) -> bool {
        self.slot.lock().await.in_transaction
    }

    /// Locks the connection for the lifetime of the returned guard.
    ///
    /// Holding the guard while another call on the same session acquires it
    /// deadlocks; drop it before calling into other repositories.
    pub async fn acquire(&self) -> TransactionResult<PgConnectionGuard> {
        let slot = self.lock_slot().await?;
        OwnedMutexGuard::try_map(slot, |slot| slot.connection.as_mut())
            .map(PgConnectionGuard)
            .map_err(|_| TransactionError::FacadeReleased)
    }

    /// Runs a transaction control statement and records whether the
    /// connection is inside a transaction afterwards.
    pub(crate) async fn control(&self, statement: &'static str, in_transaction: bool) -> TransactionResult<()> {
        let mut slot = self.lock_slot().await?;
        let conn: &mut PgConnection = slot.connection.as_mut().ok_or(TransactionError::FacadeReleased)?;
        sqlx::Executor::execute(&mut *conn, sqlx::raw_sql(statement)).await?;
        slot.in_transaction = in_transaction;
        Ok(())
    }

    /// Flags a transaction that went away without COMMIT or ROLLBACK.
    ///
    /// The next lock on this session rolls it back first.
    pub(crate) fn mark_abandoned(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    /// Takes the connection out, leaving the session released.
    ///
    /// A pooled connection still inside a transaction is closed by the pool
    /// rather than recycled.
    pub(crate) async fn take_connection(&self) -> Option<SessionConnection> {
        let mut slot = self.slot.lock().await;
        let mut conn = slot.connection.take()?;
        if slot.in_transaction {
            tracing::warn!(session_id = %self.id, "releasing a session inside an open transaction");
            conn.discard_if_pooled();
            slot.in_transaction = false;
        }
        Some(conn)
    }

    async fn lock_slot(&self) -> TransactionResult<OwnedMutexGuard<Slot>> {
        let mut slot = Arc::clone(&self.slot).lock_owned().await;
        if self.abandoned.swap(false, Ordering::SeqCst) && slot.in_transaction {
            if let Some(conn) = slot.connection.as_mut() {
                let conn: &mut PgConnection = conn;
                tracing::warn!(session_id = %self.id, "rolling back abandoned transaction");
                sqlx::Executor::execute(&mut *conn, sqlx::raw_sql("ROLLBACK")).await?;
            }
            slot.in_transaction = false;
        }
        Ok(slot)
    }
}

impl fmt::Debug for PgSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgSession")
            .field("id", &self.id)
            .field("pooled", &self.pooled)
            .finish()
    }
}

/// Exclusive access to a session's connection.
pub struct PgConnectionGuard(OwnedMappedMutexGuard<Slot, SessionConnection>);

impl Deref for PgConnectionGuard {
    type Target = PgConnection;

    fn deref(&self) -> &PgConnection {
        &**self.0
    }
}

impl DerefMut for PgConnectionGuard {
    fn deref_mut(&mut self) -> &mut PgConnection {
        &mut **self.0
    }
}
