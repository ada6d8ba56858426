use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::session::PgSession;
use crate::state::TransactionState;
use crate::TransactionResult;

/// Transaction running on a [`PgSession`].
///
/// Queries go to the underlying session's connection; this type only adds
/// `BEGIN` / `COMMIT` / `ROLLBACK` and the state tracking around them.
///
/// When the last clone is dropped while still open, the session is told so:
/// a pooled connection is closed instead of going back to the pool, and a
/// standalone one is rolled back before its next use.
#[derive(Clone)]
pub struct PgTransaction {
    inner: Arc<Inner>,
}

struct Inner {
    id: Uuid,
    session: PgSession,
    state: RwLock<TransactionState>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.state.get_mut().is_open() {
            tracing::warn!(transaction_id = %self.id, "transaction dropped while open");
            self.session.mark_abandoned();
        }
    }
}

impl PgTransaction {
    pub fn new(session: PgSession) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: Uuid::new_v4(),
                session,
                state: RwLock::new(TransactionState::NotStarted),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn session(&self) -> &PgSession {
        &self.inner.session
    }

    pub fn state(&self) -> TransactionState {
        *self.inner.state.read()
    }

    pub async fn begin(&self) -> TransactionResult<()> {
        let next = self.state().begin()?;
        self.inner.session.control("BEGIN", true).await?;
        *self.inner.state.write() = next;
        tracing::debug!(transaction_id = %self.id(), session_id = %self.inner.session.id(), "BEGIN");
        Ok(())
    }

    pub async fn commit(&self) -> TransactionResult<()> {
        let next = self.state().finish()?;
        self.inner.session.control("COMMIT", false).await?;
        *self.inner.state.write() = next;
        tracing::debug!(transaction_id = %self.id(), "COMMIT");
        Ok(())
    }

    pub async fn rollback(&self) -> TransactionResult<()> {
        let next = self.state().finish()?;
        self.inner.session.control("ROLLBACK", false).await?;
        *self.inner.state.write() = next;
        tracing::debug!(transaction_id = %self.id(), "ROLLBACK");
        Ok(())
    }
}

impl fmt::Debug for PgTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgTransaction")
            .field("id", &self.id())
            .field("session", &self.inner.session.id())
            .field("state", &self.state())
            .finish()
    }
}
