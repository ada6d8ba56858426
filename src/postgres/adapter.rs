use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, PgPool};

use super::session::{PgConnectionGuard, PgSession, SessionConnection};
use super::transaction::PgTransaction;
use crate::adapter::{BackendAdapter, CloseOptions};
use crate::config::PgAdapterConfig;
use crate::{TransactionError, TransactionResult};

/// Anything a query can be run against: a session or a transaction on one.
#[derive(Clone, Debug)]
pub enum PgFacade {
    Session(PgSession),
    Transaction(PgTransaction),
}

impl PgFacade {
    /// The session queries are sent to.
    pub fn session(&self) -> &PgSession {
        match self {
            PgFacade::Session(session) => session,
            PgFacade::Transaction(transaction) => transaction.session(),
        }
    }

    pub fn as_transaction(&self) -> Option<&PgTransaction> {
        match self {
            PgFacade::Transaction(transaction) => Some(transaction),
            PgFacade::Session(_) => None,
        }
    }

    /// Exclusive access to the underlying connection, for running queries.
    pub async fn acquire(&self) -> TransactionResult<PgConnectionGuard> {
        self.session().acquire().await
    }
}

/// Where sessions come from.
pub enum PgConnector {
    /// Every session is a connection checked out of the pool.
    Pool(PgPool),
    /// Every session is the same caller-supplied connection.
    Standalone(PgSession),
}

/// PostgreSQL implementation of [`BackendAdapter`].
pub struct PgAdapter {
    connector: PgConnector,
    force_close: bool,
}

impl PgAdapter {
    /// Create a new PgAdapter with the given connection pool.
    pub fn with_pool(pool: PgPool) -> Self {
        Self {
            connector: PgConnector::Pool(pool),
            force_close: false,
        }
    }

    /// Create a new PgAdapter sharing one connection across all sessions.
    pub fn with_connection(conn: PgConnection) -> Self {
        Self {
            connector: PgConnector::Standalone(PgSession::standalone(conn)),
            force_close: false,
        }
    }

    /// Connects using `config`: one shared connection when
    /// `config.standalone` is set, a pool otherwise.
    pub async fn connect(config: &PgAdapterConfig) -> TransactionResult<Self> {
        if config.standalone {
            let conn = PgConnection::connect(&config.database_url).await?;
            tracing::debug!(force_close = config.force_close, "postgres standalone connection opened");
            return Ok(Self::with_connection(conn).force_close(config.force_close));
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        tracing::debug!(max_connections = config.max_connections, "postgres pool connected");
        Ok(Self::with_pool(pool))
    }

    /// Close standalone connections when the coordinator owns the scope.
    pub fn force_close(mut self, force_close: bool) -> Self {
        self.force_close = force_close;
        self
    }

    pub fn connector(&self) -> &PgConnector {
        &self.connector
    }

    fn expect_transaction<'f>(&self, facade: &'f PgFacade) -> TransactionResult<&'f PgTransaction> {
        facade
            .as_transaction()
            .ok_or(TransactionError::FacadeKindMismatch { expected: "transaction" })
    }
}

#[async_trait]
impl BackendAdapter for PgAdapter {
    type Facade = PgFacade;

    async fn start_new_session(&self) -> TransactionResult<PgFacade> {
        match &self.connector {
            PgConnector::Pool(pool) => {
                let conn = pool.acquire().await?;
                let session = PgSession::pooled(conn);
                tracing::debug!(session_id = %session.id(), "pooled session acquired");
                Ok(PgFacade::Session(session))
            }
            PgConnector::Standalone(session) => Ok(PgFacade::Session(session.clone())),
        }
    }

    fn is_session(&self, facade: &PgFacade) -> bool {
        matches!(facade, PgFacade::Session(_))
    }

    fn is_transaction(&self, facade: &PgFacade) -> bool {
        matches!(facade, PgFacade::Transaction(_))
    }

    async fn begin_transaction(&self, session: &PgFacade) -> TransactionResult<PgFacade> {
        let PgFacade::Session(session) = session else {
            return Err(TransactionError::FacadeKindMismatch { expected: "session" });
        };
        let transaction = PgTransaction::new(session.clone());
        transaction.begin().await?;
        Ok(PgFacade::Transaction(transaction))
    }

    async fn commit_transaction(&self, transaction: &PgFacade) -> TransactionResult<()> {
        self.expect_transaction(transaction)?.commit().await
    }

    async fn rollback_transaction(&self, transaction: &PgFacade) -> TransactionResult<()> {
        self.expect_transaction(transaction)?.rollback().await
    }

    async fn close(&self, facade: &PgFacade, options: CloseOptions) -> TransactionResult<()> {
        let session = match facade {
            // The session outlives the transaction; nothing to release here.
            PgFacade::Transaction(_) => return Ok(()),
            PgFacade::Session(session) => session,
        };

        if session.is_pooled() {
            // Dropping the pool connection hands it back to the pool, or
            // closes it if it is still inside a transaction.
            if session.take_connection().await.is_some() {
                tracing::debug!(session_id = %session.id(), "pooled session released");
            }
            return Ok(());
        }

        if self.force_close && options.owned {
            if let Some(SessionConnection::Standalone(conn)) = session.take_connection().await {
                conn.close().await?;
                tracing::debug!(session_id = %session.id(), "standalone session closed");
            }
        }
        Ok(())
    }
}
