use crate::state::TransactionState;

/// Error type for coordinator and adapter operations
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Binding conflict: {0}")]
    BindingConflict(&'static str),

    #[error("Unknown facade kind: {0}")]
    UnknownFacadeKind(&'static str),

    #[error("Facade kind mismatch: expected a {expected}")]
    FacadeKindMismatch { expected: &'static str },

    #[error("Invalid transaction state: expected {expected}, found {actual}")]
    InvalidTransactionState {
        expected: TransactionState,
        actual: TransactionState,
    },

    #[error("Facade has already been released")]
    FacadeReleased,

    #[error("Rollback callback failed: {0}")]
    CallbackFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Result type for coordinator and adapter operations
pub type TransactionResult<T> = Result<T, TransactionError>;
