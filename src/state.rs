use std::fmt;

use crate::{TransactionError, TransactionResult};

/// Lifecycle of a transaction handle.
///
/// ```text
/// NotStarted ──begin──> Open ──commit/rollback──> Closed
/// ```
///
/// `Closed` is terminal; a transaction is never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransactionState {
    #[default]
    NotStarted,
    Open,
    Closed,
}

impl TransactionState {
    /// Fails with `InvalidTransactionState` unless `self` is `expected`.
    pub fn ensure(self, expected: TransactionState) -> TransactionResult<()> {
        if self == expected {
            Ok(())
        } else {
            Err(TransactionError::InvalidTransactionState {
                expected,
                actual: self,
            })
        }
    }

    /// State reached after `begin`.
    pub fn begin(self) -> TransactionResult<TransactionState> {
        self.ensure(TransactionState::NotStarted)?;
        Ok(TransactionState::Open)
    }

    /// State reached after `commit` or `rollback`.
    pub fn finish(self) -> TransactionResult<TransactionState> {
        self.ensure(TransactionState::Open)?;
        Ok(TransactionState::Closed)
    }

    pub fn is_open(self) -> bool {
        self == TransactionState::Open
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::NotStarted => "not_started",
            TransactionState::Open => "open",
            TransactionState::Closed => "closed",
        };
        f.write_str(name)
    }
}
