use crate::model::PoolId;
use crate::store::StoreError;

use super::conflict::Violation;

#[derive(Debug)]
pub enum LedgerError {
    UnknownPool(PoolId),
    /// The request conflicts with current occupancy; every reason is listed.
    Rejected(Vec<Violation>),
    NotFound { pool: PoolId, index: usize },
    /// The row layout changed since the handle was read.
    StaleHandle { pool: PoolId, index: usize },
    /// The reservation's window has elapsed; it can no longer change state.
    WindowElapsed { pool: PoolId, index: usize },
    MissingField(&'static str),
    LimitExceeded(&'static str),
    Store(StoreError),
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::UnknownPool(pool) => write!(f, "unknown pool: {pool}"),
            LedgerError::Rejected(violations) => {
                write!(f, "reservation rejected:")?;
                for v in violations {
                    write!(f, " {v};")?;
                }
                Ok(())
            }
            LedgerError::NotFound { pool, index } => {
                write!(f, "no reservation at row {index} of pool {pool}")
            }
            LedgerError::StaleHandle { pool, index } => {
                write!(f, "row {index} of pool {pool} was read before the records changed; reload")
            }
            LedgerError::WindowElapsed { pool, index } => {
                write!(f, "reservation at row {index} of pool {pool} has expired and is frozen")
            }
            LedgerError::MissingField(field) => write!(f, "missing field: {field}"),
            LedgerError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            LedgerError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        LedgerError::Store(e)
    }
}
