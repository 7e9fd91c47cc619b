use crate::storage::StorageError;

use super::balance::BalanceError;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Balance error: {0}")]
    Balance(#[from] BalanceError),
}
