use crate::{
    platform::{megaline::extract::ExtractError, PortalError},
    storage::StorageError,
};

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("user has no stored credentials")]
    NotAuthorized,
    #[error("login failed: {0}")]
    LoginFailed(String),
    #[error("portal session expired")]
    SessionExpired,
    #[error("portal error: {0}")]
    Transport(#[from] PortalError),
    #[error("{0}")]
    DocumentParse(#[from] ExtractError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("sync timed out after {0} seconds")]
    Timeout(u64),
}
