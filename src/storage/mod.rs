mod error;
mod memory;
mod turso;

pub use error::StorageError;
pub use memory::MemoryStorage;
pub use turso::TursoStorage;

use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    config::StorageConfig,
    service::user::{Account, User},
};

#[async_trait]
pub trait UserRepository: Send + Sync + 'static {
    /// Loads the user with its accounts in discovery order, creating an empty
    /// one on first contact. The flag tells whether this call created it.
    async fn get_or_create(&self, telegram_id: i64) -> Result<(User, bool), StorageError>;

    /// Persists credentials, session and account membership. Accounts that
    /// are not listed in `user.accounts` are removed.
    async fn save_user(&self, user: &User) -> Result<(), StorageError>;

    /// Removes the user and every account it owns.
    async fn delete_user(&self, telegram_id: i64) -> Result<(), StorageError>;

    /// Ids of users that have stored credentials.
    async fn list_authorized(&self) -> Result<Vec<i64>, StorageError>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync + 'static {
    /// Upserts one account of an existing user.
    async fn save_account(&self, telegram_id: i64, account: &Account) -> Result<(), StorageError>;
}

#[derive(Clone)]
pub struct StorageManager {
    pub users: Arc<dyn UserRepository>,
    pub accounts: Arc<dyn AccountRepository>,
}

impl StorageManager {
    pub async fn init(config: &StorageConfig) -> Result<Self, StorageError> {
        match (&config.turso_url, &config.turso_token) {
            (Some(url), Some(token)) => {
                let turso = Arc::new(TursoStorage::remote(url, token).await?);
                Ok(Self::from_backend(turso))
            }
            (Some(url), None) if url.starts_with("file:") => {
                info!("Using local database {}", url);
                let local = Arc::new(TursoStorage::local(url.trim_start_matches("file:")).await?);
                Ok(Self::from_backend(local))
            }
            _ => {
                warn!("Turso is not configured, users are kept in memory only");
                Ok(Self::from_backend(Arc::new(MemoryStorage::new())))
            }
        }
    }

    pub fn from_backend<S>(backend: Arc<S>) -> Self
    where
        S: UserRepository + AccountRepository,
    {
        Self {
            users: backend.clone(),
            accounts: backend,
        }
    }
}
