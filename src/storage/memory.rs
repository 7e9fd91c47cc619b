use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use crate::service::user::{Account, User};

use super::{AccountRepository, StorageError, UserRepository};

#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    users: Arc<DashMap<i64, User>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, telegram_id: i64) -> Option<User> {
        self.users.get(&telegram_id).map(|user| user.value().clone())
    }
}

#[async_trait]
impl UserRepository for MemoryStorage {
    async fn get_or_create(&self, telegram_id: i64) -> Result<(User, bool), StorageError> {
        let mut created = false;
        let user = self
            .users
            .entry(telegram_id)
            .or_insert_with(|| {
                created = true;
                User::new(telegram_id)
            })
            .value()
            .clone();

        Ok((user, created))
    }

    async fn save_user(&self, user: &User) -> Result<(), StorageError> {
        self.users.insert(user.telegram_id, user.clone());
        Ok(())
    }

    async fn delete_user(&self, telegram_id: i64) -> Result<(), StorageError> {
        self.users.remove(&telegram_id);
        Ok(())
    }

    async fn list_authorized(&self) -> Result<Vec<i64>, StorageError> {
        let mut ids: Vec<i64> = self
            .users
            .iter()
            .filter(|user| user.value().has_credentials())
            .map(|user| *user.key())
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl AccountRepository for MemoryStorage {
    async fn save_account(&self, telegram_id: i64, account: &Account) -> Result<(), StorageError> {
        let mut user = self
            .users
            .get_mut(&telegram_id)
            .ok_or(StorageError::UserNotFound(telegram_id))?;

        match user.accounts.iter_mut().find(|stored| stored.number == account.number) {
            Some(stored) => *stored = account.clone(),
            None => user.accounts.push(account.clone()),
        }

        Ok(())
    }
}
