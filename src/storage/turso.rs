use async_trait::async_trait;
use chrono::NaiveDate;
use libsql::{params, Builder, Connection, Database, Row, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::service::user::{Account, User};

use super::{AccountRepository, StorageError, UserRepository};

const DATE_FORMAT: &str = "%Y-%m-%d";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    telegram_id INTEGER PRIMARY KEY,
    auth_username TEXT NOT NULL DEFAULT '',
    auth_password TEXT NOT NULL DEFAULT '',
    session TEXT NOT NULL DEFAULT ''
);
CREATE TABLE IF NOT EXISTS accounts (
    telegram_id INTEGER NOT NULL,
    number TEXT NOT NULL,
    position INTEGER NOT NULL DEFAULT 0,
    billing_from TEXT,
    billing_to TEXT,
    tariff_amount INTEGER,
    balance REAL,
    PRIMARY KEY (telegram_id, number)
);
";

#[derive(Clone)]
pub struct TursoStorage {
    _db: Arc<Database>,
    conn: Connection,
    // a single connection is shared, so no statement may run while another
    // task has a transaction open on it, reads included
    lock: Arc<Mutex<()>>,
}

impl TursoStorage {
    pub async fn remote(url: &str, token: &str) -> Result<Self, StorageError> {
        info!("Initializing TursoStorage...");
        let db = Builder::new_remote(url.to_string(), token.to_string()).build().await?;
        let storage = Self::from_database(db).await?;
        info!("TursoStorage initialized");
        Ok(storage)
    }

    /// Local database file, or `:memory:`.
    pub async fn local(path: &str) -> Result<Self, StorageError> {
        let db = Builder::new_local(path).build().await?;
        Self::from_database(db).await
    }

    async fn from_database(db: Database) -> Result<Self, StorageError> {
        let conn = db.connect()?;
        conn.execute_batch(SCHEMA).await?;

        Ok(Self {
            _db: Arc::new(db),
            conn,
            lock: Arc::new(Mutex::new(())),
        })
    }

    /// Caller holds `lock`.
    async fn load_user(&self, telegram_id: i64) -> Result<Option<User>, StorageError> {
        let mut rows = self
            .conn
            .query(
                "SELECT auth_username, auth_password, session FROM users WHERE telegram_id = ?1 LIMIT 1",
                params![telegram_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let mut user = User {
            telegram_id,
            auth_username: text(&row, 0)?.unwrap_or_default(),
            auth_password: text(&row, 1)?.unwrap_or_default(),
            session: text(&row, 2)?.unwrap_or_default(),
            accounts: Vec::new(),
        };

        let mut rows = self
            .conn
            .query(
                "SELECT number, billing_from, billing_to, tariff_amount, balance FROM accounts \
                 WHERE telegram_id = ?1 ORDER BY position, number",
                params![telegram_id],
            )
            .await?;

        while let Some(row) = rows.next().await? {
            user.accounts.push(Account {
                number: text(&row, 0)?.unwrap_or_default(),
                billing_from: date(&row, 1)?,
                billing_to: date(&row, 2)?,
                tariff_amount: integer(&row, 3)?,
                balance: real(&row, 4)?,
            });
        }

        Ok(Some(user))
    }
}

#[async_trait]
impl UserRepository for TursoStorage {
    async fn get_or_create(&self, telegram_id: i64) -> Result<(User, bool), StorageError> {
        let _guard = self.lock.lock().await;

        let created = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO users (telegram_id) VALUES (?1)",
                params![telegram_id],
            )
            .await?
            == 1;

        let user = self
            .load_user(telegram_id)
            .await?
            .ok_or(StorageError::UserNotFound(telegram_id))?;

        Ok((user, created))
    }

    async fn save_user(&self, user: &User) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let tx = self.conn.transaction().await?;

        tx.execute(
            "INSERT INTO users (telegram_id, auth_username, auth_password, session) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(telegram_id) DO UPDATE SET auth_username = excluded.auth_username, \
             auth_password = excluded.auth_password, session = excluded.session",
            params![
                user.telegram_id,
                user.auth_username.as_str(),
                user.auth_password.as_str(),
                user.session.as_str()
            ],
        )
        .await?;

        tx.execute("DELETE FROM accounts WHERE telegram_id = ?1", params![user.telegram_id])
            .await?;

        for (position, account) in user.accounts.iter().enumerate() {
            tx.execute(
                "INSERT INTO accounts (telegram_id, number, position, billing_from, billing_to, tariff_amount, balance) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                account_params(user.telegram_id, position as i64, account),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_user(&self, telegram_id: i64) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;
        let tx = self.conn.transaction().await?;
        tx.execute("DELETE FROM accounts WHERE telegram_id = ?1", params![telegram_id])
            .await?;
        tx.execute("DELETE FROM users WHERE telegram_id = ?1", params![telegram_id])
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_authorized(&self) -> Result<Vec<i64>, StorageError> {
        let _guard = self.lock.lock().await;
        let mut rows = self
            .conn
            .query(
                "SELECT telegram_id FROM users WHERE auth_username != '' AND auth_password != '' ORDER BY telegram_id",
                (),
            )
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            if let Some(id) = integer(&row, 0)? {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[async_trait]
impl AccountRepository for TursoStorage {
    async fn save_account(&self, telegram_id: i64, account: &Account) -> Result<(), StorageError> {
        let _guard = self.lock.lock().await;

        let changed = self
            .conn
            .execute(
                "INSERT INTO accounts (telegram_id, number, position, billing_from, billing_to, tariff_amount, balance) \
                 SELECT ?1, ?2, ?3 + (SELECT COUNT(*) FROM accounts WHERE telegram_id = ?1), ?4, ?5, ?6, ?7 \
                 WHERE EXISTS (SELECT 1 FROM users WHERE telegram_id = ?1) \
                 ON CONFLICT(telegram_id, number) DO UPDATE SET billing_from = excluded.billing_from, \
                 billing_to = excluded.billing_to, tariff_amount = excluded.tariff_amount, balance = excluded.balance",
                account_params(telegram_id, 0, account),
            )
            .await?;

        if changed == 0 {
            return Err(StorageError::UserNotFound(telegram_id));
        }

        Ok(())
    }
}

fn account_params(telegram_id: i64, position: i64, account: &Account) -> Vec<Value> {
    vec![
        Value::Integer(telegram_id),
        Value::Text(account.number.clone()),
        Value::Integer(position),
        optional(account.billing_from.map(|d| d.format(DATE_FORMAT).to_string())),
        optional(account.billing_to.map(|d| d.format(DATE_FORMAT).to_string())),
        optional(account.tariff_amount),
        optional(account.balance),
    ]
}

fn optional<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::Null)
}

fn text(row: &Row, idx: i32) -> Result<Option<String>, StorageError> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Text(s) => Ok(Some(s)),
        other => Err(StorageError::CorruptedRow(format!("column {idx}: expected text, got {other:?}"))),
    }
}

fn integer(row: &Row, idx: i32) -> Result<Option<i64>, StorageError> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Integer(i) => Ok(Some(i)),
        other => Err(StorageError::CorruptedRow(format!("column {idx}: expected integer, got {other:?}"))),
    }
}

fn real(row: &Row, idx: i32) -> Result<Option<f64>, StorageError> {
    match row.get_value(idx)? {
        Value::Null => Ok(None),
        Value::Real(f) => Ok(Some(f)),
        Value::Integer(i) => Ok(Some(i as f64)),
        other => Err(StorageError::CorruptedRow(format!("column {idx}: expected real, got {other:?}"))),
    }
}

fn date(row: &Row, idx: i32) -> Result<Option<NaiveDate>, StorageError> {
    text(row, idx)?
        .map(|s| {
            NaiveDate::parse_from_str(&s, DATE_FORMAT)
                .map_err(|e| StorageError::CorruptedRow(format!("column {idx}: {e}")))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> TursoStorage {
        TursoStorage::local(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_user_round_trip_keeps_account_order() {
        let storage = storage().await;
        let (mut user, created) = storage.get_or_create(10).await.unwrap();
        assert!(created);

        user.set_credentials("u1".into(), "p1".into());
        user.session = "token".into();
        user.replace_accounts(vec!["zzz".to_string(), "aaa".to_string()]);
        storage.save_user(&user).await.unwrap();

        let (loaded, created) = storage.get_or_create(10).await.unwrap();
        assert!(!created);
        assert_eq!(loaded.session, "token");
        let numbers: Vec<_> = loaded.accounts.iter().map(|a| a.number.as_str()).collect();
        assert_eq!(numbers, vec!["zzz", "aaa"]);
    }

    #[tokio::test]
    async fn test_save_account_persists_fields() {
        let storage = storage().await;
        let (mut user, _) = storage.get_or_create(1).await.unwrap();
        user.replace_accounts(vec!["000111".to_string()]);
        storage.save_user(&user).await.unwrap();

        let account = Account {
            number: "000111".into(),
            billing_from: NaiveDate::from_ymd_opt(2024, 3, 1),
            billing_to: NaiveDate::from_ymd_opt(2024, 3, 31),
            tariff_amount: Some(500),
            balance: Some(99.0),
        };
        storage.save_account(1, &account).await.unwrap();

        let (loaded, _) = storage.get_or_create(1).await.unwrap();
        assert_eq!(loaded.accounts, vec![account]);
    }

    #[tokio::test]
    async fn test_save_account_for_unknown_user_fails() {
        let storage = storage().await;
        let result = storage.save_account(99, &Account::new("x")).await;
        assert!(matches!(result, Err(StorageError::UserNotFound(99))));
    }

    #[tokio::test]
    async fn test_delete_user_removes_accounts() {
        let storage = storage().await;
        let (mut user, _) = storage.get_or_create(5).await.unwrap();
        user.set_credentials("u".into(), "p".into());
        user.replace_accounts(vec!["a".to_string()]);
        storage.save_user(&user).await.unwrap();

        storage.delete_user(5).await.unwrap();
        assert!(storage.list_authorized().await.unwrap().is_empty());

        let (fresh, created) = storage.get_or_create(5).await.unwrap();
        assert!(created);
        assert!(fresh.accounts.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_save_and_load_see_committed_accounts() {
        let storage = storage().await;
        let (mut user, _) = storage.get_or_create(7).await.unwrap();
        user.set_credentials("u".into(), "p".into());
        user.session = "token".into();
        user.replace_accounts(vec!["a".to_string(), "b".to_string(), "c".to_string()]);
        storage.save_user(&user).await.unwrap();

        let writer = {
            let storage = storage.clone();
            let user = user.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    storage.save_user(&user).await.unwrap();
                    tokio::task::yield_now().await;
                }
            })
        };

        let reader = {
            let storage = storage.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    let (loaded, _) = storage.get_or_create(7).await.unwrap();
                    assert_eq!(loaded.accounts.len(), 3);
                    assert_eq!(storage.list_authorized().await.unwrap(), vec![7]);
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
    }
}
