use std::{sync::Arc, time::Duration};

use teloxide::utils::markdown;

use crate::{
    platform::Credentials,
    service::{
        balance::{BalanceError, BalanceService},
        capture::{CaptureOutcome, CaptureService},
        user::Account,
    },
    storage::{StorageError, StorageManager, UserRepository},
};

use super::ServiceError;

/// Text to send back, and whether it is MarkdownV2.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub markdown: bool,
}

impl Reply {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markdown: false,
        }
    }

    pub fn markdown(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markdown: true,
        }
    }
}

/// Turns chat commands into replies. Knows nothing about Telegram transport.
#[derive(Clone)]
pub struct ChatService {
    users: Arc<dyn UserRepository>,
    capture: CaptureService,
    balance: BalanceService,
    sync_timeout: Duration,
    locale: String,
}

impl ChatService {
    pub fn new(
        storage: &StorageManager,
        capture: CaptureService,
        balance: BalanceService,
        sync_timeout: Duration,
        locale: impl Into<String>,
    ) -> Self {
        info!("Initializing ChatService");

        Self {
            users: Arc::clone(&storage.users),
            capture,
            balance,
            sync_timeout,
            locale: locale.into(),
        }
    }

    pub async fn start(&self, telegram_id: i64) -> Result<Reply, ServiceError> {
        let (_, created) = self.users.get_or_create(telegram_id).await?;

        let key = if created {
            info!("User {} created", telegram_id);
            "start.new"
        } else {
            "start.known"
        };

        Ok(Reply::plain(t!(key, locale = &self.locale)))
    }

    pub fn about(&self) -> Reply {
        Reply::markdown(t!("about", locale = &self.locale))
    }

    pub fn begin_capture(&self, telegram_id: i64) -> Reply {
        self.capture.begin(telegram_id);
        Reply::plain(t!("save.prompt", locale = &self.locale))
    }

    /// Free text from a user. `None` when nobody is waiting for it.
    pub async fn handle_text(&self, telegram_id: i64, text: &str) -> Option<Reply> {
        let credentials = match self.capture.handle_text(telegram_id, text) {
            CaptureOutcome::PassThrough => return None,
            CaptureOutcome::Malformed => {
                info!("User {}: malformed credentials line", telegram_id);
                return Some(Reply::plain(t!("save.malformed", locale = &self.locale)));
            }
            CaptureOutcome::Captured(credentials) => credentials,
        };

        let key = match self.save_credentials(telegram_id, credentials).await {
            Ok(()) => {
                info!("User {}: credentials saved", telegram_id);
                "save.done"
            }
            Err(e) => {
                error!("User {}: failed to save credentials: {}", telegram_id, e);
                "save.failed"
            }
        };

        Some(Reply::plain(t!(key, locale = &self.locale)))
    }

    async fn save_credentials(&self, telegram_id: i64, credentials: Credentials) -> Result<(), StorageError> {
        let _guard = self.balance.lock_user(telegram_id).await;
        let (mut user, _) = self.users.get_or_create(telegram_id).await?;
        user.set_credentials(credentials.login, credentials.password);
        self.users.save_user(&user).await
    }

    pub async fn balance(&self, telegram_id: i64) -> Reply {
        if let Err(e) = self.balance.sync_balance_within(telegram_id, self.sync_timeout).await {
            return match e {
                BalanceError::NotAuthorized => Reply::plain(t!("balance.not_authorized", locale = &self.locale)),
                e => {
                    error!("User {}: balance sync failed: {}", telegram_id, e);
                    Reply::plain(t!("balance.failed", locale = &self.locale))
                }
            };
        }

        match self.users.get_or_create(telegram_id).await {
            Ok((user, _)) if user.accounts.is_empty() => {
                Reply::plain(t!("balance.no_accounts", locale = &self.locale))
            }
            Ok((user, _)) => Reply::markdown(format_accounts(&user.accounts, true, &self.locale)),
            Err(e) => {
                error!("User {}: failed to load accounts: {}", telegram_id, e);
                Reply::plain(t!("balance.failed", locale = &self.locale))
            }
        }
    }

    pub async fn delete(&self, telegram_id: i64) -> Reply {
        self.capture.cancel(telegram_id);

        let _guard = self.balance.lock_user(telegram_id).await;
        match self.users.delete_user(telegram_id).await {
            Ok(()) => {
                info!("User {} deleted", telegram_id);
                Reply::plain(t!("delete.done", locale = &self.locale))
            }
            Err(e) => {
                error!("User {}: failed to delete: {}", telegram_id, e);
                Reply::plain(t!("delete.failed", locale = &self.locale))
            }
        }
    }
}

/// Renders the account summary. Labels come from the locale already in
/// MarkdownV2; with `escape` set, the values are escaped as well.
pub fn format_accounts(accounts: &[Account], escape: bool, locale: &str) -> String {
    let value = |raw: String| if escape { markdown::escape(&raw) } else { raw };

    let header = if accounts.len() > 1 {
        t!("balance.header_many", locale = locale)
    } else {
        t!("balance.header_one", locale = locale)
    };

    let mut message = header.to_string();

    for account in accounts {
        let balance = account
            .balance
            .map(|balance| format!("{:.2}", balance))
            .unwrap_or_else(|| "-".to_string());
        let billing_to = account
            .billing_to
            .map(|date| date.format("%d-%m-%Y").to_string())
            .unwrap_or_else(|| "-".to_string());
        let tariff = account
            .tariff_amount
            .map(|amount| amount.to_string())
            .unwrap_or_else(|| "-".to_string());

        message.push_str("\n\n");
        message.push_str(&t!(
            "balance.account",
            locale = locale,
            number = value(account.number.clone()),
            balance = value(balance),
            billing_to = value(billing_to),
            tariff = value(tariff)
        ));
    }

    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        platform::{LoginResponse, PortalClient, PortalError},
        service::balance::{SyncOptions, LOGIN_MARKER},
        storage::MemoryStorage,
    };
    use async_trait::async_trait;
    use chrono::NaiveDate;

    struct OfflinePortal;

    #[async_trait]
    impl PortalClient for OfflinePortal {
        async fn login(&self, _: &Credentials) -> Result<LoginResponse, PortalError> {
            Err(PortalError::Transport {
                stage: "get login page",
                message: "offline".into(),
                status: None,
                body: None,
            })
        }

        async fn fetch_account_detail(&self, _: &str, _: &str) -> Result<Vec<u8>, PortalError> {
            unreachable!("no session is ever issued")
        }
    }

    fn chat(storage: &Arc<MemoryStorage>) -> ChatService {
        let manager = StorageManager::from_backend(Arc::clone(storage));
        let balance = BalanceService::new(&manager, Arc::new(OfflinePortal), SyncOptions::default());
        ChatService::new(&manager, CaptureService::new(), balance, Duration::from_secs(5), "ru")
    }

    fn account(number: &str, balance: f64, billing_to: (i32, u32, u32), tariff: i64) -> Account {
        Account {
            balance: Some(balance),
            billing_to: NaiveDate::from_ymd_opt(billing_to.0, billing_to.1, billing_to.2),
            tariff_amount: Some(tariff),
            ..Account::new(number)
        }
    }

    #[test]
    fn test_format_single_account() {
        let text = format_accounts(&[account("000111", 99.0, (2024, 3, 31), 500)], false, "ru");

        assert_eq!(
            text,
            "*Ваш аккаунт MegaLine:*\n\n📱 *Номер аккаунта*: 000111\n💰 *Баланс*: 99.00 KGS\n📅 *Дата оплаты*: 31-03-2024\n💳 *Сумма тарифа*: 500 KGS"
        );
    }

    #[test]
    fn test_format_escapes_values() {
        let accounts = [
            account("000111", 1234.5, (2024, 3, 31), 500),
            Account::new("000222"),
        ];

        let text = format_accounts(&accounts, true, "ru");

        assert!(text.starts_with("*Ваши аккаунты MegaLine:*"));
        assert!(text.contains("*Баланс*: 1234\\.50 KGS"));
        assert!(text.contains("*Дата оплаты*: 31\\-03\\-2024"));
        assert!(text.contains("*Номер аккаунта*: 000222\n💰 *Баланс*: \\- KGS"));
    }

    #[tokio::test]
    async fn test_start_greets_new_and_known_users() {
        let storage = Arc::new(MemoryStorage::new());
        let chat = chat(&storage);

        let first = chat.start(1).await.unwrap();
        let second = chat.start(1).await.unwrap();

        assert!(first.text.starts_with("Привет."));
        assert!(second.text.starts_with("Кажется мы уже знакомы."));
        assert!(!first.markdown);
    }

    #[tokio::test]
    async fn test_capture_flow_stores_credentials() {
        let storage = Arc::new(MemoryStorage::new());
        let chat = chat(&storage);

        assert_eq!(chat.handle_text(1, "u1 p1").await, None);

        chat.begin_capture(1);
        let malformed = chat.handle_text(1, "u1").await.unwrap();
        assert_eq!(malformed.text, "Неверный формат. Попробуйте еще раз.");
        assert!(storage.get(1).is_none());

        chat.begin_capture(1);
        let saved = chat.handle_text(1, "u1 p1").await.unwrap();
        assert!(saved.text.starts_with("Данные сохранены."));

        let user = storage.get(1).unwrap();
        assert_eq!(user.auth_username, "u1");
        assert_eq!(user.auth_password, "p1");
        assert_eq!(user.session, "");
    }

    #[tokio::test]
    async fn test_balance_error_replies() {
        let storage = Arc::new(MemoryStorage::new());
        let chat = chat(&storage);

        let reply = chat.balance(1).await;
        assert!(reply.text.contains("/save"));

        chat.begin_capture(1);
        chat.handle_text(1, "u1 p1").await;

        let reply = chat.balance(1).await;
        assert_eq!(reply.text, "Произошла ошибка при получении баланса. Попробуйте позже.");
    }

    #[tokio::test]
    async fn test_delete_removes_user() {
        let storage = Arc::new(MemoryStorage::new());
        let chat = chat(&storage);
        chat.start(1).await.unwrap();
        chat.begin_capture(1);

        let reply = chat.delete(1).await;

        assert!(reply.text.starts_with("Ваши данные удалены."));
        assert!(storage.get(1).is_none());
        assert_eq!(chat.handle_text(1, "u1 p1").await, None);
    }

    /// Holds every login until the test releases it.
    #[derive(Default)]
    struct GatedPortal {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    #[async_trait]
    impl PortalClient for GatedPortal {
        async fn login(&self, _: &Credentials) -> Result<LoginResponse, PortalError> {
            self.entered.notify_one();
            self.release.notified().await;

            Ok(LoginResponse {
                body: format!(
                    "<h1>{LOGIN_MARKER} 1</h1><select class=\"account_selector\"><option>000111</option></select>"
                )
                .into_bytes(),
                pre_auth_token: "pre".into(),
                rotated_token: Some("sess-old".into()),
            })
        }

        async fn fetch_account_detail(&self, _: &str, _: &str) -> Result<Vec<u8>, PortalError> {
            Ok(format!("<h1>{LOGIN_MARKER} 1</h1>").into_bytes())
        }
    }

    async fn gated_chat(storage: &Arc<MemoryStorage>, portal: &Arc<GatedPortal>) -> ChatService {
        let manager = StorageManager::from_backend(Arc::clone(storage));
        let balance = BalanceService::new(&manager, portal.clone(), SyncOptions::default());

        let (mut user, _) = storage.get_or_create(1).await.unwrap();
        user.set_credentials("old".into(), "oldpw".into());
        storage.save_user(&user).await.unwrap();

        ChatService::new(&manager, CaptureService::new(), balance, Duration::from_secs(5), "ru")
    }

    fn spawn_sync(chat: &ChatService) -> tokio::task::JoinHandle<Result<(), BalanceError>> {
        let balance = chat.balance.clone();
        tokio::spawn(async move { balance.sync_balance(1).await })
    }

    #[tokio::test]
    async fn test_delete_during_sync_is_not_undone() {
        let storage = Arc::new(MemoryStorage::new());
        let portal = Arc::new(GatedPortal::default());
        let chat = gated_chat(&storage, &portal).await;

        let sync = spawn_sync(&chat);
        portal.entered.notified().await;

        let delete = {
            let chat = chat.clone();
            tokio::spawn(async move { chat.delete(1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!delete.is_finished());

        portal.release.notify_one();
        sync.await.unwrap().unwrap();
        delete.await.unwrap();

        assert!(storage.get(1).is_none());
    }

    #[tokio::test]
    async fn test_save_during_sync_keeps_new_credentials() {
        let storage = Arc::new(MemoryStorage::new());
        let portal = Arc::new(GatedPortal::default());
        let chat = gated_chat(&storage, &portal).await;

        let sync = spawn_sync(&chat);
        portal.entered.notified().await;

        chat.begin_capture(1);
        let save = {
            let chat = chat.clone();
            tokio::spawn(async move { chat.handle_text(1, "new newpw").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!save.is_finished());

        portal.release.notify_one();
        sync.await.unwrap().unwrap();
        assert!(save.await.unwrap().is_some());

        let user = storage.get(1).unwrap();
        assert_eq!(user.auth_username, "new");
        assert_eq!(user.auth_password, "newpw");
        assert_eq!(user.session, "");
        assert!(user.accounts.is_empty());
    }
}
