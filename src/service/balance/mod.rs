mod error;

pub use error::BalanceError;

use std::{sync::Arc, time::Duration};

use tokio::sync::OwnedMutexGuard;

use crate::{
    platform::{
        megaline::extract::{self, LabelSet, PageSelectors},
        Credentials, PortalClient, PortalError,
    },
    service::user::{Account, User, UserLocks},
    storage::{AccountRepository, StorageManager, UserRepository},
};

/// Appears on the authenticated billing page only; the portal answers 200
/// for a rejected login as well.
pub const LOGIN_MARKER: &str = "Лицевой счет №";

#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Issue the select-and-fetch pair twice per account and parse only the
    /// second answer. The portal has been seen to serve the previously
    /// selected account on the first read after a switch.
    pub prime_detail_fetch: bool,
    pub login_marker: String,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            prime_detail_fetch: true,
            login_marker: LOGIN_MARKER.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct BalanceService {
    users: Arc<dyn UserRepository>,
    accounts: Arc<dyn AccountRepository>,
    portal: Arc<dyn PortalClient>,
    selectors: Arc<PageSelectors>,
    labels: Arc<LabelSet>,
    options: SyncOptions,
    locks: UserLocks,
}

impl BalanceService {
    pub fn new(storage: &StorageManager, portal: Arc<dyn PortalClient>, options: SyncOptions) -> Self {
        info!("Initializing BalanceService (prime detail fetch: {})", options.prime_detail_fetch);

        Self {
            users: Arc::clone(&storage.users),
            accounts: Arc::clone(&storage.accounts),
            portal,
            selectors: Arc::new(PageSelectors::default()),
            labels: Arc::new(LabelSet::default()),
            options,
            locks: UserLocks::new(),
        }
    }

    /// [`Self::sync_balance`] bounded by `limit`, so a hung portal cannot hold
    /// the handler forever.
    pub async fn sync_balance_within(&self, telegram_id: i64, limit: Duration) -> Result<(), BalanceError> {
        tokio::time::timeout(limit, self.sync_balance(telegram_id))
            .await
            .map_err(|_| BalanceError::Timeout(limit.as_secs()))?
    }

    /// Held by everything that rewrites a stored user.
    pub async fn lock_user(&self, telegram_id: i64) -> OwnedMutexGuard<()> {
        self.locks.acquire(telegram_id).await
    }

    /// Makes sure the user has a portal session, then refreshes every account.
    ///
    /// Login, transport and storage failures before the account loop abort the
    /// sync. Inside the loop a failing account is logged and skipped, and the
    /// call still succeeds; callers read the persisted accounts afterwards.
    /// An expired portal session is repaired with one new login.
    pub async fn sync_balance(&self, telegram_id: i64) -> Result<(), BalanceError> {
        let _guard = self.lock_user(telegram_id).await;

        let (mut user, _) = self.users.get_or_create(telegram_id).await?;

        if !user.has_credentials() {
            warn!("User {} has no stored credentials", telegram_id);
            return Err(BalanceError::NotAuthorized);
        }

        // a token without accounts is what a crash between login and the
        // first save leaves behind, log in again to rebuild the list
        if user.session.is_empty() || user.accounts.is_empty() {
            self.login(&mut user).await?;
        }

        match self.refresh_accounts(&mut user).await {
            Err(BalanceError::SessionExpired) => {
                warn!("User {}: portal session expired, logging in again", telegram_id);
                self.login(&mut user).await?;
                self.refresh_accounts(&mut user).await
            }
            result => result,
        }
    }

    /// Replaces the stored session with a fresh one. A stale session is
    /// cleared in storage even when the login fails.
    async fn login(&self, user: &mut User) -> Result<(), BalanceError> {
        let stale_session = !user.session.is_empty();
        user.session.clear();

        if let Err(e) = self.authenticate(user).await {
            if stale_session {
                self.users.save_user(user).await?;
            }
            return Err(e);
        }

        self.users.save_user(user).await?;
        Ok(())
    }

    async fn refresh_accounts(&self, user: &mut User) -> Result<(), BalanceError> {
        let telegram_id = user.telegram_id;
        let session = user.session.clone();
        let total = user.accounts.len();
        let mut failed = 0;

        for account in user.accounts.iter_mut() {
            match self.refresh_account(telegram_id, &session, account).await {
                Ok(()) => {}
                Err(BalanceError::SessionExpired) => return Err(BalanceError::SessionExpired),
                Err(e) => {
                    failed += 1;
                    error!("User {}: account {} was not refreshed: {}", telegram_id, account.number, e);
                }
            }
        }

        info!(
            "User {}: refreshed {} of {} accounts",
            telegram_id,
            total - failed,
            total
        );

        Ok(())
    }

    fn is_authenticated_page(&self, body: &[u8]) -> bool {
        String::from_utf8_lossy(body).contains(&self.options.login_marker)
    }

    async fn authenticate(&self, user: &mut User) -> Result<(), BalanceError> {
        info!("User {}: logging in to the portal", user.telegram_id);

        let credentials = Credentials {
            login: user.auth_username.clone(),
            password: user.auth_password.clone(),
        };

        let response = self.portal.login(&credentials).await.map_err(|e| {
            error!("User {}: login request failed: {}", user.telegram_id, e);
            if let Some(body) = e.body() {
                debug!("Login response body: {}", body);
            }
            e
        })?;

        if !self.is_authenticated_page(&response.body) {
            error!("User {}: login rejected by the portal", user.telegram_id);
            debug!("Login response body: {}", String::from_utf8_lossy(&response.body));
            return Err(BalanceError::LoginFailed("authenticated page marker is missing".into()));
        }

        let token = response.session_token();
        if token.is_empty() {
            error!("User {}: portal did not issue a session cookie", user.telegram_id);
            return Err(BalanceError::LoginFailed("no session cookie".into()));
        }

        let numbers = extract::account_numbers_from_bytes(&response.body, &self.selectors)?;
        if numbers.is_empty() {
            warn!("User {}: no accounts found on the portal", user.telegram_id);
        }

        user.session = token.to_string();
        user.replace_accounts(numbers);

        info!(
            "User {}: logged in, {} account(s) found",
            user.telegram_id,
            user.accounts.len()
        );
        Ok(())
    }

    async fn refresh_account(&self, telegram_id: i64, session: &str, account: &mut Account) -> Result<(), BalanceError> {
        let body = self.fetch_detail(session, &account.number).await?;

        // the portal answers an expired session with its login form
        if !self.is_authenticated_page(&body) {
            return Err(BalanceError::SessionExpired);
        }

        let extraction = extract::account_patch_from_bytes(&body, &self.selectors, &self.labels)?;
        for warning in &extraction.warnings {
            warn!(
                "User {}: account {}: {:?} not extracted from {:?}: {}",
                telegram_id, account.number, warning.field, warning.raw, warning.reason
            );
        }

        if extraction.patch.is_empty() {
            warn!("User {}: account {}: nothing extracted, keeping stored values", telegram_id, account.number);
        }

        account.apply_patch(&extraction.patch);
        self.accounts.save_account(telegram_id, account).await?;

        Ok(())
    }

    async fn fetch_detail(&self, session: &str, number: &str) -> Result<Vec<u8>, PortalError> {
        if self.options.prime_detail_fetch {
            self.portal.fetch_account_detail(session, number).await?;
        }

        self.portal.fetch_account_detail(session, number).await
    }
}
