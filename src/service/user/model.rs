use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub telegram_id: i64,
    pub auth_username: String,
    pub auth_password: String,
    /// Portal session cookie value. Empty means not authenticated.
    pub session: String,
    pub accounts: Vec<Account>,
}

impl User {
    pub fn new(telegram_id: i64) -> Self {
        Self {
            telegram_id,
            ..Default::default()
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.auth_username.is_empty() && !self.auth_password.is_empty()
    }

    /// New credentials may belong to a different portal customer, so the
    /// session and the scraped account list go with the old ones.
    pub fn set_credentials(&mut self, username: String, password: String) {
        self.auth_username = username;
        self.auth_password = password;
        self.invalidate_session();
    }

    pub fn invalidate_session(&mut self) {
        self.session.clear();
        self.accounts.clear();
    }

    /// Makes `numbers` the account membership of this user, in that order.
    /// Data already known for a number that is still present is kept.
    pub fn replace_accounts<I>(&mut self, numbers: I)
    where
        I: IntoIterator<Item = String>,
    {
        let mut previous = std::mem::take(&mut self.accounts);

        for number in numbers {
            if self.accounts.iter().any(|account| account.number == number) {
                continue;
            }

            let account = match previous.iter().position(|account| account.number == number) {
                Some(index) => previous.swap_remove(index),
                None => Account::new(number),
            };

            self.accounts.push(account);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub number: String,
    pub billing_from: Option<NaiveDate>,
    pub billing_to: Option<NaiveDate>,
    pub tariff_amount: Option<i64>,
    pub balance: Option<f64>,
}

impl Account {
    pub fn new(number: impl Into<String>) -> Self {
        Self {
            number: number.into(),
            ..Default::default()
        }
    }

    /// Merges freshly extracted values. Fields the patch does not carry keep
    /// their previous value. When the merged period ends up inverted, the bound
    /// that did not come from the patch is stale and gets dropped.
    pub fn apply_patch(&mut self, patch: &AccountPatch) {
        if let Some(balance) = patch.balance {
            self.balance = Some(balance);
        }
        if let Some(tariff_amount) = patch.tariff_amount {
            self.tariff_amount = Some(tariff_amount);
        }
        if let Some(from) = patch.billing_from {
            self.billing_from = Some(from);
        }
        if let Some(to) = patch.billing_to {
            self.billing_to = Some(to);
        }

        if let (Some(from), Some(to)) = (self.billing_from, self.billing_to) {
            if from > to {
                if patch.billing_from.is_none() {
                    self.billing_from = None;
                } else {
                    self.billing_to = None;
                }
            }
        }
    }
}

/// Partial result of scraping an account detail page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountPatch {
    pub balance: Option<f64>,
    pub billing_from: Option<NaiveDate>,
    pub billing_to: Option<NaiveDate>,
    pub tariff_amount: Option<i64>,
}

impl AccountPatch {
    pub fn is_empty(&self) -> bool {
        self.balance.is_none()
            && self.billing_from.is_none()
            && self.billing_to.is_none()
            && self.tariff_amount.is_none()
    }
}
