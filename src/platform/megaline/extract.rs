//! Field extraction for MegaLine billing pages.
//!
//! Every rule is a plain function over an already parsed document, so each
//! one can be exercised on its own. A rule that cannot make sense of its
//! block leaves the field unset and reports a [`FieldWarning`]; it never
//! stops the other rules. The only hard failure is a body that cannot be
//! decoded at all.

use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::service::user::AccountPatch;

static DATE_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{2})\.(\d{2})\.(\d{4})\b").unwrap());

const DATE_FORMAT: &str = "%d.%m.%Y";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("document parse error: {0}")]
    DocumentParse(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Balance,
    BillingPeriod,
    TariffAmount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldWarning {
    pub field: Field,
    pub raw: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub patch: AccountPatch,
    pub warnings: Vec<FieldWarning>,
}

/// Labels of the detail page blocks, compared after trimming.
#[derive(Debug, Clone)]
pub struct LabelSet {
    pub balance: String,
    pub billing_period: String,
    pub tariff_amount: String,
    pub currency_suffix: String,
}

impl Default for LabelSet {
    fn default() -> Self {
        Self {
            balance: "Баланс".to_string(),
            billing_period: "Расчетный период:".to_string(),
            tariff_amount: "Оплата за период:".to_string(),
            currency_suffix: "сом".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PageSelectors {
    pub block: Selector,
    pub label: Selector,
    pub value: Selector,
    pub account_option: Selector,
}

impl Default for PageSelectors {
    fn default() -> Self {
        Self {
            block: Selector::parse(".account_info .span100").unwrap(),
            label: Selector::parse(".desc").unwrap(),
            value: Selector::parse(".value").unwrap(),
            account_option: Selector::parse(".account_selector option").unwrap(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BillingPeriod {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

pub fn parse_document(raw: &[u8]) -> Result<Html, ExtractError> {
    let text = std::str::from_utf8(raw).map_err(|e| ExtractError::DocumentParse(e.to_string()))?;
    Ok(Html::parse_document(text))
}

/// Decodes the detail page and runs every field rule over it.
pub fn account_patch_from_bytes(
    raw: &[u8],
    selectors: &PageSelectors,
    labels: &LabelSet,
) -> Result<Extraction, ExtractError> {
    let document = parse_document(raw)?;
    Ok(extract_account_patch(&document, selectors, labels))
}

/// Decodes the login response and lists the account selector options.
pub fn account_numbers_from_bytes(raw: &[u8], selectors: &PageSelectors) -> Result<Vec<String>, ExtractError> {
    let document = parse_document(raw)?;
    Ok(extract_account_numbers(&document, selectors))
}

pub fn extract_account_numbers(document: &Html, selectors: &PageSelectors) -> Vec<String> {
    document
        .select(&selectors.account_option)
        .map(|option| element_text(&option).trim().to_string())
        .filter(|number| !number.is_empty())
        .collect()
}

pub fn extract_account_patch(document: &Html, selectors: &PageSelectors, labels: &LabelSet) -> Extraction {
    let mut extraction = Extraction::default();
    let mut period_seen = false;

    for block in document.select(&selectors.block) {
        let label: String = block.select(&selectors.label).map(|el| element_text(&el)).collect();
        let label = label.trim();

        let Some(value) = block.select(&selectors.value).next() else {
            continue;
        };
        let raw = element_text(&value).trim().to_string();

        if label == labels.balance && extraction.patch.balance.is_none() {
            match parse_balance(&raw, &labels.currency_suffix) {
                Ok(balance) => extraction.patch.balance = Some(balance),
                Err(reason) => extraction.warn(Field::Balance, &raw, reason),
            }
        } else if label == labels.billing_period && !period_seen {
            match parse_billing_period(&raw) {
                Ok(period) => {
                    period_seen = true;
                    if period.from.is_none() || period.to.is_none() {
                        extraction.warn(Field::BillingPeriod, &raw, "one of the dates is not a calendar date".into());
                    }
                    extraction.patch.billing_from = period.from;
                    extraction.patch.billing_to = period.to;
                }
                Err(reason) => extraction.warn(Field::BillingPeriod, &raw, reason),
            }
        } else if label == labels.tariff_amount && extraction.patch.tariff_amount.is_none() {
            match parse_tariff_amount(&raw, &labels.currency_suffix) {
                Ok(amount) => extraction.patch.tariff_amount = Some(amount),
                Err(reason) => extraction.warn(Field::TariffAmount, &raw, reason),
            }
        }
    }

    extraction
}

/// `"1 234,56 сом"` -> `1234.56`
pub fn parse_balance(raw: &str, currency_suffix: &str) -> Result<f64, String> {
    let normalized = strip_amount(raw, currency_suffix).replace(',', ".");

    match normalized.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        Ok(_) => Err(format!("{normalized:?} is not a finite amount")),
        Err(e) => Err(format!("{normalized:?}: {e}")),
    }
}

/// `"500 сом"` -> `500`
pub fn parse_tariff_amount(raw: &str, currency_suffix: &str) -> Result<i64, String> {
    let normalized = strip_amount(raw, currency_suffix);
    if normalized.is_empty() {
        return Err("empty value".to_string());
    }

    normalized.parse::<i64>().map_err(|e| format!("{normalized:?}: {e}"))
}

/// Needs exactly two `DD.MM.YYYY` tokens. A token that looks like a date but
/// is not one only leaves its own bound unset.
pub fn parse_billing_period(raw: &str) -> Result<BillingPeriod, String> {
    let dates: Vec<&str> = DATE_REGEX.find_iter(raw).map(|m| m.as_str()).collect();

    let [from, to] = dates.as_slice() else {
        return Err(format!("expected 2 dates, found {}", dates.len()));
    };

    let period = BillingPeriod {
        from: NaiveDate::parse_from_str(from, DATE_FORMAT).ok(),
        to: NaiveDate::parse_from_str(to, DATE_FORMAT).ok(),
    };

    if let (Some(from), Some(to)) = (period.from, period.to) {
        if from > to {
            return Err(format!("period starts after it ends: {from} > {to}"));
        }
    }

    Ok(period)
}

fn strip_amount(raw: &str, currency_suffix: &str) -> String {
    raw.replace(currency_suffix, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect()
}

fn element_text(element: &ElementRef<'_>) -> String {
    element.text().collect()
}

impl Extraction {
    fn warn(&mut self, field: Field, raw: &str, reason: String) {
        self.warnings.push(FieldWarning {
            field,
            raw: raw.to_string(),
            reason,
        });
    }
}
