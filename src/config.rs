use std::str::FromStr;

use shuttle_runtime::SecretStore;

use crate::platform::megaline::MEGALINE_BASE_URL;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing secret {0}")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub telegram: TelegramConfig,
    pub storage: StorageConfig,
    pub portal: PortalConfig,
    pub sync: SyncConfig,
    pub language: String,
}

#[derive(Clone)]
pub struct TelegramConfig(pub String);

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("TelegramConfig(***)")
    }
}

/// Both values must be set for Turso to be used.
#[derive(Clone, Debug, Default)]
pub struct StorageConfig {
    pub turso_url: Option<String>,
    pub turso_token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PortalConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// socks5:// or http:// proxy for portal requests only.
    pub proxy_url: Option<String>,
    pub prime_detail_fetch: bool,
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub timeout_secs: u64,
    /// 0 disables the background refresh.
    pub refresh_interval_secs: u64,
}

pub fn build_config(secret_store: &SecretStore) -> Result<AppConfig, ConfigError> {
    info!("Building AppConfig...");
    let config = AppConfig::from_lookup(|key| secret_store.get(key))?;
    info!("AppConfig built");

    Ok(config)
}

impl AppConfig {
    /// Reads every key through `lookup`. Blank values count as absent.
    pub fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut get = |key: &'static str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let telegram_token = get("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;

        let storage = StorageConfig {
            turso_url: get("TURSO_URL"),
            turso_token: get("TURSO_TOKEN"),
        };

        let portal = PortalConfig {
            base_url: get("PORTAL_BASE_URL").unwrap_or_else(|| MEGALINE_BASE_URL.to_string()),
            request_timeout_secs: parse_or("PORTAL_REQUEST_TIMEOUT_SECS", get("PORTAL_REQUEST_TIMEOUT_SECS"), 5)?,
            proxy_url: get("PORTAL_PROXY_URL"),
            prime_detail_fetch: parse_or("PORTAL_PRIME_DETAIL_FETCH", get("PORTAL_PRIME_DETAIL_FETCH"), true)?,
        };

        let sync = SyncConfig {
            timeout_secs: parse_or("SYNC_TIMEOUT_SECS", get("SYNC_TIMEOUT_SECS"), 60)?,
            refresh_interval_secs: parse_or("REFRESH_INTERVAL_SECS", get("REFRESH_INTERVAL_SECS"), 0)?,
        };

        if portal.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "PORTAL_REQUEST_TIMEOUT_SECS",
                value: "0".into(),
            });
        }

        if sync.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "SYNC_TIMEOUT_SECS",
                value: "0".into(),
            });
        }

        Ok(Self {
            telegram: TelegramConfig(telegram_token),
            storage,
            portal,
            sync,
            language: get("DEFAULT_LANGUAGE").unwrap_or_else(|| "ru".to_string()),
        })
    }
}

fn parse_or<T: FromStr>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value.parse::<T>().map_err(|_| ConfigError::Invalid { key, value }),
    }
}
