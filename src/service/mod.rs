use std::{sync::Arc, time::Duration};

use crate::{config::AppConfig, platform::PortalClient, storage::StorageManager};

pub mod balance;
pub mod capture;
pub mod chat;
mod error;
pub mod user;

use balance::{BalanceService, SyncOptions, LOGIN_MARKER};
use capture::CaptureService;
use chat::ChatService;

pub use error::ServiceError;

#[derive(Clone)]
pub struct ServiceRegistry {
    pub capture: CaptureService,
    pub balance: BalanceService,
    pub chat: ChatService,
}

impl ServiceRegistry {
    pub fn new(config: &AppConfig, storage: &StorageManager, portal: Arc<dyn PortalClient>) -> Self {
        info!("Initializing service registry");

        let capture = CaptureService::new();

        let balance = BalanceService::new(
            storage,
            portal,
            SyncOptions {
                prime_detail_fetch: config.portal.prime_detail_fetch,
                login_marker: LOGIN_MARKER.to_string(),
            },
        );

        let chat = ChatService::new(
            storage,
            capture.clone(),
            balance.clone(),
            Duration::from_secs(config.sync.timeout_secs),
            config.language.clone(),
        );

        info!("Service registry initialized");

        Self { capture, balance, chat }
    }
}
