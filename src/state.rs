use std::sync::Arc;

use crate::{
    config::AppConfig,
    error::BotResult,
    platform::{MegalineClient, PortalClient, PortalEndpoints},
    service::ServiceRegistry,
    storage::StorageManager,
};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub storage: StorageManager,
    pub service_registry: ServiceRegistry,
}

impl AppState {
    pub async fn new(config: AppConfig) -> BotResult<Self> {
        let storage = StorageManager::init(&config.storage).await?;

        info!("Initializing portal client for {}", config.portal.base_url);
        let endpoints = PortalEndpoints::new(&config.portal.base_url)?;
        let portal: Arc<dyn PortalClient> = Arc::new(MegalineClient::new(
            endpoints,
            std::time::Duration::from_secs(config.portal.request_timeout_secs),
            config.portal.proxy_url.as_deref(),
        )?);

        let service_registry = ServiceRegistry::new(&config, &storage, portal);

        Ok(Self {
            config: Arc::new(config),
            storage,
            service_registry,
        })
    }
}
