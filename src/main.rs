use bot::BotService;
use state::AppState;

extern crate pretty_env_logger;
#[macro_use]
extern crate log;
#[macro_use]
extern crate rust_i18n;

mod bot;
mod command;
mod config;
mod error;
mod handler;
mod platform;
mod runtime;
mod service;
mod state;
mod storage;

i18n!("locales", fallback = "ru");

#[shuttle_runtime::main]
async fn shuttle_main(
    #[shuttle_runtime::Secrets] secrets: shuttle_runtime::SecretStore,
) -> Result<BotService, shuttle_runtime::Error> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    let _ = pretty_env_logger::try_init_timed();

    info!("Starting bot...");

    let config = config::build_config(&secrets).map_err(error::BotError::from)?;
    rust_i18n::set_locale(&config.language);

    info!("Initializing AppState...");
    let state = AppState::new(config).await?;
    info!("AppState initialized");

    let bot_service = BotService::new(state)?;
    info!("Bot instance created");

    Ok(bot_service)
}

#[shuttle_runtime::async_trait]
impl shuttle_runtime::Service for BotService {
    async fn bind(self, _addr: std::net::SocketAddr) -> Result<(), shuttle_runtime::Error> {
        self.start()
            .await
            .map_err(|e| shuttle_runtime::Error::Custom(anyhow::anyhow!("Failed to start bot: {}", e)))?;

        Ok(())
    }
}
