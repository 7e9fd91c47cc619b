use std::time::Duration;

use teloxide::adaptors::throttle::Limits;
use teloxide::adaptors::Throttle;
use teloxide::prelude::*;
use teloxide::Bot;

use crate::error::{BotError, BotResult, HandlerResult};
use crate::handler::get_handler;
use crate::runtime::BalanceRefresher;
use crate::state::AppState;

pub struct BotService {
    pub bot: Throttle<Bot>,
    pub state: AppState,
}

impl BotService {
    pub fn new(state: AppState) -> BotResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| BotError::Other(e.into()))?;

        let bot = Bot::with_client(state.config.telegram.0.clone(), client).throttle(Limits::default());

        Ok(Self { bot, state })
    }

    pub async fn start(&self) -> HandlerResult<()> {
        info!("Testing connection to Telegram API...");
        match self.bot.get_me().await {
            Ok(_) => info!("Successfully connected to Telegram API"),
            Err(e) => {
                error!("Failed to connect to Telegram API: {:?}", e);
                return Err(anyhow::anyhow!("Failed to connect to Telegram API: {}", e).into());
            }
        }

        let bot = self.bot.clone();
        let state = self.state.clone();

        crate::command::setup_user_commands(&bot, &state.config.language).await?;

        let refresher = self.spawn_refresher();

        Dispatcher::builder(bot, get_handler())
            .dependencies(dptree::deps![state])
            .error_handler(LoggingErrorHandler::with_custom_text(
                "An error has occurred in the dispatcher",
            ))
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;

        if let Some(refresher) = refresher.filter(BalanceRefresher::is_running) {
            info!("Stopping balance refresher");
            refresher.stop();
        }

        Ok(())
    }

    fn spawn_refresher(&self) -> Option<BalanceRefresher> {
        let sync = &self.state.config.sync;
        if sync.refresh_interval_secs == 0 {
            info!("Periodic balance refresh is disabled");
            return None;
        }

        let refresher = BalanceRefresher::new(
            self.state.storage.users.clone(),
            self.state.service_registry.balance.clone(),
            Duration::from_secs(sync.refresh_interval_secs),
            Duration::from_secs(sync.timeout_secs),
        );
        refresher.start();

        Some(refresher)
    }
}
