use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{sync::broadcast, time::MissedTickBehavior};

use crate::{service::balance::BalanceService, storage::UserRepository};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub refreshed: usize,
    pub failed: usize,
}

/// Background task that keeps stored balances fresh for every user with
/// credentials, one user at a time.
#[derive(Clone)]
pub struct BalanceRefresher {
    users: Arc<dyn UserRepository>,
    balance: BalanceService,
    interval: Duration,
    sync_timeout: Duration,
    shutdown: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
}

impl BalanceRefresher {
    pub fn new(users: Arc<dyn UserRepository>, balance: BalanceService, interval: Duration, sync_timeout: Duration) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            users,
            balance,
            interval,
            sync_timeout,
            shutdown,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Balance refresher is already running");
            return;
        }

        info!("Starting balance refresher, every {}s", self.interval.as_secs());

        let refresher = self.clone();
        let mut rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(refresher.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick fires immediately, users just synced on startup do not need it
            ticker.tick().await;

            while refresher.running.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = refresher.sweep().await;
                        info!(
                            "Balance sweep finished: {} refreshed, {} failed",
                            report.refreshed, report.failed
                        );
                    }
                    _ = rx.recv() => {
                        info!("Balance refresher received shutdown signal");
                        break;
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown.send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// One pass over all authorized users. A failing user is logged and the
    /// pass goes on.
    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let ids = match self.users.list_authorized().await {
            Ok(ids) => ids,
            Err(e) => {
                error!("Balance sweep could not list users: {}", e);
                return report;
            }
        };

        for telegram_id in ids {
            match self.balance.sync_balance_within(telegram_id, self.sync_timeout).await {
                Ok(()) => report.refreshed += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!("Balance sweep: user {} failed: {}", telegram_id, e);
                }
            }
        }

        report
    }
}
