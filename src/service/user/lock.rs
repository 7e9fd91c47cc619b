use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per user. Whoever reads a user, waits on the network and
/// writes it back holds the guard for the whole span, so a concurrent
/// `/save` or `/delete` cannot be overwritten with stale data.
#[derive(Clone, Debug, Default)]
pub struct UserLocks {
    locks: Arc<DashMap<i64, Arc<Mutex<()>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, telegram_id: i64) -> OwnedMutexGuard<()> {
        // clone out of the map so no shard lock is held across the await
        let lock = Arc::clone(self.locks.entry(telegram_id).or_default().value());
        lock.lock_owned().await
    }
}
