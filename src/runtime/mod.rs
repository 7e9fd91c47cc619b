mod refresh;

pub use refresh::{BalanceRefresher, SweepReport};
