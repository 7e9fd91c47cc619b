mod lock;
mod model;

pub use lock::UserLocks;
pub use model::*;
