mod model;

pub use model::{CaptureOutcome, CaptureState};

use std::sync::Arc;

use dashmap::DashMap;

use crate::platform::Credentials;

/// Tracks which users owe us a "login password" line. Idle users have no
/// entry, so the map only ever holds pending captures.
#[derive(Clone, Debug, Default)]
pub struct CaptureService {
    pending: Arc<DashMap<i64, CaptureState>>,
}

impl CaptureService {
    pub fn new() -> Self {
        info!("Initializing CaptureService");
        Self::default()
    }

    pub fn state(&self, telegram_id: i64) -> CaptureState {
        self.pending
            .get(&telegram_id)
            .map(|state| *state.value())
            .unwrap_or_default()
    }

    pub fn begin(&self, telegram_id: i64) {
        self.pending.insert(telegram_id, CaptureState::AwaitingCredentials);
    }

    pub fn cancel(&self, telegram_id: i64) {
        self.pending.remove(&telegram_id);
    }

    /// Consumes the pending capture, if any. There is no retry: the user is
    /// back to idle whether or not the text held a valid pair.
    pub fn handle_text(&self, telegram_id: i64, text: &str) -> CaptureOutcome {
        match self.pending.remove(&telegram_id) {
            Some((_, CaptureState::AwaitingCredentials)) => match parse_credentials(text) {
                Some(credentials) => CaptureOutcome::Captured(credentials),
                None => CaptureOutcome::Malformed,
            },
            _ => CaptureOutcome::PassThrough,
        }
    }
}

/// Exactly two whitespace separated tokens: login, then password.
pub fn parse_credentials(text: &str) -> Option<Credentials> {
    let mut tokens = text.split_whitespace();

    match (tokens.next(), tokens.next(), tokens.next()) {
        (Some(login), Some(password), None) => Some(Credentials {
            login: login.to_string(),
            password: password.to_string(),
        }),
        _ => None,
    }
}
