use crate::platform::Credentials;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CaptureState {
    #[default]
    Idle,
    AwaitingCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The user was not being asked for credentials; the text belongs to someone else.
    PassThrough,
    Captured(Credentials),
    Malformed,
}
