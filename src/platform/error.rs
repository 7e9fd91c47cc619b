use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum PortalError {
    /// Network failure or a non-2xx answer. `body` holds whatever the portal
    /// managed to send, for diagnosing soft failures.
    #[error("transport error ({stage}): {message}")]
    Transport {
        stage: &'static str,
        message: String,
        status: Option<StatusCode>,
        body: Option<String>,
    },
    #[error("invalid portal url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl PortalError {
    pub fn transport(stage: &'static str, error: reqwest::Error) -> Self {
        PortalError::Transport {
            stage,
            message: error.to_string(),
            status: error.status(),
            body: None,
        }
    }

    pub fn body(&self) -> Option<&str> {
        match self {
            PortalError::Transport { body, .. } => body.as_deref(),
            _ => None,
        }
    }
}
