mod error;
pub mod megaline;

pub use error::PortalError;
pub use megaline::{MegalineClient, PortalEndpoints};

use async_trait::async_trait;

/// Login and password pair parsed from a single chat message.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub login: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("login", &self.login)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoginResponse {
    pub body: Vec<u8>,
    /// Token the portal issued before the login form was posted.
    pub pre_auth_token: String,
    /// Token from the login response, when the portal rotated it.
    pub rotated_token: Option<String>,
}

impl LoginResponse {
    pub fn session_token(&self) -> &str {
        self.rotated_token.as_deref().unwrap_or(&self.pre_auth_token)
    }
}

/// Network side of the billing portal. Implementations keep no session
/// state between calls; the caller owns the token.
#[async_trait]
pub trait PortalClient: Send + Sync + 'static {
    async fn login(&self, credentials: &Credentials) -> Result<LoginResponse, PortalError>;

    async fn fetch_account_detail(&self, session_token: &str, account_number: &str) -> Result<Vec<u8>, PortalError>;
}
