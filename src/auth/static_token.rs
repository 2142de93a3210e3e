use async_trait::async_trait;

use crate::auth::Authenticator;
use crate::core::errors::AgentResult;

/// Always returns the same bearer token. Used when `auth_mode = token`.
pub struct StaticTokenAuthenticator {
    token: String,
}

impl StaticTokenAuthenticator {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self) -> AgentResult<String> {
        Ok(format!("Bearer {}", self.token))
    }
}
