mod client_credentials;
mod static_token;

pub use client_credentials::ClientCredentialsAuthenticator;
pub use static_token::StaticTokenAuthenticator;

use async_trait::async_trait;

use crate::core::errors::AgentResult;

/// Produces the `authorization` header value attached to every new stream
/// attach (C1). Implemented by two concrete variants rather than a class
/// hierarchy, since authentication here is a single capability.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self) -> AgentResult<String>;
}
