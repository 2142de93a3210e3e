use std::time::{Duration, Instant};

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{AuthUrl, ClientId, ClientSecret, TokenResponse, TokenUrl};
use tokio::sync::Mutex;

use crate::auth::Authenticator;
use crate::core::errors::{AgentError, AgentResult};

/// Refresh the cached token once its remaining lifetime drops below this.
const REFRESH_MARGIN: Duration = Duration::from_secs(10);

struct CachedToken {
    bearer: String,
    expires_at: Instant,
}

/// OAuth2 client-credentials grant against `issuer`, caching the access
/// token until it is within `REFRESH_MARGIN` of expiry. Used when
/// `auth_mode = bearer`.
pub struct ClientCredentialsAuthenticator {
    client: BasicClient,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsAuthenticator {
    pub fn new(issuer: &str, client_id: &str, client_secret: &str) -> AgentResult<Self> {
        let token_url = TokenUrl::new(issuer.to_string())
            .map_err(|e| AgentError::Config(format!("invalid auth issuer url: {e}")))?;
        let client = BasicClient::new(
            ClientId::new(client_id.to_string()),
            Some(ClientSecret::new(client_secret.to_string())),
            AuthUrl::new(issuer.to_string())
                .map_err(|e| AgentError::Config(format!("invalid auth issuer url: {e}")))?,
            Some(token_url),
        );
        Ok(Self {
            client,
            cached: Mutex::new(None),
        })
    }

    async fn fetch_token(&self) -> AgentResult<CachedToken> {
        let response = self
            .client
            .exchange_client_credentials()
            .request_async(oauth2::reqwest::async_http_client)
            .await
            .map_err(|e| AgentError::Auth(format!("token exchange failed: {e}")))?;

        let ttl = response
            .expires_in()
            .unwrap_or(Duration::from_secs(300));
        Ok(CachedToken {
            bearer: format!("Bearer {}", response.access_token().secret()),
            expires_at: Instant::now() + ttl,
        })
    }
}

#[async_trait]
impl Authenticator for ClientCredentialsAuthenticator {
    async fn authenticate(&self) -> AgentResult<String> {
        let mut guard = self.cached.lock().await;

        let needs_refresh = match guard.as_ref() {
            Some(cached) => Instant::now() + REFRESH_MARGIN >= cached.expires_at,
            None => true,
        };

        if needs_refresh {
            *guard = Some(self.fetch_token().await?);
        }

        Ok(guard.as_ref().expect("token just populated").bearer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_issuer() {
        let result = ClientCredentialsAuthenticator::new("not a url", "id", "secret");
        assert!(result.is_err());
    }
}
