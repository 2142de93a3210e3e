//! Manages agent configuration: loading from file/env and validation.

use crate::core::errors::{AgentError, AgentResult};
use serde::{Deserialize, Serialize};

fn default_auth_mode() -> AuthMode {
    AuthMode::Token
}

fn default_resync_period_secs() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_false() -> bool {
    false
}

/// Selects which `Authenticator` variant (C1) the agent constructs.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    Token,
    Bearer,
}

/// TLS options for the connection to the membership server.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub skip_verify: bool,
    #[serde(default)]
    pub ca_pem_path: Option<String>,
}

/// The agent's full configuration surface, loaded from a TOML file layered
/// with `AGENT_`-prefixed environment variable overrides.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub id: String,
    pub base_url: String,

    #[serde(default)]
    pub tls: TlsConfig,

    #[serde(default = "default_auth_mode")]
    pub auth_mode: AuthMode,
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub auth_issuer: Option<String>,
    #[serde(default)]
    pub auth_client_id: Option<String>,
    #[serde(default)]
    pub auth_client_secret: Option<String>,

    #[serde(default = "default_false")]
    pub production: bool,
    #[serde(default = "default_false")]
    pub outdated: bool,

    #[serde(default = "default_resync_period_secs")]
    pub resync_period_secs: u64,

    #[serde(default)]
    pub kube_config_path: Option<String>,

    #[serde(default = "default_false")]
    pub debug: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    /// Loads configuration from an optional TOML file plus `AGENT_`-prefixed
    /// environment variable overrides, then validates the required fields,
    /// the way `spineldb::config::Config::from_file` loads and checks its
    /// own required options.
    pub fn load(path: Option<&str>) -> AgentResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }
        builder = builder.add_source(config::Environment::with_prefix("AGENT").separator("_"));

        let raw = builder.build()?;
        let cfg: Config = raw.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> AgentResult<()> {
        if self.server_address.trim().is_empty() {
            return Err(AgentError::Config("server_address is required".to_string()));
        }
        if self.id.trim().is_empty() {
            return Err(AgentError::Config("id is required".to_string()));
        }
        if self.base_url.trim().is_empty() {
            return Err(AgentError::Config("base_url is required".to_string()));
        }
        url::Url::parse(&self.base_url)
            .map_err(|e| AgentError::Config(format!("base_url is not a valid URL: {e}")))?;

        if self.tls.skip_verify {
            // `tonic`'s `ClientTlsConfig` has no hook to disable certificate
            // verification, so honoring this flag would mean silently still
            // verifying the server's certificate. Reject it rather than
            // accept a security-relevant setting that does nothing.
            return Err(AgentError::Config(
                "tls.skip_verify is not supported by this agent's TLS client; remove it from the config"
                    .to_string(),
            ));
        }

        match self.auth_mode {
            AuthMode::Token => {
                if self.auth_token.as_deref().unwrap_or("").is_empty() {
                    return Err(AgentError::Config(
                        "auth_token is required when auth_mode = token".to_string(),
                    ));
                }
            }
            AuthMode::Bearer => {
                if self.auth_issuer.as_deref().unwrap_or("").is_empty()
                    || self.auth_client_id.as_deref().unwrap_or("").is_empty()
                    || self.auth_client_secret.as_deref().unwrap_or("").is_empty()
                {
                    return Err(AgentError::Config(
                        "auth_issuer, auth_client_id and auth_client_secret are required when auth_mode = bearer"
                            .to_string(),
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server_address: "membership.example.com:443".to_string(),
            id: "agent-1".to_string(),
            base_url: "https://agent.example.com".to_string(),
            tls: TlsConfig::default(),
            auth_mode: AuthMode::Token,
            auth_token: Some("secret".to_string()),
            auth_issuer: None,
            auth_client_id: None,
            auth_client_secret: None,
            production: false,
            outdated: false,
            resync_period_secs: default_resync_period_secs(),
            kube_config_path: None,
            debug: false,
            log_level: default_log_level(),
        }
    }

    #[test]
    fn rejects_missing_server_address() {
        let mut cfg = base_config();
        cfg.server_address = String::new();
        assert!(matches!(cfg.validate(), Err(AgentError::Config(_))));
    }

    #[test]
    fn rejects_invalid_base_url() {
        let mut cfg = base_config();
        cfg.base_url = "not a url".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bearer_mode_requires_issuer_and_credentials() {
        let mut cfg = base_config();
        cfg.auth_mode = AuthMode::Bearer;
        cfg.auth_token = None;
        assert!(cfg.validate().is_err());

        cfg.auth_issuer = Some("https://issuer.example.com".to_string());
        cfg.auth_client_id = Some("client".to_string());
        cfg.auth_client_secret = Some("secret".to_string());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn accepts_well_formed_token_config() {
        let cfg = base_config();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_tls_skip_verify() {
        let mut cfg = base_config();
        cfg.tls.enabled = true;
        cfg.tls.skip_verify = true;
        assert!(matches!(cfg.validate(), Err(AgentError::Config(_))));
    }
}
