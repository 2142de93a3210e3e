use thiserror::Error;

/// The agent's single error type. Each variant is a fatal condition for the
/// operation it wraps; the connection-loop level is where most of these get
/// turned into a reconnect/backoff decision rather than a process exit.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("cluster error: {0}")]
    Cluster(#[from] kube::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Json(String),

    #[error("membership stream is stopped")]
    Stopped,
}

impl Clone for AgentError {
    fn clone(&self) -> Self {
        match self {
            AgentError::Config(s) => AgentError::Config(s.clone()),
            AgentError::Auth(s) => AgentError::Auth(s.clone()),
            AgentError::Transport(s) => AgentError::Transport(s.clone()),
            AgentError::Cluster(e) => AgentError::Transport(e.to_string()),
            AgentError::Protocol(s) => AgentError::Protocol(s.clone()),
            AgentError::Io(s) => AgentError::Io(s.clone()),
            AgentError::Json(s) => AgentError::Json(s.clone()),
            AgentError::Stopped => AgentError::Stopped,
        }
    }
}

impl PartialEq for AgentError {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl From<std::io::Error> for AgentError {
    fn from(e: std::io::Error) -> Self {
        AgentError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::Json(e.to_string())
    }
}

impl From<config::ConfigError> for AgentError {
    fn from(e: config::ConfigError) -> Self {
        AgentError::Config(e.to_string())
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        AgentError::Auth(e.to_string())
    }
}

impl From<tonic::Status> for AgentError {
    fn from(e: tonic::Status) -> Self {
        AgentError::Transport(e.to_string())
    }
}

impl From<tonic::transport::Error> for AgentError {
    fn from(e: tonic::transport::Error) -> Self {
        AgentError::Transport(e.to_string())
    }
}

pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_preserves_message() {
        let e = AgentError::Config("bad field".to_string());
        let c = e.clone();
        assert_eq!(e, c);
    }

    #[test]
    fn io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: AgentError = io_err.into();
        assert!(matches!(e, AgentError::Io(_)));
    }
}
