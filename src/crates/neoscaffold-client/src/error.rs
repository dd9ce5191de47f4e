//! Error types for the transport and dispatch layer.

use std::error::Error as _;

use neoscaffold_core::ScaffoldError;
use reqwest::StatusCode;
use thiserror::Error;

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to the backend.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP transport or status error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket connection error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// The backend rejected the session.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A plan body was not valid JSON and was not sent.
    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    /// Graph, snapshot or compiler error.
    #[error(transparent)]
    Core(#[from] ScaffoldError),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for ClientError {
    fn from(err: serde_yaml::Error) -> Self {
        ClientError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ClientError {
    fn from(err: toml::de::Error) -> Self {
        ClientError::Config(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(err.to_string())
    }
}

impl ClientError {
    /// Whether the error means the session is no longer accepted.
    ///
    /// HTTP errors count when the status is `401` or a cause mentions
    /// `unauthorized` or `token expired`; their own message embeds the
    /// request URL and is not searched. Graph errors never count. Other
    /// errors match `401`, `unauthorized` or `token expired` in their
    /// message, case-insensitively.
    pub fn is_authorization_failure(&self) -> bool {
        match self {
            ClientError::Unauthorized(_) => true,
            ClientError::Core(_) => false,
            ClientError::Http(e) => {
                if e.status() == Some(StatusCode::UNAUTHORIZED) {
                    return true;
                }
                let mut source = e.source();
                while let Some(cause) = source {
                    let message = cause.to_string().to_lowercase();
                    if message.contains("unauthorized") || message.contains("token expired") {
                        return true;
                    }
                    source = cause.source();
                }
                false
            }
            other => {
                let message = other.to_string().to_lowercase();
                message.contains("401")
                    || message.contains("unauthorized")
                    || message.contains("token expired")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_failure_detection() {
        assert!(ClientError::Unauthorized("nope".into()).is_authorization_failure());
        assert!(ClientError::WebSocket("HTTP error: 401".into()).is_authorization_failure());
        assert!(ClientError::Config("Token Expired at noon".into()).is_authorization_failure());
        assert!(!ClientError::WebSocket("connection refused".into()).is_authorization_failure());
        let core = ScaffoldError::Configuration("duplicate node id 401".into());
        assert!(!ClientError::from(core).is_authorization_failure());
    }
}
