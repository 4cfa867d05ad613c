//! Error types for mirai-link

use thiserror::Error;

use crate::protocol::StatusEnvelope;

/// Result type alias using mirai-link's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mirai-link
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket channel error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed endpoint URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Malformed mirai code
    #[error("Mirai code error: {0}")]
    Codec(String),

    /// Authentication against the gateway failed
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Operation not allowed in the current session state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// The push channel is gone
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Timeout error
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The gateway answered with a non-zero status code
    #[error("Gateway rejected the call: {0}")]
    Rejected(StatusEnvelope),
}

impl Error {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::WebSocket(_) | Error::ChannelClosed(_) | Error::Timeout(_)
        )
    }

    /// Check if error is a client error (caller's fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Codec(_) | Error::InvalidState(_) | Error::Url(_)
        )
    }
}
