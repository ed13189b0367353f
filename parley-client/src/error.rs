//! Error taxonomy for the chat client.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    /// Token rejected by the messaging server or the REST API
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Server unreachable, connection dropped or request failed
    #[error("network error: {0}")]
    Network(String),

    /// Target resource no longer exists
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    /// Operation not allowed in the coordinator's current state
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl ChatError {
    /// Transient failures that a caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChatError::Network(_))
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        ChatError::Network(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChatError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ChatError::Network(e.to_string())
    }
}

impl From<garde::Report> for ChatError {
    fn from(e: garde::Report) -> Self {
        ChatError::Validation(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
