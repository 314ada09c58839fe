//! Status channel error types

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ChannelError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Channel not connected")]
    NotConnected,

    #[error("Channel disconnected")]
    Disconnected,
}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self {
        ChannelError::Serialization(e.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ChannelError::Transport(e.to_string())
    }
}

impl From<url::ParseError> for ChannelError {
    fn from(e: url::ParseError) -> Self {
        ChannelError::InvalidConfig(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChannelError>;
