use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DisplayError>;

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Not connected to display server")]
    NotConnected,

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Decoder error: {0}")]
    Decoder(String),

    #[error("No render surface attached")]
    NoSurface,

    #[error("Video dimensions unknown")]
    NoDimensions,

    #[error("Frame capture failed: {0}")]
    Capture(String),

    #[error("Server process error: {0}")]
    Server(String),
}

impl DisplayError {
    pub fn decoder(msg: impl Into<String>) -> Self {
        Self::Decoder(msg.into())
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture(msg.into())
    }
}
