//! Error types for the voice session engine

use thiserror::Error;

/// Result type alias for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Failures surfaced by the engine.
///
/// Only device and transport failures end a session; a `Decode` error drops the
/// offending chunk and the call carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed audio chunk: {0}")]
    Decode(String),
}

impl SessionError {
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Decode(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::http::Error> for SessionError {
    fn from(err: tokio_tungstenite::tungstenite::http::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}

impl From<url::ParseError> for SessionError {
    fn from(err: url::ParseError) -> Self {
        SessionError::Transport(format!("invalid endpoint url: {}", err))
    }
}

impl From<serde_json::Error> for SessionError {
    fn from(err: serde_json::Error) -> Self {
        SessionError::Transport(format!("protocol encoding failed: {}", err))
    }
}

#[cfg(feature = "alsa")]
impl From<alsa::Error> for SessionError {
    fn from(err: alsa::Error) -> Self {
        SessionError::DeviceUnavailable(err.to_string())
    }
}
