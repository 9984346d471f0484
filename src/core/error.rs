//! Error types shared by the streaming session stack.

use tokio_tungstenite::tungstenite;

/// Error types for streaming operations.
///
/// Protocol-level variants reach callers only through
/// [`SessionCallback::on_error`](crate::core::callback::SessionCallback::on_error);
/// factory-level variants (`ConfigurationError`, `EventLoopRunning`) are
/// returned synchronously from `submit`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Protocol error: {0}")]
    ProtocolError(String),
    #[error("Provider error: {0}")]
    ProviderError(String),
    #[error("Inactivity timeout: {0}")]
    InactivityTimeout(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("An event loop is already running in this process")]
    EventLoopRunning,
    #[error("Session aborted: {0}")]
    Aborted(String),
}

/// Result alias used throughout the crate.
pub type StreamResult<T> = Result<T, StreamError>;

impl StreamError {
    /// Errors reported by the remote service inside a well-formed frame.
    ///
    /// These lead to an orderly close instead of a `Failed` teardown.
    pub fn is_server_reported(&self) -> bool {
        matches!(self, Self::ProviderError(_) | Self::InactivityTimeout(_))
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<tungstenite::Error> for StreamError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                Self::NetworkError("WebSocket connection already closed".to_string())
            }
            tungstenite::Error::Protocol(e) => Self::ProtocolError(format!("WebSocket protocol: {e}")),
            tungstenite::Error::Utf8(e) => Self::ProtocolError(format!("Invalid UTF-8 frame: {e}")),
            other => Self::NetworkError(format!("WebSocket error: {other}")),
        }
    }
}
