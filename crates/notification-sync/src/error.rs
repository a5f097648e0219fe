//! Error types for the notification sync engine.
//!
//! [`SyncError`] is used inside the crate and by the transports. It never
//! crosses the engine's public boundary: failures are converted into an
//! [`EngineError`] and stored in the published view instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-specific result type.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors produced by transports, the fetcher and the mutation layer.
#[derive(Error, Debug)]
pub enum SyncError {
    /// HTTP transport failure
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("HTTP status {status}: {body}")]
    Status { status: u16, body: String },

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Malformed endpoint URL
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The server answered with `success: false`
    #[error("Server rejected request: {0}")]
    Server(String),

    /// Push connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Unexpected payload shape
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl SyncError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a server rejection error.
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server(msg.into())
    }
}

/// Which boundary produced an [`EngineError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Snapshot retrieval failed. Retry with `refetch()`.
    Fetch,
    /// Push channel failed to connect or dropped. Retried automatically.
    Connection,
    /// A read-state mutation was rejected. Local state is kept.
    Mutation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Fetch => write!(f, "fetch"),
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Mutation => write!(f, "mutation"),
        }
    }
}

/// Error value published to consumers through the view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub message: String,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Convert a crate error raised at the given boundary.
    pub fn from_sync(kind: ErrorKind, err: &SyncError) -> Self {
        Self::new(kind, err.to_string())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        let err = EngineError::from_sync(ErrorKind::Fetch, &SyncError::server("quota exceeded"));
        assert_eq!(err.kind, ErrorKind::Fetch);
        assert_eq!(
            err.to_string(),
            "fetch error: Server rejected request: quota exceeded"
        );
    }

    #[test]
    fn test_engine_error_serializes_kind_snake_case() {
        let err = EngineError::new(ErrorKind::Connection, "refused");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "connection");
        assert_eq!(json["message"], "refused");
    }
}
