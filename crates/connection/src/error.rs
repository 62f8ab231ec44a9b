//! Error types for the connection layer.

use hublink_protocol::{ProtocolError, TransportKind};
use tokio_tungstenite::tungstenite;

use crate::state::ConnectionState;

/// Errors from starting, using or stopping a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("{message} current connection state: {state}")]
    InvalidState {
        message: &'static str,
        state: ConnectionState,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("negotiate failed with status code {0}")]
    NegotiateStatus(u16),

    /// Error reported by the server in the negotiate response body.
    #[error("{0}")]
    Negotiate(String),

    #[error("Negotiate redirection limit exceeded.")]
    RedirectLimitExceeded,

    #[error(
        "The server does not support WebSockets which is currently the only transport supported by this client."
    )]
    WebSocketsUnsupported,

    #[error("transport timed out when trying to connect")]
    ConnectTimeout,

    #[error("the {0} transport is not supported by this client")]
    UnsupportedTransport(TransportKind),

    #[error("transport already connected")]
    AlreadyConnected,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    #[error("{0}")]
    Transport(String),

    #[error("connection closed")]
    Closed,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The operation was superseded by a concurrent `stop()`.
    #[error("operation cancelled")]
    Cancelled,
}

impl ConnectionError {
    pub(crate) fn invalid_state(message: &'static str, state: ConnectionState) -> Self {
        Self::InvalidState { message, state }
    }

    /// Returns `true` for the distinguished cancelled outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
