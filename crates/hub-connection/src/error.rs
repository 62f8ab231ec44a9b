//! Error types for the hub layer.

use hublink_connection::{ConnectionError, ConnectionState};
use hublink_protocol::ProtocolError;

/// Errors from hub operations.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error returned by the server for an invocation.
    #[error("{0}")]
    Hub(String),

    #[error("Received an error during handshake: {0}")]
    Handshake(String),

    #[error("Received unexpected message while waiting for the handshake response.")]
    UnexpectedHandshake,

    #[error("connection was lost before the handshake completed")]
    HandshakeAborted,

    #[error("timed out waiting for the handshake response")]
    HandshakeTimeout,

    #[error("event_name cannot be empty")]
    EmptyEventName,

    #[error("an action for this event has already been registered. event name: {0}")]
    DuplicateHandler(String),

    #[error(
        "can't register a handler if the connection is not in a disconnected state. current connection state: {0}"
    )]
    RegistrationWhileActive(ConnectionState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = HubError::Handshake("bad protocol".into());
        assert_eq!(
            err.to_string(),
            "Received an error during handshake: bad protocol"
        );

        let err = HubError::DuplicateHandler("Send".into());
        assert!(err.to_string().ends_with("event name: Send"));

        let err = HubError::RegistrationWhileActive(ConnectionState::Connected);
        assert!(err.to_string().ends_with("current connection state: connected"));

        let err = HubError::from(ConnectionError::Cancelled);
        assert_eq!(err.to_string(), "operation cancelled");
    }
}
