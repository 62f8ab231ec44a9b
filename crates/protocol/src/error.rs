//! Error types for wire protocol parsing.

use crate::constants::MessageType;

/// Errors produced while encoding or decoding hub protocol records.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("expected a JSON object but got: {0}")]
    NotAnObject(String),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("unknown message type: {0}")]
    UnknownMessageType(i64),

    #[error("received unexpected message type '{0}'")]
    UnexpectedMessageType(MessageType),

    #[error(
        "detected a connection attempt to a server speaking a legacy protocol version; \
         this client only supports the current hub protocol"
    )]
    LegacyServer,
}
