use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Terminates every JSON record on the wire (ASCII record separator).
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Name of the only hub protocol spoken by this client.
pub const PROTOCOL_NAME: &str = "json";

/// Hub protocol version sent in the handshake request.
pub const PROTOCOL_VERSION: u32 = 1;

/// How long a transport may take to connect before the start fails.
pub const TRANSPORT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `stop` waits for an in-flight start before logging and waiting again.
pub const SHUTDOWN_WAIT: Duration = Duration::from_secs(60);

/// How long a hub connection waits for the server's handshake response.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for the negotiate HTTP request.
pub const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(100);

/// Maximum number of negotiate redirects followed by a single start.
pub const MAX_NEGOTIATE_REDIRECTS: usize = 100;

/// Hub message type discriminant (the `type` field of every record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    Invocation,
    StreamItem,
    Completion,
    StreamInvocation,
    CancelInvocation,
    Ping,
    Close,
}

impl MessageType {
    /// Returns the protocol name of this message type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Invocation => "Invocation",
            Self::StreamItem => "StreamItem",
            Self::Completion => "Completion",
            Self::StreamInvocation => "StreamInvocation",
            Self::CancelInvocation => "CancelInvocation",
            Self::Ping => "Ping",
            Self::Close => "Close",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Invocation => 1,
            MessageType::StreamItem => 2,
            MessageType::Completion => 3,
            MessageType::StreamInvocation => 4,
            MessageType::CancelInvocation => 5,
            MessageType::Ping => 6,
            MessageType::Close => 7,
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Invocation),
            2 => Ok(Self::StreamItem),
            3 => Ok(Self::Completion),
            4 => Ok(Self::StreamInvocation),
            5 => Ok(Self::CancelInvocation),
            6 => Ok(Self::Ping),
            7 => Ok(Self::Close),
            other => Err(ProtocolError::UnknownMessageType(i64::from(other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_discriminants() {
        assert_eq!(u8::from(MessageType::Invocation), 1);
        assert_eq!(u8::from(MessageType::Completion), 3);
        assert_eq!(u8::from(MessageType::Close), 7);
        assert_eq!(MessageType::try_from(5).unwrap(), MessageType::CancelInvocation);
    }

    #[test]
    fn unknown_discriminant_is_rejected() {
        assert!(matches!(
            MessageType::try_from(0),
            Err(ProtocolError::UnknownMessageType(0))
        ));
        assert!(MessageType::try_from(8).is_err());
    }

    #[test]
    fn message_type_serializes_as_integer() {
        let json = serde_json::to_string(&MessageType::StreamItem).unwrap();
        assert_eq!(json, "2");
        let parsed: MessageType = serde_json::from_str("6").unwrap();
        assert_eq!(parsed, MessageType::Ping);
    }

    #[test]
    fn record_separator_is_ascii_rs() {
        assert_eq!(RECORD_SEPARATOR as u32, 0x1e);
    }
}
