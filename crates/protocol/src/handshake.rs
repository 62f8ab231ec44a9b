//! Hub protocol handshake frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::{PROTOCOL_NAME, PROTOCOL_VERSION};
use crate::error::ProtocolError;
use crate::framing::write_record;

/// First record a client sends after the transport connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub protocol: String,
    pub version: u32,
}

impl Default for HandshakeRequest {
    fn default() -> Self {
        Self {
            protocol: PROTOCOL_NAME.to_string(),
            version: PROTOCOL_VERSION,
        }
    }
}

impl HandshakeRequest {
    /// Serializes the request as a terminated record.
    pub fn to_record(&self) -> Result<String, ProtocolError> {
        Ok(write_record(&serde_json::to_string(self)?))
    }
}

/// Server reply to the handshake request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeResponse {
    /// Bare `{}` acknowledgement.
    Accepted,
    /// The server refused the handshake.
    Rejected(String),
    /// Some other message arrived where the handshake reply was expected.
    Unexpected,
}

impl HandshakeResponse {
    /// Interprets the first record received after connecting.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let object = value
            .as_object()
            .ok_or_else(|| ProtocolError::NotAnObject(value.to_string()))?;

        if let Some(error) = object.get("error") {
            let message = match error {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Ok(Self::Rejected(message));
        }

        if object.is_empty() {
            Ok(Self::Accepted)
        } else {
            Ok(Self::Unexpected)
        }
    }
}
