//! Negotiate endpoint response parsing and transport names.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Transport kinds a server may advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    WebSockets,
    ServerSentEvents,
    LongPolling,
}

impl TransportKind {
    /// Returns the name used on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WebSockets => "WebSockets",
            Self::ServerSentEvents => "ServerSentEvents",
            Self::LongPolling => "LongPolling",
        }
    }

    /// Parses a wire name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "WebSockets" => Some(Self::WebSockets),
            "ServerSentEvents" => Some(Self::ServerSentEvents),
            "LongPolling" => Some(Self::LongPolling),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame encoding requested from a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransferFormat {
    #[default]
    Text,
    Binary,
}

impl TransferFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Binary => "Binary",
        }
    }
}

/// One entry of `availableTransports`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

impl AvailableTransport {
    /// Returns the transport kind if the name is recognized.
    pub fn kind(&self) -> Option<TransportKind> {
        TransportKind::from_name(&self.transport)
    }

    pub fn supports_format(&self, format: TransferFormat) -> bool {
        self.transfer_formats.iter().any(|f| f == format.as_str())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNegotiation {
    #[serde(default)]
    connection_id: Option<String>,
    #[serde(default)]
    available_transports: Vec<AvailableTransport>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(rename = "ProtocolVersion", default)]
    protocol_version: Option<Value>,
}

/// Result of one negotiate round-trip.
///
/// When `error` is set every other field is meaningless. When `url` is set
/// the response is a redirect and must be followed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NegotiationResponse {
    pub connection_id: String,
    pub available_transports: Vec<AvailableTransport>,
    pub url: Option<String>,
    pub access_token: Option<String>,
    pub error: Option<String>,
}

impl NegotiationResponse {
    /// Parses a negotiate response body.
    pub fn parse(body: &str) -> Result<Self, ProtocolError> {
        let raw: RawNegotiation = serde_json::from_str(body)?;

        if raw.protocol_version.is_some() {
            return Err(ProtocolError::LegacyServer);
        }

        if let Some(error) = raw.error {
            return Ok(Self {
                error: Some(error),
                ..Self::default()
            });
        }

        if let Some(url) = raw.url {
            return Ok(Self {
                url: Some(url),
                access_token: raw.access_token,
                ..Self::default()
            });
        }

        Ok(Self {
            connection_id: raw.connection_id.unwrap_or_default(),
            available_transports: raw.available_transports,
            ..Self::default()
        })
    }

    /// Returns `true` if the response redirects to another endpoint.
    pub fn is_redirect(&self) -> bool {
        self.url.is_some()
    }

    /// Returns `true` if any advertised transport is of the given kind.
    pub fn supports(&self, kind: TransportKind) -> bool {
        self.available_transports
            .iter()
            .any(|t| t.kind() == Some(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_success_response() {
        let body = r#"{"connectionId":"abc","availableTransports":[{"transport":"WebSockets","transferFormats":["Text","Binary"]}]}"#;
        let resp = NegotiationResponse::parse(body).unwrap();
        assert_eq!(resp.connection_id, "abc");
        assert_eq!(resp.available_transports.len(), 1);
        assert!(resp.supports(TransportKind::WebSockets));
        assert!(resp.available_transports[0].supports_format(TransferFormat::Binary));
        assert!(!resp.is_redirect());
        assert!(resp.error.is_none());
    }

    #[test]
    fn parse_error_response() {
        let resp = NegotiationResponse::parse(r#"{"error":"bad negotiate"}"#).unwrap();
        assert_eq!(resp.error.as_deref(), Some("bad negotiate"));
        assert!(resp.connection_id.is_empty());
    }

    #[test]
    fn error_wins_over_other_fields() {
        let body = r#"{"error":"nope","connectionId":"abc","url":"http://x"}"#;
        let resp = NegotiationResponse::parse(body).unwrap();
        assert_eq!(resp.error.as_deref(), Some("nope"));
        assert!(resp.url.is_none());
        assert!(resp.connection_id.is_empty());
    }

    #[test]
    fn parse_redirect_response() {
        let body = r#"{"url":"http://redirected","accessToken":"secret"}"#;
        let resp = NegotiationResponse::parse(body).unwrap();
        assert!(resp.is_redirect());
        assert_eq!(resp.url.as_deref(), Some("http://redirected"));
        assert_eq!(resp.access_token.as_deref(), Some("secret"));
    }

    #[test]
    fn legacy_marker_is_always_an_error() {
        let body = r#"{"connectionId":"abc","ProtocolVersion":"1.5","availableTransports":[]}"#;
        assert!(matches!(
            NegotiationResponse::parse(body),
            Err(ProtocolError::LegacyServer)
        ));
        assert!(matches!(
            NegotiationResponse::parse(r#"{"error":"x","ProtocolVersion":"1.4"}"#),
            Err(ProtocolError::LegacyServer)
        ));
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            NegotiationResponse::parse("{not json"),
            Err(ProtocolError::Json(_))
        ));
    }

    #[test]
    fn server_sent_events_only_does_not_support_websockets() {
        let body = r#"{"connectionId":"a","availableTransports":[{"transport":"ServerSentEvents","transferFormats":["Text"]}]}"#;
        let resp = NegotiationResponse::parse(body).unwrap();
        assert!(!resp.supports(TransportKind::WebSockets));
        assert!(resp.supports(TransportKind::ServerSentEvents));
    }

    #[test]
    fn unknown_transport_names_are_ignored() {
        let body = r#"{"connectionId":"a","availableTransports":[{"transport":"Carrier Pigeon"}]}"#;
        let resp = NegotiationResponse::parse(body).unwrap();
        assert_eq!(resp.available_transports[0].kind(), None);
        assert!(!resp.supports(TransportKind::WebSockets));
    }
}
