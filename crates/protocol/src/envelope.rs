use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MessageType;
use crate::error::ProtocolError;
use crate::framing::write_record;

/// Invocation envelope for calling a method on the other side.
///
/// `invocation_id` is only present when the caller awaits a completion;
/// fire-and-forget sends leave it out of the JSON entirely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationMessage {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub target: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl InvocationMessage {
    /// Creates a new invocation of `target`.
    pub fn new(
        invocation_id: Option<String>,
        target: impl Into<String>,
        arguments: Vec<Value>,
    ) -> Self {
        Self {
            msg_type: MessageType::Invocation,
            invocation_id,
            target: target.into(),
            arguments,
        }
    }

    /// Serializes the invocation as a terminated record.
    pub fn to_record(&self) -> Result<String, ProtocolError> {
        Ok(write_record(&serde_json::to_string(self)?))
    }
}

/// Reply to an invocation that carried an `invocationId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionMessage {
    pub invocation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Usually a string, but any JSON value is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

/// Server request to close the connection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CloseMessage {
    #[serde(default)]
    pub error: Option<String>,
}

/// A decoded inbound record.
#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    Invocation(InvocationMessage),
    StreamItem,
    Completion(CompletionMessage),
    StreamInvocation,
    CancelInvocation,
    Ping,
    Close(CloseMessage),
}

impl HubMessage {
    /// Returns the discriminant of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::Invocation(_) => MessageType::Invocation,
            Self::StreamItem => MessageType::StreamItem,
            Self::Completion(_) => MessageType::Completion,
            Self::StreamInvocation => MessageType::StreamInvocation,
            Self::CancelInvocation => MessageType::CancelInvocation,
            Self::Ping => MessageType::Ping,
            Self::Close(_) => MessageType::Close,
        }
    }

    /// Decodes one parsed record by its `type` field.
    pub fn from_value(value: &Value) -> Result<Self, ProtocolError> {
        let object = value
            .as_object()
            .ok_or_else(|| ProtocolError::NotAnObject(value.to_string()))?;
        let raw = object
            .get("type")
            .and_then(Value::as_i64)
            .ok_or(ProtocolError::MissingField("type"))?;
        let msg_type = u8::try_from(raw)
            .map_err(|_| ProtocolError::UnknownMessageType(raw))
            .and_then(MessageType::try_from)?;

        Ok(match msg_type {
            MessageType::Invocation => Self::Invocation(serde_json::from_value(value.clone())?),
            MessageType::StreamItem => Self::StreamItem,
            MessageType::Completion => Self::Completion(serde_json::from_value(value.clone())?),
            MessageType::StreamInvocation => Self::StreamInvocation,
            MessageType::CancelInvocation => Self::CancelInvocation,
            MessageType::Ping => Self::Ping,
            MessageType::Close => Self::Close(serde_json::from_value(value.clone())?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn invoke_envelope_carries_invocation_id() {
        let msg = InvocationMessage::new(Some("0".into()), "method", vec![json!("a"), json!(1)]);
        let record = msg.to_record().unwrap();
        assert_eq!(
            record,
            "{\"type\":1,\"invocationId\":\"0\",\"target\":\"method\",\"arguments\":[\"a\",1]}\u{1e}"
        );
    }

    #[test]
    fn send_envelope_omits_invocation_id() {
        let msg = InvocationMessage::new(None, "notify", vec![]);
        let record = msg.to_record().unwrap();
        assert!(!record.contains("invocationId"));
        assert!(record.ends_with('\u{1e}'));
    }

    #[test]
    fn decode_invocation() {
        let value = json!({"type": 1, "target": "Broadcast", "arguments": ["hi", 2]});
        match HubMessage::from_value(&value).unwrap() {
            HubMessage::Invocation(inv) => {
                assert_eq!(inv.target, "Broadcast");
                assert_eq!(inv.arguments, vec![json!("hi"), json!(2)]);
                assert!(inv.invocation_id.is_none());
            }
            other => panic!("expected invocation, got {other:?}"),
        }
    }

    #[test]
    fn decode_completion_with_result_and_error() {
        let value = json!({"type": 3, "invocationId": "7", "result": {"x": 1}});
        let HubMessage::Completion(done) = HubMessage::from_value(&value).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(done.invocation_id, "7");
        assert_eq!(done.result, Some(json!({"x": 1})));
        assert!(done.error.is_none());

        let value = json!({"type": 3, "invocationId": "8", "error": "boom"});
        let HubMessage::Completion(done) = HubMessage::from_value(&value).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(done.error, Some(json!("boom")));
    }

    #[test]
    fn decode_completion_with_structured_error() {
        let value = json!({"type": 3, "invocationId": "9", "error": {"code": 1}});
        let HubMessage::Completion(done) = HubMessage::from_value(&value).unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(done.invocation_id, "9");
        assert_eq!(done.error, Some(json!({"code": 1})));
    }

    #[test]
    fn decode_placeholder_types() {
        for (raw, expected) in [
            (2, MessageType::StreamItem),
            (4, MessageType::StreamInvocation),
            (5, MessageType::CancelInvocation),
            (6, MessageType::Ping),
            (7, MessageType::Close),
        ] {
            let msg = HubMessage::from_value(&json!({"type": raw})).unwrap();
            assert_eq!(msg.message_type(), expected);
        }
    }

    #[test]
    fn missing_type_is_an_error() {
        assert!(matches!(
            HubMessage::from_value(&json!({"target": "x"})),
            Err(ProtocolError::MissingField("type"))
        ));
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(matches!(
            HubMessage::from_value(&json!({"type": 42})),
            Err(ProtocolError::UnknownMessageType(42))
        ));
        assert!(matches!(
            HubMessage::from_value(&json!({"type": -1})),
            Err(ProtocolError::UnknownMessageType(-1))
        ));
    }

    #[test]
    fn completion_without_id_is_an_error() {
        assert!(matches!(
            HubMessage::from_value(&json!({"type": 3, "result": 1})),
            Err(ProtocolError::Json(_))
        ));
    }
}
