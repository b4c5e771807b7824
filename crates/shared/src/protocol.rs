//! Hub wire protocol (JSON hub protocol, version 1).
//!
//! Every record on the socket is a JSON object terminated by
//! [`RECORD_SEPARATOR`]. The first record in each direction is the handshake;
//! after that records are hub messages discriminated by a numeric `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HubError;

/// Terminates every JSON record.
pub const RECORD_SEPARATOR: char = '\u{1e}';

/// Hub protocol name and version sent in the handshake.
pub const PROTOCOL_NAME: &str = "json";
pub const PROTOCOL_VERSION: u32 = 1;

const TYPE_INVOCATION: u8 = 1;
const TYPE_COMPLETION: u8 = 3;
const TYPE_PING: u8 = 6;
const TYPE_CLOSE: u8 = 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
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

/// Server answer to the handshake; `{}` on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Body returned by `POST {hub}/negotiate`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    #[serde(default)]
    pub connection_id: Option<String>,
    /// Present from negotiate version 1 on; preferred over the id in the socket URL.
    #[serde(default)]
    pub connection_token: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One hub protocol message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMessage", into = "RawMessage")]
pub enum HubMessage {
    /// Call a method on the other side. Without an id no completion is expected.
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    /// Result of an invocation that carried an id.
    Completion {
        invocation_id: String,
        result: Option<Value>,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Stream items, cancellations and future message types.
    Other(u8),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessage {
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    invocation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    allow_reconnect: Option<bool>,
}

impl TryFrom<RawMessage> for HubMessage {
    type Error = String;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        match raw.kind {
            TYPE_INVOCATION => Ok(HubMessage::Invocation {
                invocation_id: raw.invocation_id,
                target: raw.target.ok_or("invocation without target")?,
                arguments: raw.arguments.unwrap_or_default(),
            }),
            TYPE_COMPLETION => Ok(HubMessage::Completion {
                invocation_id: raw.invocation_id.ok_or("completion without invocationId")?,
                result: raw.result,
                error: raw.error,
            }),
            TYPE_PING => Ok(HubMessage::Ping),
            TYPE_CLOSE => Ok(HubMessage::Close {
                error: raw.error,
                allow_reconnect: raw.allow_reconnect.unwrap_or(false),
            }),
            other => Ok(HubMessage::Other(other)),
        }
    }
}

impl From<HubMessage> for RawMessage {
    fn from(message: HubMessage) -> Self {
        match message {
            HubMessage::Invocation {
                invocation_id,
                target,
                arguments,
            } => RawMessage {
                kind: TYPE_INVOCATION,
                invocation_id,
                target: Some(target),
                arguments: Some(arguments),
                ..Default::default()
            },
            HubMessage::Completion {
                invocation_id,
                result,
                error,
            } => RawMessage {
                kind: TYPE_COMPLETION,
                invocation_id: Some(invocation_id),
                result,
                error,
                ..Default::default()
            },
            HubMessage::Ping => RawMessage {
                kind: TYPE_PING,
                ..Default::default()
            },
            HubMessage::Close {
                error,
                allow_reconnect,
            } => RawMessage {
                kind: TYPE_CLOSE,
                error,
                allow_reconnect: Some(allow_reconnect),
                ..Default::default()
            },
            HubMessage::Other(kind) => RawMessage {
                kind,
                ..Default::default()
            },
        }
    }
}

/// Serialize a value as one terminated record.
pub fn encode_record<T: Serialize>(value: &T) -> Result<String, HubError> {
    let mut text = serde_json::to_string(value)?;
    text.push(RECORD_SEPARATOR);
    Ok(text)
}

/// Split a socket text frame into its records. A frame may hold several.
pub fn split_records(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split(RECORD_SEPARATOR)
        .filter(|record| !record.trim().is_empty())
}

impl HubMessage {
    pub fn decode(record: &str) -> Result<Self, HubError> {
        Ok(serde_json::from_str(record)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handshake_record_is_terminated() {
        let record = encode_record(&HandshakeRequest::default()).unwrap();
        assert_eq!(record, "{\"protocol\":\"json\",\"version\":1}\u{1e}");
    }

    #[test]
    fn invocation_wire_shape() {
        let message = HubMessage::Invocation {
            invocation_id: Some("3".into()),
            target: "JoinWorldChannel".into(),
            arguments: vec![json!("w-1")],
        };
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(
            value,
            json!({ "type": 1, "invocationId": "3", "target": "JoinWorldChannel", "arguments": ["w-1"] })
        );
    }

    #[test]
    fn frame_with_several_records() {
        let frame = "{\"type\":6}\u{1e}{\"type\":3,\"invocationId\":\"1\",\"result\":true}\u{1e}";
        let messages: Vec<_> = split_records(frame)
            .map(|record| HubMessage::decode(record).unwrap())
            .collect();

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], HubMessage::Ping);
        assert_eq!(
            messages[1],
            HubMessage::Completion {
                invocation_id: "1".into(),
                result: Some(json!(true)),
                error: None,
            }
        );
    }

    #[test]
    fn close_and_unknown_types() {
        let close = HubMessage::decode(r#"{"type":7,"error":"server shutting down","allowReconnect":true}"#)
            .unwrap();
        assert_eq!(
            close,
            HubMessage::Close {
                error: Some("server shutting down".into()),
                allow_reconnect: true,
            }
        );
        assert_eq!(
            HubMessage::decode(r#"{"type":2,"invocationId":"1","item":5}"#).unwrap(),
            HubMessage::Other(2)
        );
    }

    #[test]
    fn completion_without_id_is_a_protocol_error() {
        let err = HubMessage::decode(r#"{"type":3,"result":1}"#).unwrap_err();
        assert!(matches!(err, HubError::Protocol(_)));
    }
}
