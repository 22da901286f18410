//! Envelope schema and codec.
//!
//! Every frame on the wire is one JSON object discriminated by its `kind`
//! field. The `version` field must equal [`PROTOCOL_VERSION`] on every
//! envelope; anything else is rejected at decode time.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::constants::PROTOCOL_VERSION;
use crate::types::PeerId;

/// Correlation id on request/response envelopes.
///
/// Clients may use numbers or strings; broker-assigned ids are strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum MessageId {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageId::Number(n) => write!(f, "{n}"),
            MessageId::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Envelope {
    /// RPC addressed to the room host
    Request {
        version: String,
        id: MessageId,
        method: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        params: Vec<Value>,
    },

    /// Success reply correlated by `id`
    Response {
        version: String,
        id: MessageId,
        response: Value,
    },

    /// Error reply correlated by `id`
    ResponseError {
        version: String,
        id: MessageId,
        message: String,
    },

    /// Fire-and-forget to the room host
    Notification {
        version: String,
        method: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        params: Vec<Value>,
    },

    /// Fan-out to every room peer except the origin
    Broadcast {
        version: String,
        #[serde(rename = "clientId")]
        client_id: PeerId,
        method: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        params: Vec<Value>,
    },

    /// Unsolicited broker-originated error
    Error { version: String, message: String },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported protocol version: {0}")]
    VersionMismatch(String),
}

impl Envelope {
    pub fn request(id: MessageId, method: impl Into<String>, params: Vec<Value>) -> Self {
        Envelope::Request {
            version: PROTOCOL_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    pub fn response(id: MessageId, response: Value) -> Self {
        Envelope::Response {
            version: PROTOCOL_VERSION.to_string(),
            id,
            response,
        }
    }

    pub fn response_error(id: MessageId, message: impl Into<String>) -> Self {
        Envelope::ResponseError {
            version: PROTOCOL_VERSION.to_string(),
            id,
            message: message.into(),
        }
    }

    pub fn notification(method: impl Into<String>, params: Vec<Value>) -> Self {
        Envelope::Notification {
            version: PROTOCOL_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }

    pub fn broadcast(client_id: PeerId, method: impl Into<String>, params: Vec<Value>) -> Self {
        Envelope::Broadcast {
            version: PROTOCOL_VERSION.to_string(),
            client_id,
            method: method.into(),
            params,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Envelope::Error {
            version: PROTOCOL_VERSION.to_string(),
            message: message.into(),
        }
    }

    pub fn version(&self) -> &str {
        match self {
            Envelope::Request { version, .. }
            | Envelope::Response { version, .. }
            | Envelope::ResponseError { version, .. }
            | Envelope::Notification { version, .. }
            | Envelope::Broadcast { version, .. }
            | Envelope::Error { version, .. } => version,
        }
    }

    /// Serialize to one JSON frame.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse one JSON frame, rejecting unknown kinds, missing fields,
    /// and foreign protocol versions.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_slice(bytes)?;
        if envelope.version() != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch(envelope.version().to_string()));
        }
        Ok(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_roundtrip() {
        let env = Envelope::request(
            MessageId::Text("abc".into()),
            "peer/init",
            vec![json!({"protocol": "0.1.0"})],
        );
        let bytes = env.encode().unwrap();
        let restored = Envelope::decode(&bytes).unwrap();
        assert_eq!(env, restored);
    }

    #[test]
    fn test_kind_discriminants() {
        let env = Envelope::response_error(MessageId::Number(7), "boom");
        let json = String::from_utf8(env.encode().unwrap()).unwrap();
        assert!(json.contains("\"kind\":\"response-error\""));

        let env = Envelope::broadcast(PeerId::random(), "editor/update", vec![]);
        let json = String::from_utf8(env.encode().unwrap()).unwrap();
        assert!(json.contains("\"kind\":\"broadcast\""));
        assert!(json.contains("\"clientId\""));
    }

    #[test]
    fn test_numeric_and_string_ids() {
        let raw = format!(
            r#"{{"kind":"response","version":"{PROTOCOL_VERSION}","id":42,"response":null}}"#
        );
        match Envelope::decode(raw.as_bytes()).unwrap() {
            Envelope::Response { id, .. } => assert_eq!(id, MessageId::Number(42)),
            other => panic!("unexpected envelope: {other:?}"),
        }

        let raw = format!(
            r#"{{"kind":"response","version":"{PROTOCOL_VERSION}","id":"r1","response":true}}"#
        );
        match Envelope::decode(raw.as_bytes()).unwrap() {
            Envelope::Response { id, .. } => assert_eq!(id, MessageId::Text("r1".into())),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let raw = format!(r#"{{"kind":"telemetry","version":"{PROTOCOL_VERSION}"}}"#);
        assert!(matches!(
            Envelope::decode(raw.as_bytes()),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn test_missing_method_rejected() {
        let raw = format!(r#"{{"kind":"notification","version":"{PROTOCOL_VERSION}"}}"#);
        assert!(Envelope::decode(raw.as_bytes()).is_err());
    }

    #[test]
    fn test_foreign_version_rejected() {
        let raw = r#"{"kind":"error","version":"9.9.9","message":"hi"}"#;
        assert!(matches!(
            Envelope::decode(raw.as_bytes()),
            Err(ProtocolError::VersionMismatch(v)) if v == "9.9.9"
        ));
    }

    #[test]
    fn test_params_default_to_empty() {
        let raw = format!(
            r#"{{"kind":"request","version":"{PROTOCOL_VERSION}","id":"x","method":"peer/init"}}"#
        );
        match Envelope::decode(raw.as_bytes()).unwrap() {
            Envelope::Request { params, .. } => assert!(params.is_empty()),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
