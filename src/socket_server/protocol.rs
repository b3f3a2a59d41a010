//! Socket server protocol message types
//!
//! Every message in either direction is an envelope `{id, name, data}`:
//!
//! ```json
//! // Client -> Server
//! {"id": "x", "name": "calc add", "data": {"a": 3, "b": 2}}
//! {"id": "<channel id>", "name": "channel", "data": {"name": "close"}}
//!
//! // Server -> Client
//! {"id": "x", "name": "result", "data": {"data": 5}}
//! {"id": "y", "name": "result", "data": {"channel": "<channel id>"}}
//! {"id": "<channel id>", "name": "channel", "data": {"name": "update", "data": 1}}
//! {"id": "x", "name": "error", "data": {"code": 400, "message": "..."}}
//! ```
//!
//! Forwarded channel events and client `channel` messages are addressed by the
//! channel id from the `{"channel": ...}` result, not by the id of the call that
//! opened the channel. The two coincide only when the producer names its channel
//! after `Params::request_id`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::ResultEncoding;
use crate::error::RpcError;

/// Reply name for a completed call
pub const RESULT: &str = "result";
/// Reply name for a failed call
pub const ERROR: &str = "error";
/// Request name for channel control, and reply name for forwarded channel events
pub const CHANNEL: &str = "channel";
/// Channel control event that detaches one subscriber
pub const CLOSE: &str = "close";

/// Envelope as received, before validation
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub data: Value,
}

/// Envelope as sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Result of a call that produced a plain value
    pub fn result(id: &str, value: Value, encoding: ResultEncoding) -> Self {
        let data = match encoding {
            ResultEncoding::Wrapped => json!({ "data": value }),
            ResultEncoding::Bare => value,
        };
        Self {
            id: Some(id.to_string()),
            name: RESULT.to_string(),
            data,
        }
    }

    /// Result of a call that opened a channel
    pub fn channel_opened(id: &str, channel_id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: RESULT.to_string(),
            data: json!({ "channel": channel_id }),
        }
    }

    /// An event forwarded from an open channel
    pub fn channel_event(channel_id: &str, event: &str, data: Value) -> Self {
        Self {
            id: Some(channel_id.to_string()),
            name: CHANNEL.to_string(),
            data: json!({ "name": event, "data": data }),
        }
    }

    /// An error reply. Diagnostic detail is logged and stripped here.
    pub fn error(id: Option<&str>, err: &RpcError) -> Self {
        Self {
            id: id.map(str::to_string),
            name: ERROR.to_string(),
            data: serde_json::to_value(err.to_wire()).unwrap_or(Value::Null),
        }
    }
}

/// `data` of a `channel` control request
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelControl {
    pub name: String,
    #[serde(default)]
    pub data: Value,
}

/// A validated request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// `"<service> <method>"`
    Call {
        id: String,
        service: String,
        method: String,
        data: Value,
    },
    /// `"channel"`, addressed to the channel registered under `id`
    Channel { id: String, control: ChannelControl },
}

/// Why an envelope could not become a [`Request`]. `id` is set when the envelope had one.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub id: Option<String>,
    pub error: RpcError,
}

impl Request {
    /// Validate an envelope and classify it by name
    pub fn parse(envelope: IncomingEnvelope) -> Result<Request, Rejection> {
        let (id, name) = match (envelope.id, envelope.name) {
            (Some(id), Some(name)) if !id.is_empty() && !name.is_empty() => (id, name),
            _ => {
                return Err(Rejection {
                    id: None,
                    error: RpcError::bad_request("Invalid message. A name and ID are required."),
                })
            }
        };

        if name == CHANNEL {
            return match serde_json::from_value::<ChannelControl>(envelope.data) {
                Ok(control) => Ok(Request::Channel { id, control }),
                Err(e) => Err(Rejection {
                    id: Some(id),
                    error: RpcError::bad_request(format!("Invalid channel message: {}", e)),
                }),
            };
        }

        match name.split_once(' ') {
            Some((service, method)) if !service.is_empty() && !method.is_empty() => {
                Ok(Request::Call {
                    id,
                    service: service.to_string(),
                    method: method.to_string(),
                    data: envelope.data,
                })
            }
            _ => Err(Rejection {
                id: Some(id),
                error: RpcError::bad_request(format!(
                    "Invalid name \"{}\". Correct format is \"<service> <method>\"",
                    name
                )),
            }),
        }
    }
}

/// Converts between wire text and envelopes
pub trait Codec: Send + Sync + 'static {
    fn decode(&self, raw: &str) -> Result<IncomingEnvelope, RpcError>;
    fn encode(&self, envelope: &Envelope) -> Result<String, RpcError>;
}

/// JSON codec
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode(&self, raw: &str) -> Result<IncomingEnvelope, RpcError> {
        serde_json::from_str(raw)
            .map_err(|_| RpcError::bad_request("Could not parse message data"))
    }

    fn encode(&self, envelope: &Envelope) -> Result<String, RpcError> {
        serde_json::to_string(envelope).map_err(|e| RpcError::internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<Request, Rejection> {
        Request::parse(JsonCodec.decode(raw).unwrap())
    }

    #[test]
    fn test_parse_call() {
        let req = parse(r#"{"id":"x","name":"calc add","data":{"a":3,"b":2}}"#).unwrap();
        assert_eq!(
            req,
            Request::Call {
                id: "x".to_string(),
                service: "calc".to_string(),
                method: "add".to_string(),
                data: json!({"a": 3, "b": 2}),
            }
        );
    }

    #[test]
    fn test_method_is_everything_after_first_space() {
        match parse(r#"{"id":"x","name":"store find by name"}"#).unwrap() {
            Request::Call { service, method, data, .. } => {
                assert_eq!(service, "store");
                assert_eq!(method, "find by name");
                assert_eq!(data, Value::Null);
            }
            other => panic!("Expected Call, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_channel_control() {
        let req = parse(r#"{"id":"c1","name":"channel","data":{"name":"close"}}"#).unwrap();
        assert_eq!(
            req,
            Request::Channel {
                id: "c1".to_string(),
                control: ChannelControl {
                    name: CLOSE.to_string(),
                    data: Value::Null
                },
            }
        );
    }

    #[test]
    fn test_missing_id_or_name() {
        for raw in [r#"{"name":"calc add"}"#, r#"{"id":"x"}"#, r#"{"id":"","name":"a b"}"#] {
            let rejection = parse(raw).unwrap_err();
            assert_eq!(rejection.id, None);
            assert_eq!(rejection.error.code, 400);
        }
    }

    #[test]
    fn test_malformed_name() {
        let rejection = parse(r#"{"id":"x","name":"calc"}"#).unwrap_err();
        assert_eq!(rejection.id.as_deref(), Some("x"));
        assert!(rejection.error.message.contains("<service> <method>"));
    }

    #[test]
    fn test_decode_failure() {
        let err = JsonCodec.decode("not json").unwrap_err();
        assert_eq!(err.code, 400);
        assert!(JsonCodec.decode(r#"{"id": 5, "name": "a b"}"#).is_err());
    }

    #[test]
    fn test_result_encodings() {
        let wrapped = Envelope::result("x", json!(5), ResultEncoding::Wrapped);
        assert_eq!(
            serde_json::to_value(&wrapped).unwrap(),
            json!({"id": "x", "name": "result", "data": {"data": 5}})
        );

        let bare = Envelope::result("x", json!(5), ResultEncoding::Bare);
        assert_eq!(bare.data, json!(5));
    }

    #[test]
    fn test_error_without_id_omits_field() {
        let env = Envelope::error(None, &RpcError::bad_request("Could not parse message data"));
        let text = JsonCodec.encode(&env).unwrap();
        assert!(!text.contains("\"id\""));
        assert!(text.contains("\"code\":400"));
    }
}
