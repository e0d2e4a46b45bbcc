//! JSON-RPC 2.0 envelopes and the per-connection wire codec.
//!
//! Every inbound line is classified exactly once into a [`Message`]:
//!
//! | `method` | `id`    | Variant                    |
//! |----------|---------|----------------------------|
//! | present  | present | [`Message::Request`]       |
//! | present  | absent  | [`Message::Notification`]  |
//! | absent   | present | [`Message::Response`]      |
//!
//! Presence is decided on the key, not the value: `"id": null` next to a
//! `method` is still a request. A response carries exactly one of `result`
//! and `error`.
//!
//! Field-name casing of protocol fields inside `params` and `result` is a
//! property of the connection profile ([`FieldCasing`]), fixed when the
//! [`WireCodec`] is built. Handlers always see camelCase protocol keys;
//! opaque data (`error.data`, client capabilities, tool payloads) is
//! never rewritten.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{AppError, Result};

/// JSON-RPC protocol version string carried on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC error codes used by this crate.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32_700;
    /// The JSON sent is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32_600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32_601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32_602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i64 = -32_603;
    /// Generic server-side failure.
    pub const SERVER_ERROR: i64 = -32_000;
    /// The operation is permanently unsupported.
    pub const NOT_SUPPORTED: i64 = -32_001;
    /// The connection has not completed `initialize`.
    pub const NOT_INITIALIZED: i64 = -32_002;
    /// The session already has a prompt in flight.
    pub const BUSY: i64 = -32_003;
    /// The referenced resource does not exist.
    pub const RESOURCE_NOT_FOUND: i64 = -32_004;
}

/// Identifier correlating a request with its response.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    /// Integer id. Locally issued requests always use this form.
    Number(i64),
    /// String id chosen by the peer.
    Str(String),
    /// Explicit `null` id.
    Null,
}

impl RequestId {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::String(s) => Ok(Self::Str(s)),
            Value::Number(n) => n
                .as_i64()
                .map(Self::Number)
                .ok_or_else(|| AppError::Decode(format!("id must be an integer, got {n}"))),
            other => Err(AppError::Decode(format!(
                "id must be a number, string, or null, got {other}"
            ))),
        }
    }

    fn to_value(&self) -> Value {
        match self {
            Self::Number(n) => Value::from(*n),
            Self::Str(s) => Value::String(s.clone()),
            Self::Null => Value::Null,
        }
    }

    /// Integer form of the id, if it has one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Str(_) | Self::Null => None,
        }
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Null => f.write_str("null"),
        }
    }
}

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code (see [`error_codes`]).
    pub code: i64,
    /// Human-readable description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcError {
    /// Build an error object without `data`.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// `-32601` error for `method`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )
    }
}

/// A request issued by either side.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Correlation id.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters; `Value::Null` when absent.
    pub params: Value,
}

/// A one-way message with no id and no reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Method parameters; `Value::Null` when absent.
    pub params: Value,
}

/// A reply to an earlier request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Id of the request being answered.
    pub id: RequestId,
    /// Success payload or error object; never both.
    pub outcome: std::result::Result<Value, RpcError>,
}

/// Classified JSON-RPC envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Peer asks for work and expects a [`Response`].
    Request(Request),
    /// One-way message.
    Notification(Notification),
    /// Answer to a request.
    Response(Response),
}

impl Message {
    /// Build a request envelope.
    #[must_use]
    pub fn request(id: RequestId, method: impl Into<String>, params: Value) -> Self {
        Self::Request(Request {
            id,
            method: method.into(),
            params,
        })
    }

    /// Build a notification envelope.
    #[must_use]
    pub fn notification(method: impl Into<String>, params: Value) -> Self {
        Self::Notification(Notification {
            method: method.into(),
            params,
        })
    }

    /// Build a success response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self::Response(Response {
            id,
            outcome: Ok(result),
        })
    }

    /// Build an error response.
    #[must_use]
    pub fn error(id: RequestId, error: RpcError) -> Self {
        Self::Response(Response {
            id,
            outcome: Err(error),
        })
    }
}

/// Key casing used for payload fields on one connection profile.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum FieldCasing {
    /// `sessionId`, `protocolVersion` (ACP default).
    #[default]
    Camel,
    /// `session_id`, `protocol_version`.
    Snake,
}

/// Encoder/decoder for one connection's JSON-RPC envelopes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec {
    casing: FieldCasing,
}

impl WireCodec {
    /// Create a codec for the given casing profile.
    #[must_use]
    pub fn new(casing: FieldCasing) -> Self {
        Self { casing }
    }

    /// Casing profile this codec was built with.
    #[must_use]
    pub fn casing(&self) -> FieldCasing {
        self.casing
    }

    /// Serialize `message` as a single-line JSON string (no trailing newline).
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if serialization fails.
    pub fn encode(&self, message: &Message) -> Result<String> {
        let mut obj = Map::new();
        obj.insert("jsonrpc".into(), Value::from(JSONRPC_VERSION));
        match message {
            Message::Request(req) => {
                obj.insert("id".into(), req.id.to_value());
                obj.insert("method".into(), Value::from(req.method.as_str()));
                if !req.params.is_null() {
                    obj.insert("params".into(), self.outgoing(req.params.clone()));
                }
            }
            Message::Notification(note) => {
                obj.insert("method".into(), Value::from(note.method.as_str()));
                if !note.params.is_null() {
                    obj.insert("params".into(), self.outgoing(note.params.clone()));
                }
            }
            Message::Response(resp) => {
                obj.insert("id".into(), resp.id.to_value());
                match &resp.outcome {
                    Ok(result) => {
                        obj.insert("result".into(), self.outgoing(result.clone()));
                    }
                    Err(err) => {
                        let err = serde_json::to_value(err).map_err(|e| {
                            AppError::Io(format!("failed to serialise error object: {e}"))
                        })?;
                        obj.insert("error".into(), err);
                    }
                }
            }
        }
        serde_json::to_string(&Value::Object(obj))
            .map_err(|e| AppError::Io(format!("failed to serialise outbound message: {e}")))
    }

    /// Parse and classify one line.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Decode`] when the line is not JSON, not an object,
    /// carries a wrong `jsonrpc` version, or matches no envelope shape.
    pub fn decode(&self, line: &str) -> Result<Message> {
        let value: Value = serde_json::from_str(line)
            .map_err(|e| AppError::Decode(format!("malformed json: {e}")))?;
        let Value::Object(mut obj) = value else {
            return Err(AppError::Decode("envelope must be a JSON object".into()));
        };

        match obj.remove("jsonrpc") {
            None => {}
            Some(Value::String(v)) if v == JSONRPC_VERSION => {}
            Some(other) => {
                return Err(AppError::Decode(format!(
                    "unsupported jsonrpc version: {other}"
                )))
            }
        }

        let id = obj.remove("id").map(RequestId::from_value).transpose()?;
        let method = match obj.remove("method") {
            None => None,
            Some(Value::String(m)) => Some(m),
            Some(other) => {
                return Err(AppError::Decode(format!("method must be a string, got {other}")))
            }
        };
        let params = obj.remove("params").map_or(Value::Null, |p| self.incoming(p));

        match (method, id) {
            (Some(method), Some(id)) => Ok(Message::Request(Request { id, method, params })),
            (Some(method), None) => Ok(Message::Notification(Notification { method, params })),
            (None, Some(id)) => {
                let outcome = match (obj.remove("result"), obj.remove("error")) {
                    (Some(result), None) => Ok(self.incoming(result)),
                    (None, Some(error)) => {
                        let error: RpcError = serde_json::from_value(error)
                            .map_err(|e| AppError::Decode(format!("malformed error object: {e}")))?;
                        Err(error)
                    }
                    (Some(_), Some(_)) => {
                        return Err(AppError::Decode(
                            "response carries both result and error".into(),
                        ))
                    }
                    (None, None) => {
                        return Err(AppError::Decode(
                            "response carries neither result nor error".into(),
                        ))
                    }
                };
                Ok(Message::Response(Response { id, outcome }))
            }
            (None, None) => Err(AppError::Decode(
                "envelope has neither method nor id".into(),
            )),
        }
    }

    fn outgoing(&self, value: Value) -> Value {
        match self.casing {
            FieldCasing::Camel => value,
            FieldCasing::Snake => rename_fields(value, |key| {
                PROTOCOL_FIELDS
                    .iter()
                    .find(|(camel, _)| *camel == key)
                    .map(|(_, snake)| *snake)
            }),
        }
    }

    fn incoming(&self, value: Value) -> Value {
        match self.casing {
            FieldCasing::Camel => value,
            FieldCasing::Snake => rename_fields(value, |key| {
                PROTOCOL_FIELDS
                    .iter()
                    .find(|(_, snake)| *snake == key)
                    .map(|(camel, _)| *camel)
            }),
        }
    }
}

/// Multi-word protocol field names as `(camelCase, snake_case)`.
///
/// Only these keys change under [`FieldCasing::Snake`]; any other key is
/// left as sent, so both directions are exact inverses.
const PROTOCOL_FIELDS: &[(&str, &str)] = &[
    ("agentCapabilities", "agent_capabilities"),
    ("agentInfo", "agent_info"),
    ("authMethods", "auth_methods"),
    ("caseSensitive", "case_sensitive"),
    ("clientCapabilities", "client_capabilities"),
    ("embeddedContext", "embedded_context"),
    ("filePattern", "file_pattern"),
    ("isDir", "is_dir"),
    ("lineNumber", "line_number"),
    ("loadSession", "load_session"),
    ("mcpServers", "mcp_servers"),
    ("optionId", "option_id"),
    ("promptCapabilities", "prompt_capabilities"),
    ("protocolVersion", "protocol_version"),
    ("sessionId", "session_id"),
    ("stopReason", "stop_reason"),
];

/// Fields whose value is a protocol object (or array of them) and is
/// renamed in turn. Every other value, such as client capabilities, MCP
/// server descriptions, or tool payloads, is opaque and passed through.
const NESTED_FIELDS: &[&str] = &[
    "agentCapabilities",
    "agent_capabilities",
    "agentInfo",
    "agent_info",
    "entries",
    "matches",
    "options",
    "outcome",
    "prompt",
    "promptCapabilities",
    "prompt_capabilities",
    "update",
];

/// Rename the protocol fields of a `params` or `result` payload.
fn rename_fields(value: Value, rename: impl Fn(&str) -> Option<&'static str> + Copy) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(key, field)| {
                    let field = if NESTED_FIELDS.contains(&key.as_str()) {
                        rename_fields(field, rename)
                    } else {
                        field
                    };
                    let key = rename(key.as_str()).map_or(key, str::to_owned);
                    (key, field)
                })
                .collect(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|item| rename_fields(item, rename)).collect())
        }
        other => other,
    }
}
