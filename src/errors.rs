//! Error types shared across the application.

use std::fmt::{Display, Formatter};

use crate::rpc::message::{error_codes, RpcError};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Transport or file-system I/O failure.
    Io(String),
    /// Inbound line could not be decoded as a JSON-RPC envelope.
    Decode(String),
    /// Peer called a method this endpoint does not implement.
    UnknownMethod(String),
    /// Method params failed to deserialize or validate.
    InvalidParams(String),
    /// Request arrived in a connection state that does not accept it.
    Protocol(String),
    /// Operation is permanently unsupported (e.g. `session/load`).
    NotSupported(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Session already has a prompt in flight.
    Busy(String),
    /// Tool call named a tool absent from the registry.
    ToolNotFound(String),
    /// Tool handler failed.
    ToolExecution(String),
    /// Reverse request was not answered in time.
    Timeout(String),
    /// Connection closed while a reply was outstanding.
    ConnectionClosed(String),
    /// Peer answered a request with a JSON-RPC error object.
    Remote(RpcError),
    /// Language-model call failed.
    Llm(String),
    /// File system path failed validation against the workspace root.
    PathViolation(String),
    /// Work was cancelled before it completed.
    Cancelled(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::UnknownMethod(method) => write!(f, "method not found: {method}"),
            Self::InvalidParams(msg) => write!(f, "invalid params: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::NotSupported(msg) => write!(f, "not supported: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
            Self::ToolNotFound(name) => write!(f, "tool not found: {name}"),
            Self::ToolExecution(msg) => write!(f, "tool execution: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::ConnectionClosed(msg) => write!(f, "connection closed: {msg}"),
            Self::Remote(err) => write!(f, "remote error {}: {}", err.code, err.message),
            Self::Llm(msg) => write!(f, "llm: {msg}"),
            Self::PathViolation(msg) => write!(f, "path violation: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Map this error onto the JSON-RPC error object sent to the peer.
    ///
    /// Errors received from the peer are forwarded unchanged; everything
    /// else is assigned a code from [`error_codes`].
    #[must_use]
    pub fn to_rpc_error(&self) -> RpcError {
        let code = match self {
            Self::Remote(err) => return err.clone(),
            Self::Decode(_) => error_codes::PARSE_ERROR,
            Self::UnknownMethod(_) => error_codes::METHOD_NOT_FOUND,
            Self::InvalidParams(_) => error_codes::INVALID_PARAMS,
            Self::NotSupported(_) => error_codes::NOT_SUPPORTED,
            Self::Protocol(_) => error_codes::NOT_INITIALIZED,
            Self::Busy(_) => error_codes::BUSY,
            Self::NotFound(_) | Self::PathViolation(_) => error_codes::RESOURCE_NOT_FOUND,
            Self::Config(_) | Self::Io(_) => error_codes::INTERNAL_ERROR,
            Self::ToolNotFound(_)
            | Self::ToolExecution(_)
            | Self::Timeout(_)
            | Self::ConnectionClosed(_)
            | Self::Llm(_)
            | Self::Cancelled(_) => error_codes::SERVER_ERROR,
        };
        RpcError::new(code, self.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
