//! Agent Client Protocol method names and payload types.
//!
//! Payload structs use camelCase field names on the wire. On a `snake_case`
//! connection profile the [`WireCodec`](crate::rpc::message::WireCodec)
//! renames the protocol's own fields at the edge, so these types never
//! change shape.

use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{AppError, Result};

/// Method names.
pub mod methods {
    /// Capability negotiation (client → agent).
    pub const INITIALIZE: &str = "initialize";
    /// Create a session (client → agent).
    pub const SESSION_NEW: &str = "session/new";
    /// Resume a persisted session (client → agent); always unsupported.
    pub const SESSION_LOAD: &str = "session/load";
    /// Run one prompt turn (client → agent).
    pub const SESSION_PROMPT: &str = "session/prompt";
    /// Interrupt the running prompt (client → agent).
    pub const SESSION_CANCEL: &str = "session/cancel";
    /// Short alias accepted for [`SESSION_CANCEL`].
    pub const CANCEL: &str = "cancel";
    /// Streamed progress (agent → client notification).
    pub const SESSION_UPDATE: &str = "session/update";
    /// Ask the user to pick a permission option (agent → client).
    pub const SESSION_REQUEST_PERMISSION: &str = "session/request_permission";
    /// Read a text file on the client (agent → client).
    pub const FS_READ_TEXT_FILE: &str = "fs/read_text_file";
    /// Write a text file on the client (agent → client).
    pub const FS_WRITE_TEXT_FILE: &str = "fs/write_text_file";
    /// Regex search on the client (agent → client extension).
    pub const FS_GREP_SEARCH: &str = "_fs/grep_search";
    /// Directory listing on the client (agent → client extension).
    pub const FS_LIST_DIRS: &str = "_fs/list_dirs";

    /// Whether `method` is a non-standard extension (leading `_`).
    #[must_use]
    pub fn is_extension(method: &str) -> bool {
        method.starts_with('_')
    }
}

/// Latest protocol version this crate speaks.
pub const PROTOCOL_VERSION: u16 = 1;

/// Deserialize method params, treating absent params as `{}`.
///
/// # Errors
///
/// Returns [`AppError::InvalidParams`] when the params do not match `T`.
pub fn parse_params<T: DeserializeOwned>(method: &str, params: Value) -> Result<T> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    serde_json::from_value(params)
        .map_err(|err| AppError::InvalidParams(format!("{method}: {err}")))
}

/// Serialize a result payload.
///
/// # Errors
///
/// Returns [`AppError::Io`] if serialization fails.
pub fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|err| AppError::Io(format!("failed to serialise payload: {err}")))
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

/// `initialize` params.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Version the client would like to speak.
    #[serde(default)]
    pub protocol_version: Option<u16>,
    /// Client capability flags; recorded, not interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_capabilities: Option<Value>,
}

/// Prompt content kinds the agent accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptCapabilities {
    /// Image blocks.
    pub image: bool,
    /// Audio blocks.
    pub audio: bool,
    /// Embedded resource blocks.
    pub embedded_context: bool,
}

/// Capabilities advertised by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentCapabilities {
    /// Whether `session/load` is available.
    pub load_session: bool,
    /// Accepted prompt content.
    pub prompt_capabilities: PromptCapabilities,
}

/// Name and version of an implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    pub version: String,
}

/// `initialize` result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Negotiated protocol version.
    pub protocol_version: u16,
    /// What the agent supports.
    pub agent_capabilities: AgentCapabilities,
    /// Authentication methods; empty because every client is accepted.
    #[serde(default)]
    pub auth_methods: Vec<Value>,
    /// Agent identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_info: Option<Implementation>,
}

/// `session/new` params.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionParams {
    /// Client working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// MCP servers offered by the client; not used by this agent.
    #[serde(default)]
    pub mcp_servers: Vec<Value>,
}

/// `session/new` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSessionResult {
    /// Id of the created session.
    pub session_id: String,
}

// ── Prompting ────────────────────────────────────────────────────────────────

/// One block of prompt content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Block kind; only `text` is accepted.
    #[serde(rename = "type")]
    pub kind: String,
    /// Text of a `text` block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl ContentBlock {
    /// A `text` block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".into(),
            text: Some(text.into()),
        }
    }
}

/// Prompt payload: a plain string or a list of content blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PromptInput {
    /// Plain text.
    Text(String),
    /// ACP content blocks.
    Blocks(Vec<ContentBlock>),
}

impl PromptInput {
    /// Flatten to plain text, joining text blocks with newlines.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidParams`] for non-text blocks or when no
    /// text remains.
    pub fn into_text(self) -> Result<String> {
        let text = match self {
            Self::Text(text) => text,
            Self::Blocks(blocks) => {
                let mut parts = Vec::with_capacity(blocks.len());
                for block in blocks {
                    match (block.kind.as_str(), block.text) {
                        ("text", Some(text)) => parts.push(text),
                        (kind, _) => {
                            return Err(AppError::InvalidParams(format!(
                                "unsupported prompt content block: {kind}"
                            )))
                        }
                    }
                }
                parts.join("\n")
            }
        };
        if text.trim().is_empty() {
            return Err(AppError::InvalidParams("prompt must not be empty".into()));
        }
        Ok(text)
    }
}

/// `session/prompt` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptParams {
    /// Target session.
    pub session_id: String,
    /// User input.
    pub prompt: PromptInput,
}

/// Why a prompt turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The loop terminated normally (including the turn-limit cutoff).
    Done,
    /// The model or a tool failed.
    Error,
    /// The client cancelled the turn.
    Cancelled,
}

/// `session/prompt` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptResult {
    /// Terminal status.
    pub stop_reason: StopReason,
}

/// `session/cancel` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelParams {
    /// Session whose prompt to cancel.
    pub session_id: String,
}

/// Kind of streamed update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// Assistant text.
    AgentMessageChunk,
    /// A tool is about to run.
    ToolCall,
    /// A tool finished.
    ToolCallResult,
    /// The turn failed.
    Error,
}

/// Streamed progress item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUpdate {
    /// Update kind.
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    /// Display text.
    pub content: String,
}

impl SessionUpdate {
    /// Build an update.
    #[must_use]
    pub fn new(kind: UpdateKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
        }
    }
}

/// `session/update` notification params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to.
    pub session_id: String,
    /// The update.
    pub update: SessionUpdate,
}

// ── Reverse calls ────────────────────────────────────────────────────────────

/// `fs/read_text_file` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadTextFileParams {
    /// Requesting session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// File path, absolute or relative to the client's working directory.
    pub path: String,
}

/// `fs/read_text_file` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadTextFileResult {
    /// File contents.
    pub content: String,
}

/// `fs/write_text_file` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteTextFileParams {
    /// Requesting session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// File path.
    pub path: String,
    /// New contents.
    pub content: String,
}

/// `_fs/grep_search` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepSearchParams {
    /// Requesting session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Regular expression.
    pub pattern: String,
    /// File or directory to search; defaults to the working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Match case exactly; defaults to `false`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    /// Glob matched against each file's base name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_pattern: Option<String>,
}

/// One grep hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepMatch {
    /// File containing the hit.
    pub path: String,
    /// 1-based line number.
    pub line_number: usize,
    /// The line, possibly shortened.
    pub line: String,
    /// Matched text.
    #[serde(rename = "match")]
    pub matched: String,
}

/// `_fs/grep_search` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepSearchResult {
    /// Hits, at most the configured cap.
    pub matches: Vec<GrepMatch>,
    /// Whether hits were dropped at the cap.
    pub truncated: bool,
    /// Hint shown when truncated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `_fs/list_dirs` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDirsParams {
    /// Requesting session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Directory to list.
    pub path: String,
    /// Descend into subdirectories.
    #[serde(default)]
    pub recursive: bool,
}

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirEntry {
    /// Full path.
    pub path: String,
    /// Base name.
    pub name: String,
    /// Whether the entry is a directory.
    pub is_dir: bool,
    /// Size in bytes.
    pub size: u64,
}

/// `_fs/list_dirs` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDirsResult {
    /// Entries, at most the configured cap.
    pub entries: Vec<DirEntry>,
    /// Number of returned entries.
    pub count: usize,
    /// Whether entries were dropped at the cap.
    #[serde(default)]
    pub truncated: bool,
}

/// One choice offered by `session/request_permission`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Option identifier echoed back when selected.
    pub option_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Option kind (e.g. `allow_once`).
    #[serde(default)]
    pub kind: String,
}

/// `session/request_permission` params.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionParams {
    /// Requesting session.
    pub session_id: String,
    /// Offered choices.
    #[serde(default)]
    pub options: Vec<PermissionOption>,
}
