//! Conversation messages and tool calls.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A structured request, embedded in an assistant message, to run a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier the matching tool result refers back to.
    pub id: String,
    /// Registered tool name.
    pub name: String,
    /// Parsed arguments.
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    /// Build a tool call from a JSON object literal.
    ///
    /// Non-object `arguments` are treated as empty.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Assistant turn returned by the language model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    /// Text content; may be empty when the turn only calls tools.
    #[serde(default)]
    pub content: String,
    /// Tool calls, in the order they must run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    /// A final, tool-free reply.
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    /// A reply that calls tools.
    #[must_use]
    pub fn with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: content.into(),
            tool_calls,
        }
    }

    /// Whether the loop must run tools before asking the model again.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Role of a [`ChatMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// Instructions seeded at session creation.
    System,
    /// Prompt text from the user.
    User,
    /// Model output.
    Assistant,
    /// Output of one tool call.
    ToolResult,
}

/// One entry of a session's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ChatMessage {
    /// System instructions.
    System {
        /// Instruction text.
        content: String,
    },
    /// User prompt.
    User {
        /// Prompt text.
        content: String,
    },
    /// Model output, possibly calling tools.
    Assistant(AssistantMessage),
    /// Result answering one tool call of the preceding assistant message.
    ToolResult {
        /// Id of the answered [`ToolCall`].
        tool_call_id: String,
        /// Name of the tool that ran.
        tool_name: String,
        /// Serialized tool output.
        payload: Value,
    },
}

impl ChatMessage {
    /// Build a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    /// Build a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    /// Build the result message for `call`.
    #[must_use]
    pub fn tool_result(call: &ToolCall, payload: Value) -> Self {
        Self::ToolResult {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            payload,
        }
    }

    /// Role of this message.
    #[must_use]
    pub fn role(&self) -> MessageRole {
        match self {
            Self::System { .. } => MessageRole::System,
            Self::User { .. } => MessageRole::User,
            Self::Assistant(_) => MessageRole::Assistant,
            Self::ToolResult { .. } => MessageRole::ToolResult,
        }
    }
}

/// Check that every assistant message's tool calls are answered, in order
/// and one-to-one, by the tool results immediately following it, and that no
/// tool result appears anywhere else.
#[must_use]
pub fn history_is_consistent(history: &[ChatMessage]) -> bool {
    let mut i = 0;
    while i < history.len() {
        match &history[i] {
            ChatMessage::ToolResult { .. } => return false,
            ChatMessage::Assistant(reply) => {
                for call in &reply.tool_calls {
                    i += 1;
                    match history.get(i) {
                        Some(ChatMessage::ToolResult { tool_call_id, .. })
                            if *tool_call_id == call.id => {}
                        _ => return false,
                    }
                }
            }
            ChatMessage::System { .. } | ChatMessage::User { .. } => {}
        }
        i += 1;
    }
    true
}
