//! Session model.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::ChatMessage;

/// One logical conversation on a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque identifier handed to the client.
    pub id: String,
    /// Ordered conversation history; starts with one system message.
    pub history: Vec<ChatMessage>,
    /// Working directory reported by the client, if any.
    pub cwd: Option<PathBuf>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create a session seeded with `system_prompt`.
    #[must_use]
    pub fn new(system_prompt: impl Into<String>, cwd: Option<PathBuf>) -> Self {
        Self {
            id: new_session_id(),
            history: vec![ChatMessage::system(system_prompt)],
            cwd,
            created_at: Utc::now(),
        }
    }
}

/// Generate a session id: 128 bits from the OS random source, hex-encoded.
#[must_use]
pub fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}
