//! Connection-scoped session store.
//!
//! Sessions live as long as the connection that created them. A prompt
//! checks the history out with [`SessionStore::begin_prompt`], works on its
//! own copy, and commits it back with [`SessionStore::finish_prompt`]; while
//! checked out the session rejects further prompts as busy.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::models::message::ChatMessage;
use crate::models::session::Session;
use crate::{AppError, Result};

#[derive(Debug)]
struct Entry {
    session: Session,
    busy: bool,
}

/// Map of session id to conversation history.
#[derive(Debug, Default)]
pub struct SessionStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl SessionStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a session seeded with `system_prompt` and return its id.
    pub fn create(&self, system_prompt: impl Into<String>, cwd: Option<PathBuf>) -> String {
        let session = Session::new(system_prompt, cwd);
        let id = session.id.clone();
        debug!(session_id = %id, "session created");
        self.entries().insert(
            id.clone(),
            Entry {
                session,
                busy: false,
            },
        );
        id
    }

    /// Snapshot of a session.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Session> {
        self.entries().get(id).map(|entry| entry.session.clone())
    }

    /// Snapshot of a session's history.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for unknown ids.
    pub fn history(&self, id: &str) -> Result<Vec<ChatMessage>> {
        self.entries()
            .get(id)
            .map(|entry| entry.session.history.clone())
            .ok_or_else(|| not_found(id))
    }

    /// Mark the session busy and hand out a copy of its history.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] for unknown ids and
    /// [`AppError::Busy`] while another prompt holds the session.
    pub fn begin_prompt(&self, id: &str) -> Result<Vec<ChatMessage>> {
        let mut entries = self.entries();
        let entry = entries.get_mut(id).ok_or_else(|| not_found(id))?;
        if entry.busy {
            return Err(AppError::Busy(format!(
                "session {id} already has a prompt in progress"
            )));
        }
        entry.busy = true;
        Ok(entry.session.history.clone())
    }

    /// Store `history` as the session's history and release it.
    ///
    /// Unknown ids are ignored.
    pub fn finish_prompt(&self, id: &str, history: Vec<ChatMessage>) {
        if let Some(entry) = self.entries().get_mut(id) {
            entry.session.history = history;
            entry.busy = false;
        }
    }

    /// Whether a prompt currently holds the session.
    #[must_use]
    pub fn is_busy(&self, id: &str) -> bool {
        self.entries().get(id).is_some_and(|entry| entry.busy)
    }

    /// Whether `id` names a session in this store.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    /// Number of sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether the store holds no sessions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

fn not_found(id: &str) -> AppError {
    AppError::NotFound(format!("session {id}"))
}
