//! Unit tests for the connection-scoped session store.

use std::path::PathBuf;

use acp_agent::agent::SessionStore;
use acp_agent::models::message::{AssistantMessage, ChatMessage};
use acp_agent::AppError;

/// New sessions hold exactly the system prompt.
#[test]
fn create_seeds_history_with_system_prompt() {
    let store = SessionStore::new();

    let id = store.create("be helpful", Some(PathBuf::from("/work")));

    assert_eq!(
        store.history(&id).expect("history"),
        vec![ChatMessage::system("be helpful")]
    );
    let session = store.get(&id).expect("session exists");
    assert_eq!(session.cwd, Some(PathBuf::from("/work")));
    assert_eq!(store.len(), 1);
}

/// Ids are unique 32-character hex strings.
#[test]
fn session_ids_are_unique_hex() {
    let store = SessionStore::new();

    let a = store.create("p", None);
    let b = store.create("p", None);

    assert_ne!(a, b);
    assert_eq!(a.len(), 32);
    assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
}

/// Unknown ids are reported as not found.
#[test]
fn unknown_session_is_not_found() {
    let store = SessionStore::new();

    assert!(matches!(store.history("nope"), Err(AppError::NotFound(_))));
    assert!(matches!(store.begin_prompt("nope"), Err(AppError::NotFound(_))));
    assert!(!store.contains("nope"));
    assert!(store.is_empty());
}

/// A second prompt is refused while the first holds the session.
#[test]
fn concurrent_prompt_is_rejected_as_busy() {
    let store = SessionStore::new();
    let id = store.create("p", None);

    let _history = store.begin_prompt(&id).expect("first prompt");

    assert!(store.is_busy(&id));
    assert!(matches!(store.begin_prompt(&id), Err(AppError::Busy(_))));
}

/// Finishing a prompt stores its history and releases the session.
#[test]
fn finish_prompt_commits_history_and_releases() {
    let store = SessionStore::new();
    let id = store.create("p", None);

    let mut history = store.begin_prompt(&id).expect("begin");
    history.push(ChatMessage::user("hi"));
    history.push(ChatMessage::Assistant(AssistantMessage::text("hello")));
    store.finish_prompt(&id, history.clone());

    assert!(!store.is_busy(&id));
    assert_eq!(store.history(&id).expect("history"), history);
    store.begin_prompt(&id).expect("session is free again");
}

/// The stored history is untouched until the prompt commits.
#[test]
fn history_is_isolated_while_prompt_runs() {
    let store = SessionStore::new();
    let id = store.create("p", None);

    let mut working = store.begin_prompt(&id).expect("begin");
    working.push(ChatMessage::user("draft"));

    assert_eq!(
        store.history(&id).expect("history"),
        vec![ChatMessage::system("p")]
    );
}
