//! Unit tests for the agent loop, driven by the scripted model.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use acp_agent::agent::{AgentLoop, TurnOutcome, UpdateSink};
use acp_agent::llm::ScriptedModel;
use acp_agent::models::message::{history_is_consistent, AssistantMessage, ChatMessage, ToolCall};
use acp_agent::protocol::{SessionUpdate, UpdateKind};
use acp_agent::rpc::correlator::PeerRequest;
use acp_agent::tools::ToolRegistry;
use acp_agent::{AppError, Result};

/// Answers `fs/read_text_file` with fixed content and records every call.
#[derive(Default)]
struct FakeClient {
    calls: Mutex<Vec<String>>,
}

impl PeerRequest for FakeClient {
    fn request<'a>(
        &'a self,
        method: &'a str,
        params: Value,
    ) -> Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>> {
        self.calls.lock().expect("calls lock").push(method.to_owned());
        Box::pin(async move {
            match method {
                "fs/read_text_file" => Ok(json!({ "content": format!("contents of {}", params["path"]) })),
                _ => Ok(Value::Null),
            }
        })
    }
}

/// Collects updates in arrival order.
#[derive(Default)]
struct Recorder {
    updates: Mutex<Vec<SessionUpdate>>,
}

impl Recorder {
    fn kinds(&self) -> Vec<UpdateKind> {
        self.updates
            .lock()
            .expect("updates lock")
            .iter()
            .map(|u| u.kind)
            .collect()
    }

    fn contents(&self) -> Vec<String> {
        self.updates
            .lock()
            .expect("updates lock")
            .iter()
            .map(|u| u.content.clone())
            .collect()
    }
}

impl UpdateSink for Recorder {
    fn send<'a>(&'a self, update: SessionUpdate) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        self.updates.lock().expect("updates lock").push(update);
        Box::pin(async {})
    }
}

fn seeded_history(prompt: &str) -> Vec<ChatMessage> {
    vec![ChatMessage::system("sys"), ChatMessage::user(prompt)]
}

fn read_call(id: &str, path: &str) -> ToolCall {
    ToolCall::new(id, "read_file", json!({ "path": path }))
}

// ── Final answers ───────────────────────────────────────────────────────────

/// A reply without tools streams one chunk and ends the prompt.
#[tokio::test]
async fn reply_without_tools_completes_in_one_call() {
    let registry = ToolRegistry::with_builtin_tools();
    let model = ScriptedModel::new([AssistantMessage::text("hello there")]);
    let client = FakeClient::default();
    let updates = Recorder::default();
    let mut history = seeded_history("hi");

    let outcome = AgentLoop::new(&registry, &model, 10)
        .run("s1", &mut history, &client, &updates, &CancellationToken::new())
        .await
        .expect("loop succeeds");

    assert_eq!(
        outcome,
        TurnOutcome::Completed {
            text: "hello there".into(),
            turns: 0,
            hit_limit: false,
        }
    );
    assert_eq!(updates.kinds(), vec![UpdateKind::AgentMessageChunk]);
    assert_eq!(history.len(), 3);
    assert_eq!(
        history[2],
        ChatMessage::Assistant(AssistantMessage::text("hello there"))
    );
    assert_eq!(model.calls(), 1);
}

// ── Tool calls ──────────────────────────────────────────────────────────────

/// Tool calls run in declaration order and their results follow the
/// assistant message that requested them.
#[tokio::test]
async fn tool_calls_run_in_order_and_results_follow_request() {
    let registry = ToolRegistry::with_builtin_tools();
    let model = ScriptedModel::new([
        AssistantMessage::with_tool_calls(
            "",
            vec![read_call("c1", "a.txt"), read_call("c2", "b.txt")],
        ),
        AssistantMessage::text("both read"),
    ]);
    let client = FakeClient::default();
    let updates = Recorder::default();
    let mut history = seeded_history("read a and b");

    let outcome = AgentLoop::new(&registry, &model, 10)
        .run("s1", &mut history, &client, &updates, &CancellationToken::new())
        .await
        .expect("loop succeeds");

    assert!(matches!(outcome, TurnOutcome::Completed { turns: 1, .. }));
    assert_eq!(
        updates.kinds(),
        vec![
            UpdateKind::ToolCall,
            UpdateKind::ToolCallResult,
            UpdateKind::ToolCall,
            UpdateKind::ToolCallResult,
            UpdateKind::AgentMessageChunk,
        ]
    );
    assert_eq!(updates.contents()[0], r#"read_file({"path":"a.txt"})"#);
    assert!(updates.contents()[1].starts_with("read_file: "));

    let roles: Vec<_> = history.iter().map(ChatMessage::role).collect();
    assert_eq!(roles.len(), 6, "system, user, assistant, 2 results, assistant");
    let ChatMessage::ToolResult { tool_call_id, payload, .. } = &history[3] else {
        panic!("expected the first tool result at index 3");
    };
    assert_eq!(tool_call_id, "c1");
    assert_eq!(payload["content"], r#"contents of "a.txt""#);
    assert!(history_is_consistent(&history));

    // The second model call sees both results.
    let second = &model.histories()[1];
    assert_eq!(second.len(), 5);
    assert_eq!(
        *client.calls.lock().expect("calls lock"),
        vec!["fs/read_text_file".to_owned(), "fs/read_text_file".to_owned()]
    );
}

/// The loop stops after `max_turns` tool-calling turns and never asks the
/// model an extra time.
#[tokio::test]
async fn turn_limit_stops_loop_with_fallback_text() {
    let registry = ToolRegistry::with_builtin_tools();
    let model = ScriptedModel::repeating(AssistantMessage::with_tool_calls(
        "",
        vec![ToolCall::new("w", "get_weather", json!({ "location": "Oslo" }))],
    ));
    let client = FakeClient::default();
    let updates = Recorder::default();
    let mut history = seeded_history("loop forever");

    let outcome = AgentLoop::new(&registry, &model, 10)
        .run("s1", &mut history, &client, &updates, &CancellationToken::new())
        .await
        .expect("loop succeeds");

    assert_eq!(model.calls(), 10, "exactly max_turns model calls");
    let TurnOutcome::Completed { text, turns, hit_limit } = outcome else {
        panic!("expected completion, got {outcome:?}");
    };
    assert!(hit_limit);
    assert_eq!(turns, 10);
    assert_eq!(
        text,
        "Stopped after 10 tool-calling turns without a final answer."
    );
    assert_eq!(updates.kinds().last(), Some(&UpdateKind::AgentMessageChunk));
    assert!(history_is_consistent(&history));
}

/// At the limit the last streamed text is kept instead of the fallback.
#[tokio::test]
async fn turn_limit_keeps_last_model_text() {
    let registry = ToolRegistry::with_builtin_tools();
    let model = ScriptedModel::repeating(AssistantMessage::with_tool_calls(
        "checking again",
        vec![ToolCall::new("w", "get_weather", json!({ "location": "Oslo" }))],
    ));
    let client = FakeClient::default();
    let updates = Recorder::default();
    let mut history = seeded_history("weather?");

    let outcome = AgentLoop::new(&registry, &model, 2)
        .run("s1", &mut history, &client, &updates, &CancellationToken::new())
        .await
        .expect("loop succeeds");

    assert_eq!(model.calls(), 2);
    assert!(matches!(
        outcome,
        TurnOutcome::Completed { ref text, hit_limit: true, .. } if text == "checking again"
    ));
}

// ── Failures ────────────────────────────────────────────────────────────────

/// A failing tool ends the prompt and leaves no unanswered tool call behind.
#[tokio::test]
async fn tool_failure_is_fatal_and_history_stays_consistent() {
    let registry = ToolRegistry::with_builtin_tools();
    let model = ScriptedModel::new([AssistantMessage::with_tool_calls(
        "",
        vec![ToolCall::new("x", "no_such_tool", json!({}))],
    )]);
    let client = FakeClient::default();
    let updates = Recorder::default();
    let mut history = seeded_history("do it");

    let err = AgentLoop::new(&registry, &model, 10)
        .run("s1", &mut history, &client, &updates, &CancellationToken::new())
        .await
        .expect_err("tool failure ends the prompt");

    assert_eq!(err, AppError::ToolNotFound("no_such_tool".into()));
    assert_eq!(history, seeded_history("do it"));
    assert!(history_is_consistent(&history));
}

/// A model failure ends the prompt.
#[tokio::test]
async fn model_failure_is_returned() {
    let registry = ToolRegistry::with_builtin_tools();
    let model = ScriptedModel::new([]).then_fail("rate limited");
    let client = FakeClient::default();
    let updates = Recorder::default();
    let mut history = seeded_history("hi");

    let err = AgentLoop::new(&registry, &model, 10)
        .run("s1", &mut history, &client, &updates, &CancellationToken::new())
        .await
        .expect_err("model failure ends the prompt");

    assert_eq!(err, AppError::Llm("rate limited".into()));
    assert!(updates.kinds().is_empty());
}

// ── Cancellation ────────────────────────────────────────────────────────────

/// Cancelling while the model is thinking ends the prompt promptly.
#[tokio::test]
async fn cancellation_interrupts_model_call() {
    let registry = ToolRegistry::with_builtin_tools();
    let model = ScriptedModel::repeating(AssistantMessage::text("late"))
        .with_delay(Duration::from_secs(30));
    let client = FakeClient::default();
    let updates = Recorder::default();
    let mut history = seeded_history("slow");
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        AgentLoop::new(&registry, &model, 10).run("s1", &mut history, &client, &updates, &cancel),
    )
    .await
    .expect("cancellation must not wait for the model")
    .expect("cancellation is not an error");

    assert_eq!(outcome, TurnOutcome::Cancelled);
    assert_eq!(history, seeded_history("slow"));
    assert!(updates.kinds().is_empty());
}

/// An already-cancelled token stops the loop before the model is called.
#[tokio::test]
async fn cancelled_token_skips_model() {
    let registry = ToolRegistry::with_builtin_tools();
    let model = ScriptedModel::repeating(AssistantMessage::text("never"));
    let client = FakeClient::default();
    let updates = Recorder::default();
    let mut history = seeded_history("hi");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = AgentLoop::new(&registry, &model, 10)
        .run("s1", &mut history, &client, &updates, &cancel)
        .await
        .expect("cancellation is not an error");

    assert_eq!(outcome, TurnOutcome::Cancelled);
    assert_eq!(model.calls(), 0);
}
