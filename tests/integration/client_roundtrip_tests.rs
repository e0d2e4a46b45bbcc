//! End-to-end tests: the bundled client, serving a real workspace, against
//! an agent connection.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use acp_agent::agent::{AgentConnection, AgentContext};
use acp_agent::client::{AcpClient, ClientOptions, Workspace};
use acp_agent::config::GlobalConfig;
use acp_agent::llm::{EchoModel, LanguageModel, ScriptedModel};
use acp_agent::models::message::{AssistantMessage, ToolCall};
use acp_agent::protocol::{SessionNotification, StopReason, UpdateKind};
use acp_agent::tools::ToolRegistry;
use acp_agent::{transport, AppError};

fn context(model: Arc<dyn LanguageModel>) -> AgentContext {
    AgentContext::new(
        Arc::new(ToolRegistry::with_builtin_tools()),
        model,
        Arc::new(GlobalConfig::default()),
    )
}

/// Connect a client serving `workspace` to a fresh agent connection.
fn connect(
    model: Arc<dyn LanguageModel>,
    workspace: Workspace,
) -> (AcpClient, mpsc::UnboundedReceiver<SessionNotification>) {
    let (client_side, agent_side) = tokio::io::duplex(1 << 20);
    let connection = AgentConnection::new(context(model));
    let (agent_read, agent_write) = tokio::io::split(agent_side);
    tokio::spawn(connection.serve(agent_read, agent_write, CancellationToken::new()));

    let (client_read, client_write) = tokio::io::split(client_side);
    AcpClient::connect(client_read, client_write, workspace, ClientOptions::default())
}

fn drain(updates: &mut mpsc::UnboundedReceiver<SessionNotification>) -> Vec<(UpdateKind, String)> {
    let mut seen = Vec::new();
    while let Ok(notification) = updates.try_recv() {
        seen.push((notification.update.kind, notification.update.content));
    }
    seen
}

// ── File-system round trips ─────────────────────────────────────────────────

/// A prompt that writes then reads a file goes through the client's workspace.
#[tokio::test]
async fn write_and_read_through_client_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = Workspace::new(dir.path()).expect("workspace");
    let model = ScriptedModel::new([
        AssistantMessage::with_tool_calls(
            "Saving your note.",
            vec![ToolCall::new(
                "w1",
                "write_file",
                json!({ "path": "notes/todo.txt", "content": "buy milk\n" }),
            )],
        ),
        AssistantMessage::with_tool_calls(
            "",
            vec![ToolCall::new("r1", "read_file", json!({ "path": "notes/todo.txt" }))],
        ),
        AssistantMessage::text("Saved and verified."),
    ]);
    let (client, mut updates) = connect(Arc::new(model), workspace);

    client.initialize().await.expect("initialize");
    let session_id = client
        .new_session(Some(dir.path().to_path_buf()))
        .await
        .expect("new session");
    let stop = client
        .prompt(&session_id, "remember to buy milk")
        .await
        .expect("prompt");

    assert_eq!(stop, StopReason::Done);
    let written = std::fs::read_to_string(dir.path().join("notes/todo.txt")).expect("file written");
    assert_eq!(written, "buy milk\n");

    let seen = drain(&mut updates);
    let kinds: Vec<UpdateKind> = seen.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(
        kinds,
        vec![
            UpdateKind::AgentMessageChunk,
            UpdateKind::ToolCall,
            UpdateKind::ToolCallResult,
            UpdateKind::ToolCall,
            UpdateKind::ToolCallResult,
            UpdateKind::AgentMessageChunk,
        ]
    );
    assert!(seen[4].1.contains("buy milk"), "{}", seen[4].1);

    client.shutdown().await.expect("shutdown");
}

/// Grep and directory listing run in the client's workspace.
#[tokio::test]
async fn grep_and_list_through_client_workspace() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("src")).expect("mkdir");
    std::fs::write(dir.path().join("src/lib.rs"), "// TODO: tests\n").expect("fixture");
    let workspace = Workspace::new(dir.path()).expect("workspace");
    let model = ScriptedModel::new([
        AssistantMessage::with_tool_calls(
            "",
            vec![
                ToolCall::new("g", "grep_search", json!({ "pattern": "todo" })),
                ToolCall::new("l", "list_directory", json!({ "path": ".", "recursive": true })),
            ],
        ),
        AssistantMessage::text("Found one TODO."),
    ]);
    let model = Arc::new(model);
    let (client, mut updates) = connect(model.clone(), workspace);

    client.initialize().await.expect("initialize");
    let session_id = client.new_session(None).await.expect("new session");
    let stop = client.prompt(&session_id, "find todos").await.expect("prompt");

    assert_eq!(stop, StopReason::Done);
    let results: Vec<String> = drain(&mut updates)
        .into_iter()
        .filter(|(kind, _)| *kind == UpdateKind::ToolCallResult)
        .map(|(_, content)| content)
        .collect();
    assert!(results[0].starts_with("grep_search: "), "{}", results[0]);
    assert!(results[0].contains("src/lib.rs"), "{}", results[0]);
    assert!(results[1].contains("\"count\":2"), "{}", results[1]);

    // The model saw both results in order.
    let last = model.histories().pop().expect("history");
    assert_eq!(last.len(), 5);

    client.shutdown().await.expect("shutdown");
}

/// A path outside the workspace fails the tool, and the prompt ends in error.
#[tokio::test]
async fn escaping_path_fails_prompt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = Workspace::new(dir.path()).expect("workspace");
    let model = ScriptedModel::new([AssistantMessage::with_tool_calls(
        "",
        vec![ToolCall::new("r", "read_file", json!({ "path": "../../etc/passwd" }))],
    )]);
    let (client, mut updates) = connect(Arc::new(model), workspace);

    client.initialize().await.expect("initialize");
    let session_id = client.new_session(None).await.expect("new session");
    let stop = client.prompt(&session_id, "peek").await.expect("prompt");

    assert_eq!(stop, StopReason::Error);
    let (kind, content) = drain(&mut updates).pop().expect("error update");
    assert_eq!(kind, UpdateKind::Error);
    assert!(content.contains("path violation"), "{content}");

    client.shutdown().await.expect("shutdown");
}

// ── Client API ──────────────────────────────────────────────────────────────

/// The client's cancel stops a running prompt.
#[tokio::test]
async fn client_cancel_stops_prompt() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = Workspace::new(dir.path()).expect("workspace");
    let model = ScriptedModel::repeating(AssistantMessage::text("slow"))
        .with_delay(Duration::from_secs(30));
    let (client, _updates) = connect(Arc::new(model), workspace);
    client.initialize().await.expect("initialize");
    let session_id = client.new_session(None).await.expect("new session");

    let (stop, cancelled) = tokio::join!(client.prompt(&session_id, "wait"), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.cancel(&session_id).await
    });

    cancelled.expect("cancel sent");
    assert_eq!(stop.expect("prompt answered"), StopReason::Cancelled);
    client.shutdown().await.expect("shutdown");
}

/// Agent errors surface as remote errors with the agent's code.
#[tokio::test]
async fn agent_errors_surface_as_remote_errors() {
    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = Workspace::new(dir.path()).expect("workspace");
    let (client, _updates) = connect(Arc::new(EchoModel), workspace);
    client.initialize().await.expect("initialize");

    let err = client
        .request("session/load", json!({ "sessionId": "x" }))
        .await
        .expect_err("must fail");

    let AppError::Remote(rpc) = err else {
        panic!("expected a remote error, got {err:?}");
    };
    assert_eq!(rpc.code, -32_001);
    client.shutdown().await.expect("shutdown");
}

// ── TCP transport ───────────────────────────────────────────────────────────

/// The TCP listener serves a full prompt and stops on cancellation.
#[tokio::test]
async fn tcp_transport_serves_prompt() {
    let listener = transport::bind("127.0.0.1:0".parse().expect("addr"))
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    let cancel = CancellationToken::new();
    let server = tokio::spawn(transport::serve_tcp(
        listener,
        context(Arc::new(EchoModel)),
        cancel.clone(),
    ));

    let dir = tempfile::tempdir().expect("tempdir");
    let workspace = Workspace::new(dir.path()).expect("workspace");
    let stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
    let (read, write) = stream.into_split();
    let (client, mut updates) = AcpClient::connect(read, write, workspace, ClientOptions::default());

    client.initialize().await.expect("initialize");
    let session_id = client.new_session(None).await.expect("new session");
    let stop = client.prompt(&session_id, "over tcp").await.expect("prompt");

    assert_eq!(stop, StopReason::Done);
    let update = updates.recv().await.expect("one update");
    assert_eq!(update.session_id, session_id);
    assert_eq!(update.update.content, "echo: over tcp");

    client.shutdown().await.expect("shutdown");
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server stops")
        .expect("server task")
        .expect("server result");
}
