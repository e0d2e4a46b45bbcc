//! Shared harness: an agent connection served over an in-memory duplex
//! stream, driven by a raw line-level client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use acp_agent::agent::{AgentConnection, AgentContext, SessionStore};
use acp_agent::config::GlobalConfig;
use acp_agent::llm::LanguageModel;
use acp_agent::tools::ToolRegistry;
use acp_agent::Result;

/// How long a test waits for any single message.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// A running agent connection and the client end of its stream.
pub struct Harness {
    pub client: RawClient,
    pub sessions: Arc<SessionStore>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Result<()>>,
}

/// Serve one agent connection over a duplex stream.
pub fn start_agent(model: Arc<dyn LanguageModel>, config: GlobalConfig) -> Harness {
    let (client_side, agent_side) = tokio::io::duplex(1 << 20);
    let context = AgentContext::new(
        Arc::new(ToolRegistry::with_builtin_tools()),
        model,
        Arc::new(config),
    );
    let connection = AgentConnection::new(context);
    let sessions = connection.sessions();
    let cancel = CancellationToken::new();
    let (source, sink) = tokio::io::split(agent_side);
    let task = tokio::spawn(connection.serve(source, sink, cancel.clone()));

    Harness {
        client: RawClient::new(client_side),
        sessions,
        cancel,
        task,
    }
}

/// Line-level JSON-RPC client used to observe exactly what the agent sends.
pub struct RawClient {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: Option<WriteHalf<DuplexStream>>,
}

impl RawClient {
    fn new(stream: DuplexStream) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            lines: BufReader::new(reader).lines(),
            writer: Some(writer),
        }
    }

    /// Write `line` followed by `\n`.
    pub async fn send_raw(&mut self, line: &str) {
        let writer = self.writer.as_mut().expect("writer still open");
        writer
            .write_all(format!("{line}\n").as_bytes())
            .await
            .expect("write to agent");
    }

    /// Send a request.
    pub async fn request(&mut self, id: i64, method: &str, params: Value) {
        let envelope = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        self.send_raw(&envelope.to_string()).await;
    }

    /// Send a notification.
    pub async fn notify(&mut self, method: &str, params: Value) {
        let envelope = json!({ "jsonrpc": "2.0", "method": method, "params": params });
        self.send_raw(&envelope.to_string()).await;
    }

    /// Answer an agent request.
    pub async fn respond(&mut self, id: &Value, result: Value) {
        let envelope = json!({ "jsonrpc": "2.0", "id": id, "result": result });
        self.send_raw(&envelope.to_string()).await;
    }

    /// Close the client's write half, signalling end of stream.
    pub async fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            writer.shutdown().await.expect("shutdown writer");
        }
    }

    /// Next line from the agent as JSON, or `None` at end of stream.
    pub async fn recv_line(&mut self) -> Option<String> {
        tokio::time::timeout(RECV_TIMEOUT, self.lines.next_line())
            .await
            .expect("agent must answer in time")
            .expect("read from agent")
    }

    /// Next message from the agent.
    pub async fn recv(&mut self) -> Value {
        let line = self.recv_line().await.expect("agent closed the stream");
        serde_json::from_str(&line).expect("agent sent valid JSON")
    }

    /// Collect messages until the response to `id`, returning everything
    /// received before it and the response itself.
    pub async fn recv_until_response(&mut self, id: i64) -> (Vec<Value>, Value) {
        let mut before = Vec::new();
        loop {
            let message = self.recv().await;
            if message.get("method").is_none() && message["id"] == id {
                return (before, message);
            }
            before.push(message);
        }
    }

    /// Send a request and wait for its response, failing on anything else.
    pub async fn call(&mut self, id: i64, method: &str, params: Value) -> Value {
        self.request(id, method, params).await;
        let (before, response) = self.recv_until_response(id).await;
        assert!(before.is_empty(), "unexpected messages before response: {before:?}");
        response
    }

    /// Complete the handshake.
    pub async fn initialize(&mut self) -> Value {
        let response = self
            .call(0, "initialize", json!({ "protocolVersion": 1, "clientCapabilities": {} }))
            .await;
        assert!(response.get("result").is_some(), "initialize failed: {response}");
        response
    }

    /// Create a session and return its id.
    pub async fn new_session(&mut self) -> String {
        let response = self.call(1, "session/new", json!({ "cwd": "/work" })).await;
        response["result"]["sessionId"]
            .as_str()
            .expect("session id")
            .to_owned()
    }
}

/// `session/update` notifications among `messages`, as `(type, content)`.
pub fn updates(messages: &[Value]) -> Vec<(String, String)> {
    messages
        .iter()
        .filter(|m| m["method"] == "session/update")
        .map(|m| {
            (
                m["params"]["update"]["type"].as_str().unwrap_or_default().to_owned(),
                m["params"]["update"]["content"].as_str().unwrap_or_default().to_owned(),
            )
        })
        .collect()
}
