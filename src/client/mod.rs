//! Client role: drives an agent and serves its reverse requests from a
//! local [`Workspace`].

pub mod workspace;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{
    self, methods, CancelParams, ContentBlock, GrepSearchParams, InitializeParams,
    InitializeResult, ListDirsParams, NewSessionParams, NewSessionResult, PromptInput,
    PromptParams, PromptResult, ReadTextFileParams, ReadTextFileResult, RequestPermissionParams,
    SessionNotification, StopReason, WriteTextFileParams, PROTOCOL_VERSION,
};
use crate::rpc::correlator::Correlator;
use crate::rpc::endpoint::{Dispatcher, Endpoint, EndpointConfig};
use crate::rpc::message::{Notification, Request};
use crate::rpc::writer::Outbound;
use crate::{AppError, Result};

pub use workspace::Workspace;

/// Answers the agent's reverse requests and forwards streamed updates.
pub struct ClientDispatcher {
    workspace: Arc<Workspace>,
    outbound: Outbound,
    updates: mpsc::UnboundedSender<SessionNotification>,
}

impl ClientDispatcher {
    /// Serve `workspace`, replying through `outbound` and forwarding
    /// `session/update` notifications to `updates`.
    #[must_use]
    pub fn new(
        workspace: Arc<Workspace>,
        outbound: Outbound,
        updates: mpsc::UnboundedSender<SessionNotification>,
    ) -> Self {
        Self {
            workspace,
            outbound,
            updates,
        }
    }
}

/// Handle one reverse request against `workspace`.
///
/// # Errors
///
/// Returns [`AppError::UnknownMethod`] for anything the client does not
/// implement, including unknown `_` extensions, and the workspace's error
/// otherwise.
pub async fn handle_reverse_request(
    workspace: &Workspace,
    method: &str,
    params: Value,
) -> Result<Value> {
    match method {
        methods::FS_READ_TEXT_FILE => {
            let params: ReadTextFileParams = protocol::parse_params(method, params)?;
            let content = workspace.read_text_file(&params.path).await?;
            protocol::to_value(&ReadTextFileResult { content })
        }
        methods::FS_WRITE_TEXT_FILE => {
            let params: WriteTextFileParams = protocol::parse_params(method, params)?;
            workspace
                .write_text_file(&params.path, &params.content)
                .await?;
            Ok(Value::Null)
        }
        methods::FS_GREP_SEARCH => {
            let params: GrepSearchParams = protocol::parse_params(method, params)?;
            if params.pattern.is_empty() {
                return Err(AppError::InvalidParams("pattern is required".into()));
            }
            protocol::to_value(&workspace.grep(&params).await?)
        }
        methods::FS_LIST_DIRS => {
            let params: ListDirsParams = protocol::parse_params(method, params)?;
            protocol::to_value(&workspace.list_dirs(&params.path, params.recursive).await?)
        }
        methods::SESSION_REQUEST_PERMISSION => {
            let params: RequestPermissionParams = protocol::parse_params(method, params)?;
            let Some(option) = params.options.first() else {
                return Err(AppError::InvalidParams("no options provided".into()));
            };
            info!(session_id = %params.session_id, option = %option.option_id, "permission granted");
            Ok(json!({ "outcome": { "outcome": "selected", "optionId": option.option_id } }))
        }
        other => Err(AppError::UnknownMethod(other.to_owned())),
    }
}

impl Dispatcher for ClientDispatcher {
    async fn on_request(&mut self, request: Request) {
        let Request { id, method, params } = request;
        debug!(request_id = %id, method = %method, "reverse request received");
        let workspace = Arc::clone(&self.workspace);
        let outbound = self.outbound.clone();
        // Grep and large reads must not stall the read loop.
        tokio::spawn(async move {
            let outcome = handle_reverse_request(&workspace, &method, params).await;
            if let Err(err) = &outcome {
                warn!(method = %method, %err, "reverse request failed");
            }
            outbound.respond(id, outcome).await;
        });
    }

    async fn on_notification(&mut self, notification: Notification) {
        if notification.method != methods::SESSION_UPDATE {
            debug!(method = %notification.method, "notification ignored");
            return;
        }
        match protocol::parse_params::<SessionNotification>(&notification.method, notification.params)
        {
            Ok(update) => {
                if self.updates.send(update).is_err() {
                    debug!("update receiver dropped");
                }
            }
            Err(err) => warn!(%err, "malformed session update"),
        }
    }

    fn on_closed(&mut self, reason: &str) {
        info!(reason, "agent connection closed");
    }
}

/// Timeouts applied by [`AcpClient`].
#[derive(Debug, Clone, Copy)]
pub struct ClientOptions {
    /// Connection tunables.
    pub endpoint: EndpointConfig,
    /// Bound on `initialize`, `session/new` and other short requests.
    pub request_timeout: Duration,
    /// Bound on one `session/prompt`.
    pub prompt_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            endpoint: EndpointConfig::default(),
            request_timeout: Duration::from_secs(30),
            prompt_timeout: Duration::from_secs(600),
        }
    }
}

/// Connection to an agent.
pub struct AcpClient {
    correlator: Arc<Correlator>,
    outbound: Outbound,
    options: ClientOptions,
    cancel: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl AcpClient {
    /// Start serving the connection on `source`/`sink`.
    ///
    /// Returns the client and the stream of `session/update` notifications.
    pub fn connect<R, W>(
        source: R,
        sink: W,
        workspace: Workspace,
        options: ClientOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SessionNotification>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let endpoint = Endpoint::new(options.endpoint);
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let dispatcher =
            ClientDispatcher::new(Arc::new(workspace), endpoint.outbound(), updates_tx);
        let correlator = endpoint.correlator();
        let outbound = endpoint.outbound();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(endpoint.run(source, sink, dispatcher, cancel.clone()));
        (
            Self {
                correlator,
                outbound,
                options,
                cancel,
                task,
            },
            updates_rx,
        )
    }

    /// Issue a raw request bounded by the short-request timeout.
    ///
    /// # Errors
    ///
    /// Returns the peer's error as [`AppError::Remote`], or
    /// [`AppError::Timeout`] / [`AppError::ConnectionClosed`].
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        self.correlator
            .send_and_await(method, params, self.options.request_timeout)
            .await
    }

    /// Negotiate the protocol.
    ///
    /// # Errors
    ///
    /// See [`AcpClient::request`]; also fails on a malformed result.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = protocol::to_value(&InitializeParams {
            protocol_version: Some(PROTOCOL_VERSION),
            client_capabilities: Some(json!({
                "fs": { "readTextFile": true, "writeTextFile": true },
                "terminal": false
            })),
        })?;
        let result = self.request(methods::INITIALIZE, params).await?;
        decode_result(methods::INITIALIZE, result)
    }

    /// Create a session and return its id.
    ///
    /// # Errors
    ///
    /// See [`AcpClient::request`].
    pub async fn new_session(&self, cwd: Option<PathBuf>) -> Result<String> {
        let params = protocol::to_value(&NewSessionParams {
            cwd,
            mcp_servers: Vec::new(),
        })?;
        let result = self.request(methods::SESSION_NEW, params).await?;
        let result: NewSessionResult = decode_result(methods::SESSION_NEW, result)?;
        Ok(result.session_id)
    }

    /// Send `text` as a prompt and wait for the turn to end.
    ///
    /// # Errors
    ///
    /// Returns the agent's rejection (busy, unknown session) or a transport
    /// failure.
    pub async fn prompt(&self, session_id: &str, text: &str) -> Result<StopReason> {
        let params = protocol::to_value(&PromptParams {
            session_id: session_id.to_owned(),
            prompt: PromptInput::Blocks(vec![ContentBlock::text(text)]),
        })?;
        let result = self
            .correlator
            .send_and_await(methods::SESSION_PROMPT, params, self.options.prompt_timeout)
            .await?;
        let result: PromptResult = decode_result(methods::SESSION_PROMPT, result)?;
        Ok(result.stop_reason)
    }

    /// Ask the agent to stop the prompt running in `session_id`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ConnectionClosed`] if the connection is gone.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let params = protocol::to_value(&CancelParams {
            session_id: session_id.to_owned(),
        })?;
        self.outbound.notify(methods::SESSION_CANCEL, params).await
    }

    /// Close the connection and wait for its tasks to stop.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Io`] if the connection task panicked.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        self.task
            .await
            .map_err(|err| AppError::Io(format!("client task failed: {err}")))?
    }

    /// Whether the connection has closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.correlator.is_closed()
    }
}

fn decode_result<T: serde::de::DeserializeOwned>(method: &str, result: Value) -> Result<T> {
    serde_json::from_value(result)
        .map_err(|err| AppError::Decode(format!("{method}: unexpected result: {err}")))
}
