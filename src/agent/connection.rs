//! Agent side of one client connection.
//!
//! [`AgentConnection`] owns the connection's [`Endpoint`] and
//! [`SessionStore`]. Its dispatcher walks the connection through
//! `Handshaking → Ready → Closed`, answers lifecycle methods inline, and
//! spawns one task per `session/prompt` so the read loop keeps servicing
//! the connection while the prompt waits on the model or the client.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::agent::session_store::SessionStore;
use crate::agent::turn::{AgentLoop, TurnOutcome, UpdateSink};
use crate::config::GlobalConfig;
use crate::llm::LanguageModel;
use crate::models::message::ChatMessage;
use crate::protocol::{
    self, methods, AgentCapabilities, CancelParams, Implementation, InitializeParams,
    InitializeResult, NewSessionParams, NewSessionResult, PromptCapabilities, PromptParams,
    PromptResult, SessionNotification, SessionUpdate, StopReason, UpdateKind, PROTOCOL_VERSION,
};
use crate::rpc::correlator::PeerHandle;
use crate::rpc::endpoint::{Dispatcher, Endpoint};
use crate::rpc::message::{Notification, Request, RequestId};
use crate::rpc::writer::Outbound;
use crate::tools::ToolRegistry;
use crate::{AppError, Result};

/// Process-wide collaborators shared by every connection.
#[derive(Clone)]
pub struct AgentContext {
    /// Read-only tool table.
    pub registry: Arc<ToolRegistry>,
    /// Language model.
    pub model: Arc<dyn LanguageModel>,
    /// Validated configuration.
    pub config: Arc<GlobalConfig>,
}

impl AgentContext {
    /// Bundle the collaborators.
    #[must_use]
    pub fn new(
        registry: Arc<ToolRegistry>,
        model: Arc<dyn LanguageModel>,
        config: Arc<GlobalConfig>,
    ) -> Self {
        Self {
            registry,
            model,
            config,
        }
    }
}

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for `initialize`.
    Handshaking,
    /// Serving session methods.
    Ready,
    /// The stream has closed.
    Closed,
}

/// One accepted connection, not yet serving.
pub struct AgentConnection {
    context: AgentContext,
    endpoint: Endpoint,
    sessions: Arc<SessionStore>,
}

impl AgentConnection {
    /// Prepare a connection using `context`.
    #[must_use]
    pub fn new(context: AgentContext) -> Self {
        let endpoint = Endpoint::new(context.config.endpoint_config());
        Self {
            context,
            endpoint,
            sessions: Arc::new(SessionStore::new()),
        }
    }

    /// The connection's session store.
    #[must_use]
    pub fn sessions(&self) -> Arc<SessionStore> {
        Arc::clone(&self.sessions)
    }

    /// Serve the connection until the stream closes or `cancel` fires.
    ///
    /// Returns once every prompt task spawned for this connection has
    /// finished.
    ///
    /// # Errors
    ///
    /// Propagates failures from the underlying [`Endpoint`].
    pub async fn serve<R, W>(self, source: R, sink: W, cancel: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            context,
            endpoint,
            sessions,
        } = self;
        let peer = Arc::new(PeerHandle::new(
            endpoint.correlator(),
            context.config.reverse_request_timeout(),
        ));
        let tracker = TaskTracker::new();
        let dispatcher = AgentDispatcher {
            state: ConnectionState::Handshaking,
            outbound: endpoint.outbound(),
            peer,
            sessions,
            prompts: Arc::new(Mutex::new(HashMap::new())),
            prompts_cancel: cancel.child_token(),
            tracker: tracker.clone(),
            context,
        };

        let result = endpoint.run(source, sink, dispatcher, cancel).await;
        tracker.close();
        tracker.wait().await;
        result
    }
}

/// Cancellation tokens of in-flight prompts, keyed by session id.
type PromptTable = Arc<Mutex<HashMap<String, CancellationToken>>>;

fn prompts(table: &PromptTable) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

struct AgentDispatcher {
    state: ConnectionState,
    context: AgentContext,
    outbound: Outbound,
    peer: Arc<PeerHandle>,
    sessions: Arc<SessionStore>,
    prompts: PromptTable,
    prompts_cancel: CancellationToken,
    tracker: TaskTracker,
}

impl AgentDispatcher {
    fn initialize(&mut self, params: Value) -> Result<Value> {
        let params: InitializeParams = protocol::parse_params(methods::INITIALIZE, params)?;
        let protocol_version = match params.protocol_version {
            Some(requested) if (1..=PROTOCOL_VERSION).contains(&requested) => requested,
            _ => PROTOCOL_VERSION,
        };
        if self.state == ConnectionState::Handshaking {
            info!(protocol_version, "connection initialized");
        }
        self.state = ConnectionState::Ready;

        protocol::to_value(&InitializeResult {
            protocol_version,
            agent_capabilities: AgentCapabilities {
                load_session: false,
                prompt_capabilities: PromptCapabilities {
                    image: false,
                    audio: false,
                    embedded_context: false,
                },
            },
            auth_methods: Vec::new(),
            agent_info: Some(Implementation {
                name: env!("CARGO_PKG_NAME").into(),
                version: env!("CARGO_PKG_VERSION").into(),
            }),
        })
    }

    fn new_session(&self, params: Value) -> Result<Value> {
        let params: NewSessionParams = protocol::parse_params(methods::SESSION_NEW, params)?;
        let system_prompt = self
            .context
            .registry
            .system_prompt(&self.context.config.agent.system_prompt);
        let session_id = self.sessions.create(system_prompt, params.cwd);
        info!(session_id = %session_id, "session created");
        protocol::to_value(&NewSessionResult { session_id })
    }

    fn cancel(&self, method: &str, params: Value) -> Result<Value> {
        let params: CancelParams = protocol::parse_params(method, params)?;
        if !self.sessions.contains(&params.session_id) {
            return Err(AppError::NotFound(format!("session {}", params.session_id)));
        }
        match prompts(&self.prompts).get(&params.session_id) {
            Some(token) => {
                info!(session_id = %params.session_id, "prompt cancellation requested");
                token.cancel();
            }
            None => debug!(session_id = %params.session_id, "cancel with no prompt in flight"),
        }
        Ok(Value::Null)
    }

    /// Validate a prompt and spawn its task; errors are answered inline.
    fn start_prompt(&self, id: RequestId, params: Value) -> Result<()> {
        let params: PromptParams = protocol::parse_params(methods::SESSION_PROMPT, params)?;
        let text = params.prompt.into_text()?;
        let session_id = params.session_id;
        let mut history = self.sessions.begin_prompt(&session_id)?;
        history.push(ChatMessage::user(text));

        let token = self.prompts_cancel.child_token();
        prompts(&self.prompts).insert(session_id.clone(), token.clone());

        let context = self.context.clone();
        let outbound = self.outbound.clone();
        let peer = Arc::clone(&self.peer);
        let sessions = Arc::clone(&self.sessions);
        let table = Arc::clone(&self.prompts);
        let span = info_span!("prompt", session_id = %session_id, request_id = %id);

        self.tracker.spawn(
            async move {
                let sink = NotificationSink {
                    outbound: outbound.clone(),
                    session_id: session_id.clone(),
                };
                let agent_loop = AgentLoop::new(
                    &context.registry,
                    context.model.as_ref(),
                    context.config.agent.max_turns,
                );
                let outcome = agent_loop
                    .run(&session_id, &mut history, peer.as_ref(), &sink, &token)
                    .await;

                // Drop the token before releasing the session so a follow-up
                // prompt cannot have its own token removed here.
                prompts(&table).remove(&session_id);
                sessions.finish_prompt(&session_id, history);

                let stop_reason = match outcome {
                    Ok(TurnOutcome::Completed {
                        turns, hit_limit, ..
                    }) => {
                        info!(turns, hit_limit, "prompt completed");
                        StopReason::Done
                    }
                    Ok(TurnOutcome::Cancelled) => {
                        info!("prompt cancelled");
                        StopReason::Cancelled
                    }
                    Err(err) => {
                        warn!(%err, "prompt failed");
                        sink.send(SessionUpdate::new(UpdateKind::Error, err.to_string()))
                            .await;
                        StopReason::Error
                    }
                };
                let result = protocol::to_value(&PromptResult { stop_reason });
                outbound.respond(id, result).await;
            }
            .instrument(span),
        );
        Ok(())
    }
}

impl Dispatcher for AgentDispatcher {
    async fn on_request(&mut self, request: Request) {
        let Request { id, method, params } = request;
        debug!(request_id = %id, method = %method, "request received");

        let outcome = match (self.state, method.as_str()) {
            (ConnectionState::Closed, _) => return,
            (_, methods::INITIALIZE) => self.initialize(params),
            (ConnectionState::Handshaking, _) => Err(AppError::Protocol(format!(
                "connection not initialized; {method} requires initialize first"
            ))),
            (ConnectionState::Ready, methods::SESSION_NEW) => self.new_session(params),
            (ConnectionState::Ready, methods::SESSION_LOAD) => Err(AppError::NotSupported(
                "session/load is not supported".into(),
            )),
            (ConnectionState::Ready, methods::SESSION_PROMPT) => {
                match self.start_prompt(id.clone(), params) {
                    Ok(()) => return,
                    Err(err) => Err(err),
                }
            }
            (ConnectionState::Ready, methods::SESSION_CANCEL | methods::CANCEL) => {
                self.cancel(&method, params)
            }
            (ConnectionState::Ready, _) => Err(AppError::UnknownMethod(method.clone())),
        };

        if let Err(err) = &outcome {
            debug!(request_id = %id, method = %method, %err, "request rejected");
        }
        self.outbound.respond(id, outcome).await;
    }

    async fn on_notification(&mut self, notification: Notification) {
        let Notification { method, params } = notification;
        match (self.state, method.as_str()) {
            (ConnectionState::Ready, methods::SESSION_CANCEL | methods::CANCEL) => {
                if let Err(err) = self.cancel(&method, params) {
                    warn!(%err, "cancel notification ignored");
                }
            }
            _ => debug!(method = %method, state = ?self.state, "notification ignored"),
        }
    }

    fn on_closed(&mut self, reason: &str) {
        info!(reason, "connection closed");
        self.state = ConnectionState::Closed;
        self.prompts_cancel.cancel();
    }
}

/// Streams updates to the client as `session/update` notifications.
struct NotificationSink {
    outbound: Outbound,
    session_id: String,
}

impl UpdateSink for NotificationSink {
    fn send<'a>(&'a self, update: SessionUpdate) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let notification = SessionNotification {
                session_id: self.session_id.clone(),
                update,
            };
            let params = match protocol::to_value(&notification) {
                Ok(params) => params,
                Err(err) => {
                    warn!(%err, "session update dropped");
                    return;
                }
            };
            if self
                .outbound
                .notify(methods::SESSION_UPDATE, params)
                .await
                .is_err()
            {
                debug!(session_id = %self.session_id, "session update dropped, connection closed");
            }
        })
    }
}
