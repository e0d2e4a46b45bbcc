//! Tool registry and executor.
//!
//! Handlers receive their arguments and an explicit [`ToolContext`]. Tools
//! that need the client's file system go through
//! [`ToolContext::peer`], never the socket.

pub mod fs;
pub mod weather;

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::models::message::ToolCall;
use crate::rpc::correlator::PeerRequest;
use crate::{AppError, Result};

/// Future returned by a tool handler.
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Type-erased tool handler.
pub type ToolHandler =
    Arc<dyn for<'a> Fn(Map<String, Value>, ToolContext<'a>) -> ToolFuture<'a> + Send + Sync>;

/// Per-call context handed to a tool handler.
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    /// Session the call belongs to; forwarded on reverse requests.
    pub session_id: &'a str,
    /// Capability to issue requests to the client.
    pub peer: &'a dyn PeerRequest,
}

impl<'a> ToolContext<'a> {
    /// Build a context.
    #[must_use]
    pub fn new(session_id: &'a str, peer: &'a dyn PeerRequest) -> Self {
        Self { session_id, peer }
    }
}

/// Name, description and parameter schema sent to the language model.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

/// A registered tool.
#[derive(Clone)]
pub struct ToolDefinition {
    schema: ToolSchema,
    handler: ToolHandler,
}

impl ToolDefinition {
    /// Define a tool.
    pub fn new<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: Value,
        handler: F,
    ) -> Self
    where
        F: for<'a> Fn(Map<String, Value>, ToolContext<'a>) -> ToolFuture<'a>
            + Send
            + Sync
            + 'static,
    {
        Self {
            schema: ToolSchema {
                name: name.into(),
                description: description.into(),
                parameters,
            },
            handler: Arc::new(handler),
        }
    }

    /// Tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.schema.name
    }

    /// Schema advertised to the model.
    #[must_use]
    pub fn schema(&self) -> &ToolSchema {
        &self.schema
    }
}

impl std::fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Read-only lookup table of tools, shared across connections.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolDefinition>,
}

impl ToolRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in tool.
    #[must_use]
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        for tool in fs::definitions() {
            registry.register(tool);
        }
        registry.register(weather::definition());
        registry
    }

    /// Add `tool`, replacing any tool of the same name.
    pub fn register(&mut self, tool: ToolDefinition) {
        if let Some(previous) = self.tools.insert(tool.name().to_owned(), tool) {
            warn!(tool = previous.name(), "tool definition replaced");
        }
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas of every tool, sorted by name.
    #[must_use]
    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|tool| tool.schema.clone()).collect()
    }

    /// System prompt seeded into new sessions: `base` followed by one
    /// `- name: description` line per tool.
    #[must_use]
    pub fn system_prompt(&self, base: &str) -> String {
        let mut prompt = base.trim_end().to_owned();
        if self.tools.is_empty() {
            return prompt;
        }
        prompt.push_str("\n\nAvailable tools:");
        for tool in self.tools.values() {
            prompt.push_str(&format!(
                "\n- {}: {}",
                tool.schema.name, tool.schema.description
            ));
        }
        prompt
    }

    /// Run one tool call.
    ///
    /// A failing or panicking handler is reported as
    /// [`AppError::ToolExecution`]; the caller decides what that means for
    /// the prompt.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ToolNotFound`] for unknown names and
    /// [`AppError::ToolExecution`] when the handler fails.
    pub async fn execute(&self, call: &ToolCall, ctx: ToolContext<'_>) -> Result<Value> {
        let Some(tool) = self.tools.get(&call.name) else {
            return Err(AppError::ToolNotFound(call.name.clone()));
        };

        debug!(tool = %call.name, call_id = %call.id, session_id = ctx.session_id, "executing tool");
        let future = (tool.handler)(call.arguments.clone(), ctx);
        match AssertUnwindSafe(future).catch_unwind().await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(err @ AppError::ToolExecution(_))) => Err(err),
            Ok(Err(err)) => Err(AppError::ToolExecution(format!("{}: {err}", call.name))),
            Err(_) => Err(AppError::ToolExecution(format!("{} panicked", call.name))),
        }
    }
}

/// Deserialize tool arguments into `T`.
///
/// # Errors
///
/// Returns [`AppError::ToolExecution`] naming the tool when arguments are
/// missing or mistyped.
pub fn parse_args<T: DeserializeOwned>(tool: &str, args: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(args))
        .map_err(|err| AppError::ToolExecution(format!("{tool}: invalid arguments: {err}")))
}
