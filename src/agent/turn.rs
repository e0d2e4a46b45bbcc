//! The agent loop: call the model, run requested tools, repeat.
//!
//! Tool calls of one assistant message run sequentially in declaration
//! order. The history only ever grows by complete blocks (an assistant
//! message together with all of its tool results), so a failure or a
//! cancellation never leaves unanswered tool calls behind.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::llm::LanguageModel;
use crate::models::message::{ChatMessage, ToolCall};
use crate::protocol::{SessionUpdate, UpdateKind};
use crate::rpc::correlator::PeerRequest;
use crate::tools::{ToolContext, ToolRegistry};
use crate::Result;

/// Longest tool payload preview streamed to the client, in characters.
const PREVIEW_CHARS: usize = 500;

/// Destination of streamed progress for one prompt.
pub trait UpdateSink: Send + Sync {
    /// Deliver one update. Delivery failures are the sink's concern.
    fn send<'a>(&'a self, update: SessionUpdate) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// How a prompt ended, when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model produced a final answer, or the turn limit was hit.
    Completed {
        /// Final text shown to the user.
        text: String,
        /// Tool-calling turns taken.
        turns: u32,
        /// Whether the loop stopped at the turn limit.
        hit_limit: bool,
    },
    /// The cancellation token fired first.
    Cancelled,
}

/// Drives one prompt to termination.
pub struct AgentLoop<'a> {
    registry: &'a ToolRegistry,
    model: &'a dyn LanguageModel,
    max_turns: u32,
}

impl<'a> AgentLoop<'a> {
    /// Build a loop over `registry` and `model`, allowing at most
    /// `max_turns` tool-calling turns.
    #[must_use]
    pub fn new(registry: &'a ToolRegistry, model: &'a dyn LanguageModel, max_turns: u32) -> Self {
        Self {
            registry,
            model,
            max_turns,
        }
    }

    /// Run the loop over `history`, which must already end with the user
    /// message.
    ///
    /// # Errors
    ///
    /// Any model or tool failure ends the prompt and is returned as is.
    pub async fn run(
        &self,
        session_id: &str,
        history: &mut Vec<ChatMessage>,
        peer: &dyn PeerRequest,
        updates: &dyn UpdateSink,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let schemas = self.registry.schemas();
        let ctx = ToolContext::new(session_id, peer);
        let mut turns = 0;
        let mut last_text = String::new();

        while turns < self.max_turns {
            let reply = tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
                reply = self.model.complete(history, &schemas) => reply?,
            };

            if !reply.content.trim().is_empty() {
                last_text.clone_from(&reply.content);
                updates
                    .send(SessionUpdate::new(
                        UpdateKind::AgentMessageChunk,
                        reply.content.clone(),
                    ))
                    .await;
            }

            if !reply.has_tool_calls() {
                history.push(ChatMessage::Assistant(reply));
                debug!(session_id, turns, "model answered without tools");
                return Ok(TurnOutcome::Completed {
                    text: last_text,
                    turns,
                    hit_limit: false,
                });
            }

            let mut results = Vec::with_capacity(reply.tool_calls.len());
            for call in &reply.tool_calls {
                updates
                    .send(SessionUpdate::new(UpdateKind::ToolCall, describe_call(call)))
                    .await;
                let payload = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Ok(TurnOutcome::Cancelled),
                    payload = self.registry.execute(call, ctx) => payload?,
                };
                updates
                    .send(SessionUpdate::new(
                        UpdateKind::ToolCallResult,
                        format!("{}: {}", call.name, preview(&payload)),
                    ))
                    .await;
                results.push(ChatMessage::tool_result(call, payload));
            }

            history.push(ChatMessage::Assistant(reply));
            history.extend(results);
            turns += 1;
        }

        info!(session_id, max_turns = self.max_turns, "turn limit reached");
        let text = if last_text.is_empty() {
            let fallback = format!(
                "Stopped after {} tool-calling turns without a final answer.",
                self.max_turns
            );
            updates
                .send(SessionUpdate::new(UpdateKind::AgentMessageChunk, fallback.clone()))
                .await;
            fallback
        } else {
            last_text
        };
        Ok(TurnOutcome::Completed {
            text,
            turns,
            hit_limit: true,
        })
    }
}

fn describe_call(call: &ToolCall) -> String {
    format!("{}({})", call.name, Value::Object(call.arguments.clone()))
}

fn preview(payload: &Value) -> String {
    let text = match payload {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    match text.char_indices().nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text,
    }
}
