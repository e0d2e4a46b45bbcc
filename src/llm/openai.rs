//! OpenAI-compatible chat-completions adapter.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::LanguageModel;
use crate::config::LlmConfig;
use crate::models::message::{AssistantMessage, ChatMessage, ToolCall};
use crate::tools::ToolSchema;
use crate::{AppError, Result};

/// Chat model served by `POST {base_url}/chat/completions`.
#[derive(Debug, Clone)]
pub struct OpenAiModel {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiModel {
    /// Build an adapter from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] if the HTTP client cannot be built.
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|err| AppError::Config(format!("failed to build http client: {err}")))?;
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
        })
    }

    async fn send(&self, history: &[ChatMessage], tools: &[ToolSchema]) -> Result<AssistantMessage> {
        let body = build_request(&self.model, history, tools);
        debug!(model = %self.model, messages = history.len(), "sending chat completion");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| AppError::Llm(format!("request failed: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(%status, "chat completion rejected");
            return Err(AppError::Llm(format!("provider returned {status}: {text}")));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|err| AppError::Llm(format!("invalid response body: {err}")))?;
        parse_completion(value)
    }
}

impl LanguageModel for OpenAiModel {
    fn complete<'a>(
        &'a self,
        history: &'a [ChatMessage],
        tools: &'a [ToolSchema],
    ) -> Pin<Box<dyn Future<Output = Result<AssistantMessage>> + Send + 'a>> {
        Box::pin(self.send(history, tools))
    }
}

/// Build the chat-completions request body.
#[must_use]
pub fn build_request(model: &str, history: &[ChatMessage], tools: &[ToolSchema]) -> Value {
    let messages: Vec<Value> = history.iter().map(wire_message).collect();
    let mut body = json!({ "model": model, "messages": messages });
    if !tools.is_empty() {
        let tools: Vec<Value> = tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = Value::Array(tools);
    }
    body
}

fn wire_message(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System { content } => json!({ "role": "system", "content": content }),
        ChatMessage::User { content } => json!({ "role": "user", "content": content }),
        ChatMessage::Assistant(reply) => {
            let mut value = json!({ "role": "assistant", "content": reply.content });
            if reply.has_tool_calls() {
                let calls: Vec<Value> = reply
                    .tool_calls
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": Value::Object(call.arguments.clone()).to_string(),
                            }
                        })
                    })
                    .collect();
                value["tool_calls"] = Value::Array(calls);
            }
            value
        }
        ChatMessage::ToolResult {
            tool_call_id,
            payload,
            ..
        } => {
            let content = match payload {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            json!({ "role": "tool", "tool_call_id": tool_call_id, "content": content })
        }
    }
}

#[derive(Debug, Deserialize)]
struct Completion {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireAssistant,
}

#[derive(Debug, Deserialize)]
struct WireAssistant {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

/// Convert a chat-completions response body into an assistant message.
///
/// # Errors
///
/// Returns [`AppError::Llm`] when the body has no choices or a tool call's
/// arguments are not a JSON object.
pub fn parse_completion(body: Value) -> Result<AssistantMessage> {
    let completion: Completion = serde_json::from_value(body)
        .map_err(|err| AppError::Llm(format!("unexpected response shape: {err}")))?;
    let Some(choice) = completion.choices.into_iter().next() else {
        return Err(AppError::Llm("response contained no choices".into()));
    };

    let mut tool_calls = Vec::with_capacity(choice.message.tool_calls.len());
    for call in choice.message.tool_calls {
        let arguments = if call.function.arguments.trim().is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(&call.function.arguments) {
                Ok(Value::Object(map)) => map,
                Ok(_) | Err(_) => {
                    return Err(AppError::Llm(format!(
                        "tool call {} has non-object arguments",
                        call.id
                    )))
                }
            }
        };
        tool_calls.push(ToolCall {
            id: call.id,
            name: call.function.name,
            arguments,
        });
    }

    Ok(AssistantMessage::with_tool_calls(
        choice.message.content.unwrap_or_default(),
        tool_calls,
    ))
}
