//! Language-model seam.
//!
//! The agent loop only sees [`LanguageModel`]: history and tool schemas in,
//! one assistant message out. Providers are selected by configuration.

pub mod openai;
pub mod scripted;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::config::{LlmConfig, LlmProvider};
use crate::models::message::{AssistantMessage, ChatMessage};
use crate::tools::ToolSchema;
use crate::Result;

pub use openai::OpenAiModel;
pub use scripted::{EchoModel, ScriptedModel};

/// A chat model able to request tool calls.
pub trait LanguageModel: Send + Sync {
    /// Produce the next assistant message for `history`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Llm`](crate::AppError::Llm) when the provider
    /// fails or answers with something unusable.
    fn complete<'a>(
        &'a self,
        history: &'a [ChatMessage],
        tools: &'a [ToolSchema],
    ) -> Pin<Box<dyn Future<Output = Result<AssistantMessage>> + Send + 'a>>;
}

/// Build the model named by `config`.
///
/// `api_key` is only consulted for providers that need one.
///
/// # Errors
///
/// Returns [`AppError::Config`](crate::AppError::Config) when a required
/// key is missing or the HTTP client cannot be built.
pub fn from_config(config: &LlmConfig, api_key: Option<String>) -> Result<Arc<dyn LanguageModel>> {
    match config.provider {
        LlmProvider::Echo => Ok(Arc::new(EchoModel)),
        LlmProvider::OpenAi => {
            let api_key = api_key.ok_or_else(|| {
                crate::AppError::Config(format!(
                    "llm provider openai requires an API key (keychain or {})",
                    config.api_key_env
                ))
            })?;
            Ok(Arc::new(OpenAiModel::new(config, api_key)?))
        }
    }
}
