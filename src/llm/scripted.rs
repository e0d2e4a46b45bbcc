//! Offline models: an echo model for local runs and a scripted model for
//! deterministic tests.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::LanguageModel;
use crate::models::message::{AssistantMessage, ChatMessage};
use crate::tools::ToolSchema;
use crate::{AppError, Result};

/// Replies with the most recent user text. Never calls tools.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoModel;

impl LanguageModel for EchoModel {
    fn complete<'a>(
        &'a self,
        history: &'a [ChatMessage],
        _tools: &'a [ToolSchema],
    ) -> Pin<Box<dyn Future<Output = Result<AssistantMessage>> + Send + 'a>> {
        let last_user = history.iter().rev().find_map(|message| match message {
            ChatMessage::User { content } => Some(content.clone()),
            _ => None,
        });
        Box::pin(async move {
            Ok(AssistantMessage::text(format!(
                "echo: {}",
                last_user.unwrap_or_default()
            )))
        })
    }
}

#[derive(Debug, Default)]
struct Script {
    steps: VecDeque<Result<AssistantMessage>>,
    histories: Vec<Vec<ChatMessage>>,
}

/// Plays back a fixed sequence of replies.
///
/// Once the queue is empty the model answers with the repeating reply if
/// one was set, otherwise with an [`AppError::Llm`].
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Mutex<Script>,
    repeat: Option<AssistantMessage>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    /// Model answering with `replies` in order.
    #[must_use]
    pub fn new(replies: impl IntoIterator<Item = AssistantMessage>) -> Self {
        Self {
            script: Mutex::new(Script {
                steps: replies.into_iter().map(Ok).collect(),
                histories: Vec::new(),
            }),
            ..Self::default()
        }
    }

    /// Model answering every call with `reply`.
    #[must_use]
    pub fn repeating(reply: AssistantMessage) -> Self {
        Self::new([]).then_repeat(reply)
    }

    /// Queue a failing call after the replies queued so far.
    #[must_use]
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.lock()
            .steps
            .push_back(Err(AppError::Llm(message.into())));
        self
    }

    /// Answer with `reply` once the queue is empty.
    #[must_use]
    pub fn then_repeat(mut self, reply: AssistantMessage) -> Self {
        self.repeat = Some(reply);
        self
    }

    /// Sleep for `delay` before every answer.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of completed or failed calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Histories the model was called with, oldest first.
    #[must_use]
    pub fn histories(&self) -> Vec<Vec<ChatMessage>> {
        self.lock().histories.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_step(&self, history: &[ChatMessage]) -> Result<AssistantMessage> {
        let mut script = self.lock();
        script.histories.push(history.to_vec());
        match script.steps.pop_front() {
            Some(step) => step,
            None => self
                .repeat
                .clone()
                .ok_or_else(|| AppError::Llm("scripted model has no replies left".into())),
        }
    }
}

impl LanguageModel for ScriptedModel {
    fn complete<'a>(
        &'a self,
        history: &'a [ChatMessage],
        _tools: &'a [ToolSchema],
    ) -> Pin<Box<dyn Future<Output = Result<AssistantMessage>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.next_step(history)
        })
    }
}
