//! Completion client contract used by the chat state machine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Message, Role};

/// Errors raised by a completion client.
///
/// The chat layer treats every variant the same way; the split only helps logs.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("API key is missing")]
    MissingApiKey,

    #[error("chat session could not be initialized")]
    NotInitialized,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("remote error: {0}")]
    Api(String),

    #[error("reply blocked: {0}")]
    Blocked(String),

    #[error("malformed stream: {0}")]
    Stream(String),
}

/// One prior exchange entry replayed into a remote context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
        }
    }
}

impl From<&Message> for Turn {
    fn from(msg: &Message) -> Self {
        Self::new(msg.role, msg.text.clone())
    }
}

/// Conversation state a session resumes against on each send.
///
/// Holds the persona instructions and every turn the remote side has seen.
/// A successful reply appends both the user turn and the reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatContext {
    system_prompt: String,
    history: Vec<Turn>,
}

impl ChatContext {
    pub fn new(system_prompt: impl Into<String>, history: Vec<Turn>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            history,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    /// Record a completed exchange.
    pub fn record_exchange(&mut self, user_text: &str, reply: &str) {
        self.history.push(Turn::new(Role::User, user_text));
        self.history.push(Turn::new(Role::Model, reply));
    }
}

/// A hosted text-completion service.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Build a context from the persona prompt and replayed history.
    fn create_context(
        &self,
        system_prompt: &str,
        history: &[Turn],
    ) -> Result<ChatContext, CompletionError>;

    /// Stream a reply to `user_text`, calling `on_chunk` for every fragment in order.
    ///
    /// Resolves with the concatenated reply. The context only records the
    /// exchange when the reply succeeds.
    async fn stream_reply(
        &self,
        context: &mut ChatContext,
        user_text: &str,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, CompletionError>;
}
