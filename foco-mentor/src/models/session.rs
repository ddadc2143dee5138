//! Chat session model.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::{Message, Role};

/// Title every session starts with until the first user message arrives.
pub const DEFAULT_TITLE: &str = "Nova Leitura";

/// Opening message the mentor greets every new session with.
pub const INITIAL_GREETING: &str = "Saudações! Eu sou o Foco Mentor IA. Para que eu possa te guiar na aplicação, me diga: **Qual é o tópico que você está lendo ou qual o desafio de aplicação que você está enfrentando agora?**";

/// Maximum number of characters kept from the first user message in a title.
pub const TITLE_MAX_CHARS: usize = 25;

/// A chat session: one conversation thread with its own history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    /// Unique session identifier.
    pub id: String,
    /// Sidebar title.
    pub title: String,
    /// When the session was created (stored as epoch milliseconds).
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    /// Ordered messages, oldest first.
    pub messages: Vec<Message>,
}

impl ChatSession {
    /// Create a session seeded with the mentor greeting.
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            title: DEFAULT_TITLE.to_string(),
            // Storage keeps milliseconds only.
            created_at: Utc::now().trunc_subsecs(3),
            messages: vec![Message::new(Role::Model, INITIAL_GREETING)],
        }
    }

    /// Rewrite the default title from the first user message.
    ///
    /// Returns `false` when the session already carries a custom title.
    pub fn retitle_from(&mut self, text: &str) -> bool {
        if self.title != DEFAULT_TITLE {
            return false;
        }
        self.title = truncate_title(text);
        true
    }

    /// Find a message by id.
    pub fn message_mut(&mut self, message_id: &str) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    /// Close out replies left streaming by an earlier process.
    ///
    /// Empty placeholders are dropped, partial replies are frozen as they are.
    /// Returns how many messages were touched.
    pub fn settle_interrupted(&mut self) -> usize {
        let before = self.messages.len();
        self.messages
            .retain(|m| !(m.is_streaming() && m.text.is_empty()));
        let mut settled = before - self.messages.len();
        for msg in self.messages.iter_mut().filter(|m| m.is_streaming()) {
            msg.is_streaming = Some(false);
            settled += 1;
        }
        settled
    }

    /// Number of messages currently streaming (0 or 1 when invariants hold).
    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming()).count()
    }
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

/// Cut `text` to [`TITLE_MAX_CHARS`] characters, adding an ellipsis if it was longer.
pub fn truncate_title(text: &str) -> String {
    match text.char_indices().nth(TITLE_MAX_CHARS) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
