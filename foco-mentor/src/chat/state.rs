//! Session collection and the message state machine.
//!
//! Every transition here is synchronous. The async driver in
//! [`super::service`] sequences them around the remote call:
//!
//! ```text
//! idle -> begin_send -> (apply_chunk)* -> finish_send -> idle
//!                                      \-> fail_send  -> idle
//! ```

use std::collections::HashSet;

use serde::Serialize;

use crate::gemini::Turn;
use crate::models::{ChatSession, Message, Role};

/// Banner shown when a send fails.
pub const SEND_ERROR_MESSAGE: &str = "Ocorreu um erro ao conectar com o mentor. Tente novamente.";

/// A send in flight, addressed by its originating session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSend {
    pub session_id: String,
    pub user_message_id: String,
    pub placeholder_id: String,
    /// Trimmed text that was sent.
    pub text: String,
}

/// What happened to the placeholder when a send failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Nothing had streamed, so the empty bubble was dropped.
    PlaceholderRemoved,
    /// Partial text arrived and is kept as is.
    PartialKept,
    /// The session is gone (deleted mid-stream).
    SessionMissing,
}

/// Result of a delete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// The session was removed; carries the id of the session that is now current.
    Deleted { current_session_id: String, created_new: bool },
    /// The confirmation gate said no.
    Declined,
    NotFound,
}

/// Confirmation gate consulted before deleting a session.
pub trait ConfirmDelete {
    fn confirm(&self, session: &ChatSession) -> bool;
}

impl<F> ConfirmDelete for F
where
    F: Fn(&ChatSession) -> bool,
{
    fn confirm(&self, session: &ChatSession) -> bool {
        self(session)
    }
}

/// All sessions plus the transient UI state around them.
#[derive(Debug, Default, Clone)]
pub struct ChatState {
    sessions: Vec<ChatSession>,
    current_session_id: Option<String>,
    sending: HashSet<String>,
    error: Option<String>,
}

impl ChatState {
    /// Start from persisted sessions.
    ///
    /// Replies that were still streaming when the sessions were stored have no
    /// send behind them anymore, so they are settled here.
    pub fn from_sessions(
        mut sessions: Vec<ChatSession>,
        current_session_id: Option<String>,
    ) -> Self {
        for session in &mut sessions {
            let settled = session.settle_interrupted();
            if settled > 0 {
                tracing::warn!(session_id = %session.id, settled, "Settled interrupted replies");
            }
        }
        let current_session_id =
            current_session_id.filter(|id| sessions.iter().any(|s| &s.id == id));
        Self {
            sessions,
            current_session_id,
            sending: HashSet::new(),
            error: None,
        }
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn current_session_id(&self) -> Option<&str> {
        self.current_session_id.as_deref()
    }

    pub fn session(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    fn session_mut(&mut self, id: &str) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_sending(&self, session_id: &str) -> bool {
        self.sending.contains(session_id)
    }

    /// Whether the current session has a send in progress.
    pub fn is_loading(&self) -> bool {
        self.current_session_id
            .as_deref()
            .is_some_and(|id| self.is_sending(id))
    }

    /// Turns to replay into a remote context, skipping streaming placeholders.
    pub fn history_for(&self, session_id: &str) -> Option<Vec<Turn>> {
        self.history_before(session_id, None)
    }

    /// Like [`Self::history_for`], also leaving out `exclude_id`.
    pub fn history_before(&self, session_id: &str, exclude_id: Option<&str>) -> Option<Vec<Turn>> {
        self.session(session_id).map(|s| {
            s.messages
                .iter()
                .filter(|m| !m.is_streaming() && Some(m.id.as_str()) != exclude_id)
                .map(Turn::from)
                .collect()
        })
    }

    /// Create a fresh session, prepend it and make it current.
    pub fn new_chat(&mut self) -> String {
        let session = ChatSession::new();
        let id = session.id.clone();
        self.sessions.insert(0, session);
        self.current_session_id = Some(id.clone());
        self.error = None;
        id
    }

    /// Make `id` the current session. Unknown ids are ignored.
    pub fn select_session(&mut self, id: &str) -> bool {
        if self.session(id).is_none() {
            return false;
        }
        self.current_session_id = Some(id.to_string());
        true
    }

    /// Delete a session after the gate confirms.
    pub fn delete_session(&mut self, id: &str, confirm: &dyn ConfirmDelete) -> DeleteOutcome {
        let Some(index) = self.sessions.iter().position(|s| s.id == id) else {
            return DeleteOutcome::NotFound;
        };
        if !confirm.confirm(&self.sessions[index]) {
            return DeleteOutcome::Declined;
        }

        self.sessions.remove(index);
        self.sending.remove(id);

        let was_current = self.current_session_id.as_deref() == Some(id);
        if was_current {
            if let Some(first) = self.sessions.first() {
                self.current_session_id = Some(first.id.clone());
            } else {
                let new_id = self.new_chat();
                return DeleteOutcome::Deleted {
                    current_session_id: new_id,
                    created_new: true,
                };
            }
        }

        DeleteOutcome::Deleted {
            current_session_id: self.current_session_id.clone().unwrap_or_default(),
            created_new: false,
        }
    }

    /// Append the user message and the streaming placeholder to the current session.
    ///
    /// Returns `None` without touching anything when the text is blank, there
    /// is no current session, or that session already has a send in flight.
    pub fn begin_send(&mut self, text: &str) -> Option<PendingSend> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let session_id = self.current_session_id.clone()?;
        if self.is_sending(&session_id) {
            return None;
        }
        let session = self.session_mut(&session_id)?;

        let user_message = Message::new(Role::User, text);
        let user_message_id = user_message.id.clone();
        session.messages.push(user_message);
        session.retitle_from(text);

        let placeholder = Message::placeholder();
        let placeholder_id = placeholder.id.clone();
        session.messages.push(placeholder);

        self.sending.insert(session_id.clone());
        self.error = None;

        Some(PendingSend {
            session_id,
            user_message_id,
            placeholder_id,
            text: text.to_string(),
        })
    }

    fn placeholder_mut(&mut self, pending: &PendingSend) -> Option<&mut Message> {
        self.session_mut(&pending.session_id)?
            .message_mut(&pending.placeholder_id)
    }

    /// Append a streamed fragment to the placeholder.
    pub fn apply_chunk(&mut self, pending: &PendingSend, chunk: &str) -> bool {
        match self.placeholder_mut(pending) {
            Some(msg) if msg.is_streaming() => {
                msg.text.push_str(chunk);
                true
            }
            _ => false,
        }
    }

    /// Freeze the placeholder after a successful reply.
    pub fn finish_send(&mut self, pending: &PendingSend) {
        if let Some(msg) = self.placeholder_mut(pending) {
            msg.is_streaming = Some(false);
        }
        self.sending.remove(&pending.session_id);
    }

    /// Clean up after a failed reply and raise the error banner.
    pub fn fail_send(&mut self, pending: &PendingSend) -> FailOutcome {
        self.sending.remove(&pending.session_id);
        self.error = Some(SEND_ERROR_MESSAGE.to_string());

        let Some(session) = self.session_mut(&pending.session_id) else {
            return FailOutcome::SessionMissing;
        };

        let empty = session
            .messages
            .iter()
            .any(|m| m.id == pending.placeholder_id && m.text.is_empty());
        if empty {
            session.messages.retain(|m| m.id != pending.placeholder_id);
            FailOutcome::PlaceholderRemoved
        } else {
            FailOutcome::PartialKept
        }
    }

    /// Serializable view for presentation.
    pub fn snapshot(&self) -> ChatSnapshot {
        ChatSnapshot {
            sessions: self.sessions.clone(),
            current_session_id: self.current_session_id.clone(),
            is_loading: self.is_loading(),
            error: self.error.clone(),
        }
    }
}

/// What the presentation layer renders.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSnapshot {
    pub sessions: Vec<ChatSession>,
    pub current_session_id: Option<String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl ChatSnapshot {
    pub fn current_session(&self) -> Option<&ChatSession> {
        let id = self.current_session_id.as_deref()?;
        self.sessions.iter().find(|s| s.id == id)
    }
}
