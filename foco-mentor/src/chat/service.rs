//! Async driver around [`ChatState`].
//!
//! Owns the session state, the remote context of the active session, the
//! session store and an event feed for whatever is rendering the chat.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::gemini::{ChatContext, CompletionClient, CompletionError};
use crate::store::SessionStore;

use super::state::{ChatSnapshot, ChatState, ConfirmDelete, DeleteOutcome, FailOutcome, PendingSend};

/// Capacity of the event feed. Slow subscribers lag rather than block sends.
const EVENT_CAPACITY: usize = 1024;

/// Something the presentation layer may want to redraw for.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ChatEvent {
    /// Sessions, selection, loading or error state changed.
    SessionsChanged { snapshot: ChatSnapshot },
    /// A fragment was appended to a streaming reply.
    Chunk {
        session_id: String,
        message_id: String,
        text: String,
    },
    /// A reply finished streaming.
    SendFinished {
        session_id: String,
        message_id: String,
    },
    /// A reply failed; `error` is the banner text.
    SendFailed {
        session_id: String,
        message_id: String,
        error: String,
        partial_kept: bool,
    },
}

/// How a send ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input, no current session, or a send already in flight.
    Ignored,
    Completed { reply: String },
    Failed { outcome: FailOutcome },
}

/// Remote context together with the session it was built for.
struct ContextSlot {
    session_id: String,
    context: ChatContext,
}

struct Inner {
    state: Mutex<ChatState>,
    context: Mutex<Option<ContextSlot>>,
    client: Arc<dyn CompletionClient>,
    store: SessionStore,
    system_prompt: String,
    events: broadcast::Sender<ChatEvent>,
}

/// Shared handle to the chat. Cheap to clone.
#[derive(Clone)]
pub struct ChatService {
    inner: Arc<Inner>,
}

impl ChatService {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        store: SessionStore,
        system_prompt: impl Into<String>,
    ) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(ChatState::default()),
                context: Mutex::new(None),
                client,
                store,
                system_prompt: system_prompt.into(),
                events,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ChatState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self) -> MutexGuard<'_, Option<ContextSlot>> {
        self.inner
            .context
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a transition and write the collection back.
    fn mutate<R>(&self, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut state = self.state();
        let result = f(&mut state);
        if let Err(e) = self.inner.store.save(state.sessions()) {
            tracing::warn!(error = %e, "Failed to persist sessions");
        }
        result
    }

    fn emit(&self, event: ChatEvent) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn emit_snapshot(&self) {
        let snapshot = self.state().snapshot();
        self.emit(ChatEvent::SessionsChanged { snapshot });
    }

    /// Subscribe to chat events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    /// Current view of sessions, selection, loading and error state.
    pub fn snapshot(&self) -> ChatSnapshot {
        self.state().snapshot()
    }

    /// Load persisted sessions, pick the newest, and prepare its remote context.
    ///
    /// Starts a new chat when nothing usable was stored.
    pub fn initialize(&self) {
        let loaded = self.inner.store.load();
        tracing::info!(sessions = loaded.sessions.len(), "Loaded stored sessions");

        let current = self.mutate(|state| {
            *state = ChatState::from_sessions(loaded.sessions, loaded.current_session_id);
            if state.current_session_id().is_none() {
                state.new_chat();
            }
            state.current_session_id().map(String::from)
        });

        if let Some(id) = current {
            self.establish_context(&id);
        }
        self.emit_snapshot();
    }

    /// Build a fresh remote context for `session_id` from its settled history.
    fn establish_context(&self, session_id: &str) {
        let Some(history) = self.state().history_for(session_id) else {
            return;
        };

        let slot = match self
            .inner
            .client
            .create_context(&self.inner.system_prompt, &history)
        {
            Ok(context) => Some(ContextSlot {
                session_id: session_id.to_string(),
                context,
            }),
            Err(e) => {
                tracing::error!(error = %e, session_id, "Failed to initialize chat context");
                None
            }
        };
        *self.slot() = slot;
    }

    /// Start a new chat and make it current.
    pub fn new_chat(&self) -> String {
        let id = self.mutate(ChatState::new_chat);
        tracing::debug!(session_id = %id, "Created chat session");
        self.establish_context(&id);
        self.emit_snapshot();
        id
    }

    /// Switch to another session. Returns `false` for unknown ids.
    pub fn select_session(&self, id: &str) -> bool {
        let changed = {
            let mut state = self.state();
            if state.current_session_id() == Some(id) {
                return true;
            }
            state.select_session(id)
        };
        if changed {
            self.establish_context(id);
            self.emit_snapshot();
        }
        changed
    }

    /// Delete a session if `confirm` agrees.
    pub fn delete_session(&self, id: &str, confirm: &dyn ConfirmDelete) -> DeleteOutcome {
        let (previous, outcome) = self.mutate(|state| {
            let previous = state.current_session_id().map(String::from);
            (previous, state.delete_session(id, confirm))
        });

        if let DeleteOutcome::Deleted {
            current_session_id, ..
        } = &outcome
        {
            tracing::debug!(session_id = id, "Deleted chat session");
            if previous.as_deref() != Some(current_session_id.as_str()) {
                self.establish_context(current_session_id);
            }
            self.emit_snapshot();
        }
        outcome
    }

    /// Append the user message and placeholder to the current session.
    ///
    /// Returns `None` when the send is ignored.
    pub fn start_send(&self, text: &str) -> Option<PendingSend> {
        let pending = self.mutate(|state| state.begin_send(text))?;
        self.emit_snapshot();
        Some(pending)
    }

    /// Take the context for the pending send's session, building one if needed.
    fn take_context(&self, pending: &PendingSend) -> Result<ChatContext, CompletionError> {
        {
            let mut slot = self.slot();
            if slot
                .as_ref()
                .is_some_and(|s| s.session_id == pending.session_id)
            {
                if let Some(slot) = slot.take() {
                    return Ok(slot.context);
                }
            }
        }

        // History as it was before this send.
        let history = self
            .state()
            .history_before(&pending.session_id, Some(&pending.user_message_id))
            .unwrap_or_default();

        self.inner
            .client
            .create_context(&self.inner.system_prompt, &history)
            .map_err(|e| {
                tracing::error!(error = %e, "Chat session could not be initialized");
                CompletionError::NotInitialized
            })
    }

    /// Return the context to the slot if its session is still the active one.
    fn restore_context(&self, session_id: &str, context: ChatContext) {
        let is_current = self.state().current_session_id() == Some(session_id);
        let mut slot = self.slot();
        let slot_free = slot.as_ref().is_none_or(|s| s.session_id == session_id);
        if is_current && slot_free {
            *slot = Some(ContextSlot {
                session_id: session_id.to_string(),
                context,
            });
        }
    }

    /// Stream the reply for a started send into its placeholder.
    pub async fn complete_send(&self, pending: PendingSend) -> SendOutcome {
        let result = match self.take_context(&pending) {
            Ok(mut context) => {
                let mut on_chunk = |chunk: &str| {
                    if self.mutate(|state| state.apply_chunk(&pending, chunk)) {
                        self.emit(ChatEvent::Chunk {
                            session_id: pending.session_id.clone(),
                            message_id: pending.placeholder_id.clone(),
                            text: chunk.to_string(),
                        });
                    }
                };
                let result = self
                    .inner
                    .client
                    .stream_reply(&mut context, &pending.text, &mut on_chunk)
                    .await;
                self.restore_context(&pending.session_id, context);
                result
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(reply) => {
                self.mutate(|state| state.finish_send(&pending));
                tracing::debug!(
                    session_id = %pending.session_id,
                    reply_chars = reply.chars().count(),
                    "Reply finished"
                );
                self.emit(ChatEvent::SendFinished {
                    session_id: pending.session_id.clone(),
                    message_id: pending.placeholder_id.clone(),
                });
                self.emit_snapshot();
                SendOutcome::Completed { reply }
            }
            Err(e) => {
                tracing::error!(error = %e, session_id = %pending.session_id, "Error sending message");
                let (outcome, error) = self.mutate(|state| {
                    let outcome = state.fail_send(&pending);
                    (outcome, state.error().unwrap_or_default().to_string())
                });
                self.emit(ChatEvent::SendFailed {
                    session_id: pending.session_id.clone(),
                    message_id: pending.placeholder_id.clone(),
                    error,
                    partial_kept: outcome == FailOutcome::PartialKept,
                });
                self.emit_snapshot();
                SendOutcome::Failed { outcome }
            }
        }
    }

    /// Send `text` on the current session and wait for the reply.
    pub async fn send_message(&self, text: &str) -> SendOutcome {
        match self.start_send(text) {
            Some(pending) => self.complete_send(pending).await,
            None => SendOutcome::Ignored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::SEND_ERROR_MESSAGE;
    use crate::gemini::Turn;
    use crate::models::{ChatSession, Message, Role, INITIAL_GREETING};
    use crate::store::{BlobStore, MemoryBlobStore, SESSIONS_KEY};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use tokio::sync::Notify;

    enum Script {
        Reply(Vec<&'static str>),
        FailAfter(Vec<&'static str>),
        Gated(Arc<Notify>, Vec<&'static str>),
    }

    #[derive(Default)]
    struct ScriptedClient {
        scripts: Mutex<VecDeque<Script>>,
        refuse_context: bool,
        created: Mutex<Vec<Vec<Turn>>>,
        replied_with: Mutex<Vec<Vec<Turn>>>,
    }

    impl ScriptedClient {
        fn with(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                ..Self::default()
            })
        }

        fn created(&self) -> Vec<Vec<Turn>> {
            self.created.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        fn create_context(
            &self,
            system_prompt: &str,
            history: &[Turn],
        ) -> Result<ChatContext, CompletionError> {
            if self.refuse_context {
                return Err(CompletionError::MissingApiKey);
            }
            self.created.lock().unwrap().push(history.to_vec());
            Ok(ChatContext::new(system_prompt, history.to_vec()))
        }

        async fn stream_reply(
            &self,
            context: &mut ChatContext,
            user_text: &str,
            on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
        ) -> Result<String, CompletionError> {
            self.replied_with
                .lock()
                .unwrap()
                .push(context.history().to_vec());
            let script = self.scripts.lock().unwrap().pop_front();
            let (chunks, fail) = match script {
                Some(Script::Reply(chunks)) => (chunks, false),
                Some(Script::FailAfter(chunks)) => (chunks, true),
                Some(Script::Gated(gate, chunks)) => {
                    gate.notified().await;
                    (chunks, false)
                }
                None => (Vec::new(), true),
            };

            let mut reply = String::new();
            for chunk in chunks {
                reply.push_str(chunk);
                on_chunk(chunk);
            }
            if fail {
                return Err(CompletionError::Api("boom".to_string()));
            }
            context.record_exchange(user_text, &reply);
            Ok(reply)
        }
    }

    fn service_with(client: Arc<ScriptedClient>, blobs: Arc<MemoryBlobStore>) -> ChatService {
        let service = ChatService::new(client, SessionStore::new(blobs), "mentor");
        service.initialize();
        service
    }

    fn stored(blobs: &MemoryBlobStore) -> Vec<ChatSession> {
        let raw = blobs.read(SESSIONS_KEY).unwrap().unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    #[tokio::test]
    async fn first_run_end_to_end() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let client = ScriptedClient::with(vec![Script::Reply(vec!["1. Defina ", "a meta", "."])]);
        let service = service_with(client.clone(), blobs.clone());

        let snapshot = service.snapshot();
        assert_eq!(snapshot.sessions.len(), 1);
        let s1 = snapshot.sessions[0].clone();
        assert_eq!(snapshot.current_session_id.as_deref(), Some(s1.id.as_str()));
        assert_eq!(s1.messages.len(), 1);
        assert_eq!(s1.messages[0].role, Role::Model);
        assert_eq!(
            client.created(),
            vec![vec![Turn::new(Role::Model, INITIAL_GREETING)]]
        );

        let outcome = service.send_message("Como aplicar metas SMART?").await;
        assert_eq!(
            outcome,
            SendOutcome::Completed {
                reply: "1. Defina a meta.".to_string()
            }
        );

        let sessions = stored(&blobs);
        assert_eq!(sessions.len(), 1);
        let s1 = &sessions[0];
        assert_eq!(s1.title, "Como aplicar metas SMART?");
        assert_eq!(s1.messages.len(), 3);
        assert_eq!(s1.messages[1].text, "Como aplicar metas SMART?");
        assert_eq!(s1.messages[2].text, "1. Defina a meta.");
        assert!(!s1.messages[2].is_streaming());
        assert!(!service.snapshot().is_loading);
    }

    #[tokio::test]
    async fn blank_send_changes_nothing() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let service = service_with(ScriptedClient::with(vec![]), blobs.clone());
        let before = blobs.read(SESSIONS_KEY).unwrap();

        assert_eq!(service.send_message("   ").await, SendOutcome::Ignored);
        assert_eq!(blobs.read(SESSIONS_KEY).unwrap(), before);
    }

    #[tokio::test]
    async fn failure_without_chunks_drops_placeholder() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let client = ScriptedClient::with(vec![Script::FailAfter(vec![])]);
        let service = service_with(client, blobs.clone());

        let outcome = service.send_message("oi").await;
        assert_eq!(
            outcome,
            SendOutcome::Failed {
                outcome: FailOutcome::PlaceholderRemoved
            }
        );

        let snapshot = service.snapshot();
        assert_eq!(snapshot.error.as_deref(), Some(SEND_ERROR_MESSAGE));
        assert!(!snapshot.is_loading);
        let messages = &stored(&blobs)[0].messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::User);
    }

    #[tokio::test]
    async fn failure_after_chunks_keeps_partial_text() {
        let client = ScriptedClient::with(vec![Script::FailAfter(vec!["Meio ", "caminho"])]);
        let service = service_with(client, Arc::new(MemoryBlobStore::new()));

        let outcome = service.send_message("oi").await;
        assert_eq!(
            outcome,
            SendOutcome::Failed {
                outcome: FailOutcome::PartialKept
            }
        );

        let snapshot = service.snapshot();
        let last = snapshot.sessions[0].messages.last().unwrap().clone();
        assert_eq!(last.text, "Meio caminho");
        assert_eq!(snapshot.error.as_deref(), Some(SEND_ERROR_MESSAGE));

        // The lock is released, so the next send goes through.
        assert_eq!(service.send_message("de novo").await, SendOutcome::Failed {
            outcome: FailOutcome::PlaceholderRemoved
        });
    }

    #[tokio::test]
    async fn missing_context_fails_send() {
        let client = Arc::new(ScriptedClient {
            refuse_context: true,
            ..ScriptedClient::default()
        });
        let service = service_with(client.clone(), Arc::new(MemoryBlobStore::new()));

        let outcome = service.send_message("oi").await;
        assert_eq!(
            outcome,
            SendOutcome::Failed {
                outcome: FailOutcome::PlaceholderRemoved
            }
        );
        assert!(client.replied_with.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn context_carries_previous_exchange() {
        let client = ScriptedClient::with(vec![
            Script::Reply(vec!["primeira resposta"]),
            Script::Reply(vec!["segunda resposta"]),
        ]);
        let service = service_with(client.clone(), Arc::new(MemoryBlobStore::new()));

        service.send_message("um").await;
        service.send_message("dois").await;

        let replied = client.replied_with.lock().unwrap().clone();
        assert_eq!(replied[0], vec![Turn::new(Role::Model, INITIAL_GREETING)]);
        assert_eq!(
            replied[1],
            vec![
                Turn::new(Role::Model, INITIAL_GREETING),
                Turn::new(Role::User, "um"),
                Turn::new(Role::Model, "primeira resposta"),
            ]
        );
        // Only the initial context was ever built.
        assert_eq!(client.created().len(), 1);
    }

    #[tokio::test]
    async fn reply_lands_in_origin_session_after_switch() {
        let gate = Arc::new(Notify::new());
        let client = ScriptedClient::with(vec![Script::Gated(gate.clone(), vec!["tarde", "!"])]);
        let service = service_with(client.clone(), Arc::new(MemoryBlobStore::new()));
        let origin = service.snapshot().current_session_id.unwrap();

        let pending = service.start_send("boa").unwrap();
        let task = tokio::spawn({
            let service = service.clone();
            async move { service.complete_send(pending).await }
        });

        let other = service.new_chat();
        gate.notify_one();
        let outcome = task.await.unwrap();
        assert!(matches!(outcome, SendOutcome::Completed { .. }));

        let snapshot = service.snapshot();
        assert_eq!(snapshot.current_session_id.as_deref(), Some(other.as_str()));
        let origin_session = snapshot.sessions.iter().find(|s| s.id == origin).unwrap();
        assert_eq!(origin_session.messages.last().unwrap().text, "tarde!");
        assert!(!origin_session.messages.last().unwrap().is_streaming());
        let other_session = snapshot.sessions.iter().find(|s| s.id == other).unwrap();
        assert_eq!(other_session.messages.len(), 1);
    }

    #[tokio::test]
    async fn switching_rebuilds_context_from_history() {
        let client = ScriptedClient::with(vec![Script::Reply(vec!["resposta"])]);
        let service = service_with(client.clone(), Arc::new(MemoryBlobStore::new()));
        let first = service.snapshot().current_session_id.unwrap();
        service.send_message("pergunta").await;

        service.new_chat();
        assert!(service.select_session(&first));
        assert!(!service.select_session("unknown"));

        let created = client.created();
        assert_eq!(created.len(), 3);
        assert_eq!(
            created[2],
            vec![
                Turn::new(Role::Model, INITIAL_GREETING),
                Turn::new(Role::User, "pergunta"),
                Turn::new(Role::Model, "resposta"),
            ]
        );
    }

    #[tokio::test]
    async fn initialize_resumes_newest_stored_session() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let older = ChatSession::new();
        let mut newer = ChatSession::new();
        newer.created_at = older.created_at + chrono::Duration::seconds(5);
        newer.title = "Hábitos".to_string();
        SessionStore::new(blobs.clone())
            .save(&[older.clone(), newer.clone()])
            .unwrap();

        let service = service_with(ScriptedClient::with(vec![]), blobs);
        let snapshot = service.snapshot();
        assert_eq!(snapshot.sessions.len(), 2);
        assert_eq!(snapshot.current_session_id.as_deref(), Some(newer.id.as_str()));
    }

    #[tokio::test]
    async fn reply_interrupted_by_exit_is_settled_on_reload() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let mut stored_session = ChatSession::new();
        let mut partial = Message::placeholder();
        partial.text.push_str("meio");
        stored_session.messages.push(Message::new(Role::User, "pergunta"));
        stored_session.messages.push(partial);
        stored_session.messages.push(Message::placeholder());
        SessionStore::new(blobs.clone())
            .save(std::slice::from_ref(&stored_session))
            .unwrap();

        let client = ScriptedClient::with(vec![Script::Reply(vec!["ok"])]);
        let service = service_with(client.clone(), blobs.clone());

        let pending = service.start_send("nova pergunta").unwrap();
        let session = service.snapshot().sessions[0].clone();
        assert_eq!(session.streaming_count(), 1);
        assert_eq!(session.messages.len(), 5);
        assert_eq!(session.messages[2].text, "meio");
        assert!(!session.messages[2].is_streaming());

        service.complete_send(pending).await;
        assert!(stored(&blobs)[0].messages.iter().all(|m| !m.is_streaming()));
        // The frozen partial reply is part of the replayed history.
        assert_eq!(
            client.created()[0].last(),
            Some(&Turn::new(Role::Model, "meio"))
        );
    }

    #[tokio::test]
    async fn corrupt_store_starts_fresh() {
        let blobs = Arc::new(MemoryBlobStore::with_blob(SESSIONS_KEY, "corrompido"));
        let service = service_with(ScriptedClient::with(vec![]), blobs.clone());

        let snapshot = service.snapshot();
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].messages[0].text, INITIAL_GREETING);
        assert_eq!(stored(&blobs).len(), 1);
    }

    #[tokio::test]
    async fn deleting_last_session_starts_new_chat() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let client = ScriptedClient::with(vec![]);
        let service = service_with(client.clone(), blobs.clone());
        let only = service.snapshot().current_session_id.unwrap();

        assert_eq!(
            service.delete_session(&only, &|_: &ChatSession| false),
            DeleteOutcome::Declined
        );
        let outcome = service.delete_session(&only, &|_: &ChatSession| true);
        assert!(matches!(
            outcome,
            DeleteOutcome::Deleted {
                created_new: true,
                ..
            }
        ));

        let sessions = stored(&blobs);
        assert_eq!(sessions.len(), 1);
        assert_ne!(sessions[0].id, only);
        assert_eq!(client.created().len(), 2);
    }

    #[tokio::test]
    async fn events_stream_chunks_in_order() {
        let client = ScriptedClient::with(vec![Script::Reply(vec!["Ol", "á, ", "mundo"])]);
        let service = service_with(client, Arc::new(MemoryBlobStore::new()));
        let mut rx = service.subscribe();

        service.send_message("oi").await;

        let mut chunks = Vec::new();
        let mut finished = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                ChatEvent::Chunk { text, .. } => chunks.push(text),
                ChatEvent::SendFinished { .. } => finished = true,
                _ => {}
            }
        }
        assert_eq!(chunks, vec!["Ol", "á, ", "mundo"]);
        assert!(finished);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let event = ChatEvent::Chunk {
            session_id: "s".to_string(),
            message_id: "m".to_string(),
            text: "x".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "chunk");
        assert_eq!(json["sessionId"], "s");
        assert_eq!(json["messageId"], "m");
    }
}
