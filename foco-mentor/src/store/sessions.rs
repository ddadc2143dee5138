//! Persistence of the session collection as a single JSON blob.

use std::sync::Arc;

use crate::models::ChatSession;

use super::blob::{BlobStore, StoreError};

/// Key the session collection is stored under.
pub const SESSIONS_KEY: &str = "foco_mentor_sessions_v1";

/// Sessions recovered at startup.
#[derive(Debug, Default)]
pub struct LoadedSessions {
    /// Sessions, newest created first.
    pub sessions: Vec<ChatSession>,
    /// Most recently created session, if any.
    pub current_session_id: Option<String>,
}

/// Reads and writes the full session collection.
#[derive(Clone)]
pub struct SessionStore {
    blobs: Arc<dyn BlobStore>,
}

impl SessionStore {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Load persisted sessions.
    ///
    /// A missing, unreadable or corrupt blob yields an empty collection.
    pub fn load(&self) -> LoadedSessions {
        let raw = match self.blobs.read(SESSIONS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return LoadedSessions::default(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stored sessions");
                return LoadedSessions::default();
            }
        };

        let mut sessions: Vec<ChatSession> = match serde_json::from_str(&raw) {
            Ok(sessions) => sessions,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse stored sessions, starting fresh");
                return LoadedSessions::default();
            }
        };

        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let current_session_id = sessions.first().map(|s| s.id.clone());

        LoadedSessions {
            sessions,
            current_session_id,
        }
    }

    /// Overwrite the stored collection. Empty collections are not written.
    pub fn save(&self, sessions: &[ChatSession]) -> Result<(), StoreError> {
        if sessions.is_empty() {
            return Ok(());
        }
        let json = serde_json::to_string(sessions)?;
        self.blobs.write(SESSIONS_KEY, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Message, Role};
    use crate::store::MemoryBlobStore;
    use chrono::{TimeZone, Utc};

    fn session_at(id: &str, millis: i64) -> ChatSession {
        ChatSession {
            id: id.to_string(),
            title: id.to_string(),
            created_at: Utc.timestamp_millis_opt(millis).unwrap(),
            messages: vec![Message::new(Role::Model, "Olá")],
        }
    }

    #[test]
    fn missing_blob_loads_empty() {
        let store = SessionStore::new(Arc::new(MemoryBlobStore::new()));
        let loaded = store.load();
        assert!(loaded.sessions.is_empty());
        assert!(loaded.current_session_id.is_none());
    }

    #[test]
    fn corrupt_blob_loads_empty() {
        let blobs = MemoryBlobStore::with_blob(SESSIONS_KEY, "{not json");
        let store = SessionStore::new(Arc::new(blobs));
        assert!(store.load().sessions.is_empty());
    }

    #[test]
    fn newest_session_becomes_current() {
        let store = SessionStore::new(Arc::new(MemoryBlobStore::new()));
        let sessions = vec![
            session_at("b", 2_000),
            session_at("c", 3_000),
            session_at("a", 1_000),
        ];
        store.save(&sessions).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.current_session_id.as_deref(), Some("c"));
        let order: Vec<&str> = loaded.sessions.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["c", "b", "a"]);
    }

    #[test]
    fn newest_first_collection_loads_unchanged() {
        let store = SessionStore::new(Arc::new(MemoryBlobStore::new()));
        let sessions = vec![session_at("c", 3_000), session_at("b", 2_000)];
        store.save(&sessions).unwrap();
        assert_eq!(store.load().sessions, sessions);
    }

    #[test]
    fn empty_collection_is_not_written() {
        let blobs = Arc::new(MemoryBlobStore::with_blob(SESSIONS_KEY, "[]"));
        let store = SessionStore::new(blobs.clone());
        store.save(&[]).unwrap();
        assert_eq!(blobs.read(SESSIONS_KEY).unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn stored_layout_uses_camel_case_fields() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = SessionStore::new(blobs.clone());
        let mut session = session_at("s1", 1_700_000_000_000);
        session.messages.push(Message::placeholder());
        store.save(std::slice::from_ref(&session)).unwrap();

        let raw = blobs.read(SESSIONS_KEY).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json[0]["createdAt"], 1_700_000_000_000_i64);
        assert!(json[0]["messages"][0].get("isStreaming").is_none());
        assert_eq!(json[0]["messages"][1]["isStreaming"], true);
    }
}
