//! Message model representing one bubble in a chat session.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message typed by the user.
    User,
    /// Message produced by the mentor model.
    Model,
}

impl Role {
    /// Convert role to the string used on the wire and in storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Model => "model",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message in a chat session.
///
/// `text` only grows while `is_streaming` is set; once the flag is cleared the
/// message is frozen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier for the message.
    pub id: String,
    /// Who wrote the message.
    pub role: Role,
    /// Message body (Markdown for model replies).
    pub text: String,
    /// Set while the reply is still arriving.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_streaming: Option<bool>,
}

impl Message {
    /// Create a finished message with a fresh id.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            role,
            text: text.into(),
            is_streaming: None,
        }
    }

    /// Create an empty model message that will receive streamed text.
    pub fn placeholder() -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            role: Role::Model,
            text: String::new(),
            is_streaming: Some(true),
        }
    }

    /// Whether the message is still receiving chunks.
    pub fn is_streaming(&self) -> bool {
        self.is_streaming.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn streaming_flag_is_omitted_when_absent() {
        let msg = Message::new(Role::User, "oi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert!(json.get("isStreaming").is_none());
    }

    #[test]
    fn placeholder_serializes_camel_case_flag() {
        let msg = Message::placeholder();
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "model");
        assert_eq!(json["text"], "");
        assert_eq!(json["isStreaming"], true);
        assert!(msg.is_streaming());
    }

    #[test]
    fn parses_stored_message_without_flag() {
        let json = r#"{"id":"m1","role":"model","text":"Olá"}"#;
        let msg: Message = serde_json::from_str(json).unwrap();
        assert_eq!(msg.role, Role::Model);
        assert!(!msg.is_streaming());
    }
}
