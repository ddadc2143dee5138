//! Data models for chat sessions and messages.

mod message;
mod session;

pub use message::{Message, Role};
pub use session::{ChatSession, DEFAULT_TITLE, INITIAL_GREETING};
