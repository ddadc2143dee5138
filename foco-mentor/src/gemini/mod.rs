//! Gemini completion client.

mod client;
mod events;
mod prompt;
mod stream;

pub use client::{ChatContext, CompletionClient, CompletionError, Turn};
pub use prompt::{MENTOR_SYSTEM_PROMPT, MENTOR_TEMPERATURE};
pub use stream::{GeminiClient, GeminiOptions, DEFAULT_BASE_URL, DEFAULT_MODEL};
