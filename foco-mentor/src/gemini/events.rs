//! Gemini SSE event parsing.
//!
//! `streamGenerateContent?alt=sse` answers with Server-Sent Events whose
//! `data:` payloads are partial `GenerateContentResponse` objects. This module
//! splits the byte stream into events and pulls the text fragments out.

use serde::Serialize;
use serde_json::Value;

/// Upper bound on buffered bytes waiting for an event boundary.
pub const MAX_SSE_BUFFER_BYTES: usize = 4 * 1024 * 1024;

/// Token usage reported by Gemini (usually on the last event).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub candidates_tokens: u64,
    pub total_tokens: u64,
}

/// A parsed Gemini stream event.
#[derive(Debug, Clone, Serialize)]
pub struct GeminiEvent {
    /// Concatenated text of the first candidate's parts.
    pub text: Option<String>,

    /// Finish reason (e.g. "STOP", "SAFETY"), present on the closing event.
    pub finish_reason: Option<String>,

    /// Error message when the payload is an API error object.
    pub error: Option<String>,

    /// Token usage statistics.
    pub usage: Option<TokenUsage>,

    /// Model version that produced the event.
    pub model_version: Option<String>,
}

impl GeminiEvent {
    /// Parse one SSE `data:` payload.
    pub fn parse(data: &str) -> Option<Self> {
        let data = data.trim();
        if data.is_empty() {
            return None;
        }

        let value: Value = serde_json::from_str(data).ok()?;

        let error = value.get("error").map(|err| {
            err.get("message")
                .and_then(Value::as_str)
                .map_or_else(|| err.to_string(), String::from)
        });

        let candidate = value
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first());

        let text = candidate.and_then(extract_text);

        let finish_reason = candidate
            .and_then(|c| c.get("finishReason"))
            .and_then(Value::as_str)
            .map(String::from);

        let model_version = value
            .get("modelVersion")
            .and_then(Value::as_str)
            .map(String::from);

        Some(Self {
            text,
            finish_reason,
            error,
            usage: extract_usage(&value),
            model_version,
        })
    }

    /// Text fragment carried by this event, if any.
    pub fn get_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    /// Whether the event reports an error instead of content.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Whether generation was cut short for a reason other than a normal stop.
    pub fn is_blocked(&self) -> bool {
        matches!(
            self.finish_reason.as_deref(),
            Some("SAFETY" | "RECITATION" | "PROHIBITED_CONTENT" | "BLOCKLIST")
        )
    }
}

/// Join the text parts of a candidate, skipping thought parts.
fn extract_text(candidate: &Value) -> Option<String> {
    let parts = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)?;

    let mut text = String::new();
    let mut found = false;
    for part in parts {
        if part.get("thought").and_then(Value::as_bool) == Some(true) {
            continue;
        }
        if let Some(t) = part.get("text").and_then(Value::as_str) {
            text.push_str(t);
            found = true;
        }
    }

    found.then_some(text)
}

fn extract_usage(value: &Value) -> Option<TokenUsage> {
    let usage = value.get("usageMetadata")?;
    let get = |key: &str| usage.get(key).and_then(Value::as_u64).unwrap_or(0);
    Some(TokenUsage {
        prompt_tokens: get("promptTokenCount"),
        candidates_tokens: get("candidatesTokenCount"),
        total_tokens: get("totalTokenCount"),
    })
}

fn find_sse_event_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    (0..buffer.len()).find_map(|i| {
        let rest = &buffer[i..];
        if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else {
            None
        }
    })
}

/// Remove and return the next complete SSE event from `buffer`.
pub fn drain_next_sse_event(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let (pos, delim_len) = find_sse_event_boundary(buffer)?;
    let event = buffer[..pos].to_vec();
    buffer.drain(..pos + delim_len);
    Some(event)
}

/// Collect the `data:` lines of one SSE event.
pub fn extract_sse_data(event: &str) -> Option<String> {
    let mut data = String::new();
    let mut found = false;

    for line in event.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if let Some(mut rest) = line.strip_prefix("data:") {
            if let Some(stripped) = rest.strip_prefix(' ') {
                rest = stripped;
            }

            if found {
                data.push('\n');
            }
            data.push_str(rest);
            found = true;
        }
    }

    found.then_some(data)
}
