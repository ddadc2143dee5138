//! Gemini REST client with SSE streaming.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Serialize;

use super::client::{ChatContext, CompletionClient, CompletionError, Turn};
use super::events::{drain_next_sse_event, extract_sse_data, GeminiEvent, MAX_SSE_BUFFER_BYTES};
use super::prompt::MENTOR_TEMPERATURE;

/// Default model for the mentor.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Public Gemini endpoint.
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Options for talking to Gemini.
#[derive(Debug, Clone)]
pub struct GeminiOptions {
    /// API key (requests fail without it).
    pub api_key: Option<String>,
    /// Model name, e.g. `gemini-2.5-flash`.
    pub model: String,
    /// Base URL up to and including the API version.
    pub base_url: String,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for GeminiOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            temperature: MENTOR_TEMPERATURE,
        }
    }
}

/// Completion client backed by the Gemini `streamGenerateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    options: GeminiOptions,
}

impl GeminiClient {
    pub fn new(options: GeminiOptions) -> Self {
        Self {
            http: reqwest::Client::new(),
            options,
        }
    }

    fn api_key(&self) -> Result<&str, CompletionError> {
        self.options
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(CompletionError::MissingApiKey)
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.options.base_url.trim_end_matches('/'),
            self.options.model
        )
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    contents: Vec<Content<'a>>,
    system_instruction: Content<'a>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

fn build_request<'a>(
    context: &'a ChatContext,
    user_text: &'a str,
    temperature: f32,
) -> GenerateContentRequest<'a> {
    // Gemini rejects parts with empty text.
    let mut contents: Vec<Content<'a>> = context
        .history()
        .iter()
        .filter(|turn| !turn.text.is_empty())
        .map(|turn| Content {
            role: Some(turn.role.as_str()),
            parts: vec![Part { text: &turn.text }],
        })
        .collect();

    contents.push(Content {
        role: Some("user"),
        parts: vec![Part { text: user_text }],
    });

    GenerateContentRequest {
        contents,
        system_instruction: Content {
            role: None,
            parts: vec![Part {
                text: context.system_prompt(),
            }],
        },
        generation_config: GenerationConfig { temperature },
    }
}

/// Append a network read to `buffer` and apply every complete event in it.
///
/// Only bytes still waiting for an event boundary count against the cap.
fn consume_bytes(
    buffer: &mut Vec<u8>,
    bytes: &[u8],
    reply: &mut String,
    on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> Result<(), CompletionError> {
    buffer.extend_from_slice(bytes);

    while let Some(event) = drain_next_sse_event(buffer) {
        if event.is_empty() {
            continue;
        }
        handle_sse_event(&event, reply, on_chunk)?;
    }

    if buffer.len() > MAX_SSE_BUFFER_BYTES {
        return Err(CompletionError::Stream(
            "SSE buffer exceeded maximum size".to_string(),
        ));
    }
    Ok(())
}

/// Apply one raw SSE event to the reply being assembled.
fn handle_sse_event(
    raw: &[u8],
    reply: &mut String,
    on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
) -> Result<(), CompletionError> {
    let event = std::str::from_utf8(raw)
        .map_err(|_| CompletionError::Stream("invalid UTF-8 in event".to_string()))?;

    let Some(data) = extract_sse_data(event) else {
        return Ok(());
    };

    let Some(event) = GeminiEvent::parse(&data) else {
        tracing::warn!(payload_bytes = data.len(), "Skipping unparseable Gemini event");
        return Ok(());
    };

    if event.is_error() {
        return Err(CompletionError::Api(event.error.unwrap_or_default()));
    }

    if let Some(text) = event.get_text() {
        reply.push_str(text);
        on_chunk(text);
    }

    if let Some(usage) = &event.usage {
        tracing::debug!(
            prompt_tokens = usage.prompt_tokens,
            candidates_tokens = usage.candidates_tokens,
            total_tokens = usage.total_tokens,
            model = event.model_version.as_deref().unwrap_or("unknown"),
            "Gemini usage"
        );
    }

    if event.is_blocked() {
        let reason = event.finish_reason.unwrap_or_default();
        return Err(CompletionError::Blocked(reason));
    }

    Ok(())
}

#[async_trait]
impl CompletionClient for GeminiClient {
    fn create_context(
        &self,
        system_prompt: &str,
        history: &[Turn],
    ) -> Result<ChatContext, CompletionError> {
        self.api_key()?;
        Ok(ChatContext::new(system_prompt, history.to_vec()))
    }

    async fn stream_reply(
        &self,
        context: &mut ChatContext,
        user_text: &str,
        on_chunk: &mut (dyn for<'a> FnMut(&'a str) + Send),
    ) -> Result<String, CompletionError> {
        let api_key = self.api_key()?;
        let request = {
            let body = build_request(context, user_text, self.options.temperature);
            tracing::debug!(
                model = %self.options.model,
                turns = body.contents.len(),
                "Sending streamGenerateContent request"
            );
            self.http
                .post(self.stream_url())
                .header("x-goog-api-key", api_key)
                .json(&body)
        };

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut stream = response.bytes_stream();
        let mut buffer: Vec<u8> = Vec::new();
        let mut reply = String::new();

        while let Some(chunk) = stream.next().await {
            consume_bytes(&mut buffer, &chunk?, &mut reply, on_chunk)?;
        }

        // The last event may not be followed by a blank line.
        if !buffer.is_empty() {
            handle_sse_event(&buffer, &mut reply, on_chunk)?;
        }

        context.record_exchange(user_text, &reply);
        Ok(reply)
    }
}
