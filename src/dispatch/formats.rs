use serde_json::{Value, json};

use crate::dispatch::Backend;
use crate::error::PrDraftError;

pub const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
pub const COPILOT_URL: &str = "https://models.github.ai/inference/chat/completions";
pub const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A fully described HTTP POST: url, headers, JSON body.
#[derive(Debug, Clone)]
pub struct HttpCall {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

/// Outcome of decoding one server-sent event.
#[derive(Debug, PartialEq, Eq)]
pub enum StreamEvent {
    Delta(String),
    Done,
    Ignore,
    Error(String),
}

/// Request/response shape of one backend API.
pub trait ChatApi: Send + Sync {
    /// Build the request for a single user prompt.
    fn build_request(
        &self,
        prompt: &str,
        model: &str,
        api_key: &str,
        max_tokens: u32,
        stream: bool,
    ) -> HttpCall;

    /// Pull completion text out of a non-streaming response body.
    /// Ok(None) means the body parsed but carried no text.
    fn extract_text(&self, body: &[u8]) -> Result<Option<String>, PrDraftError>;

    /// Decode one SSE event (`event` is the SSE event name, often empty).
    fn parse_stream_event(&self, event: &str, data: &str) -> Result<StreamEvent, PrDraftError>;
}

pub fn api_for(backend: Backend, base_url: Option<&str>) -> Box<dyn ChatApi> {
    match backend {
        Backend::Claude => Box::new(AnthropicMessagesApi {
            url: base_url.unwrap_or(ANTHROPIC_URL).to_string(),
        }),
        Backend::OpenAi => Box::new(OpenAiChatApi {
            url: base_url.unwrap_or(OPENAI_URL).to_string(),
        }),
        Backend::Copilot => Box::new(OpenAiChatApi {
            url: base_url.unwrap_or(COPILOT_URL).to_string(),
        }),
        Backend::Gemini => Box::new(GeminiApi {
            base_url: base_url
                .unwrap_or(GEMINI_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
        }),
    }
}

fn parse_json(body: &[u8], what: &str) -> Result<Value, PrDraftError> {
    serde_json::from_slice(body)
        .map_err(|e| PrDraftError::SchemaParse(format!("{what}: {e}")))
}

fn error_message(v: &Value) -> Option<String> {
    let err = v.get("error")?;
    Some(
        err["message"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
    )
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible chat completions (OpenAI, GitHub Models)
// ---------------------------------------------------------------------------

pub struct OpenAiChatApi {
    url: String,
}

impl ChatApi for OpenAiChatApi {
    fn build_request(
        &self,
        prompt: &str,
        model: &str,
        api_key: &str,
        max_tokens: u32,
        stream: bool,
    ) -> HttpCall {
        HttpCall {
            url: self.url.clone(),
            headers: vec![
                ("Authorization".to_string(), format!("Bearer {api_key}")),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body: json!({
                "model": model,
                "messages": [{"role": "user", "content": prompt}],
                "max_tokens": max_tokens,
                "stream": stream,
            }),
        }
    }

    fn extract_text(&self, body: &[u8]) -> Result<Option<String>, PrDraftError> {
        let v = parse_json(body, "chat completion")?;
        Ok(v["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .and_then(non_empty))
    }

    fn parse_stream_event(&self, _event: &str, data: &str) -> Result<StreamEvent, PrDraftError> {
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(StreamEvent::Done);
        }
        let v = parse_json(data.as_bytes(), "chat completion chunk")?;
        if let Some(msg) = error_message(&v) {
            return Ok(StreamEvent::Error(msg));
        }
        Ok(match v["choices"][0]["delta"]["content"].as_str() {
            Some(delta) if !delta.is_empty() => StreamEvent::Delta(delta.to_string()),
            _ => StreamEvent::Ignore,
        })
    }
}

// ---------------------------------------------------------------------------
// Anthropic Messages API
// ---------------------------------------------------------------------------

pub struct AnthropicMessagesApi {
    url: String,
}

impl ChatApi for AnthropicMessagesApi {
    fn build_request(
        &self,
        prompt: &str,
        model: &str,
        api_key: &str,
        max_tokens: u32,
        stream: bool,
    ) -> HttpCall {
        HttpCall {
            url: self.url.clone(),
            headers: vec![
                ("x-api-key".to_string(), api_key.to_string()),
                ("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body: json!({
                "model": model,
                "max_tokens": max_tokens,
                "messages": [{"role": "user", "content": prompt}],
                "stream": stream,
            }),
        }
    }

    fn extract_text(&self, body: &[u8]) -> Result<Option<String>, PrDraftError> {
        let v = parse_json(body, "messages response")?;
        let Some(blocks) = v["content"].as_array() else {
            return Ok(None);
        };
        let text: String = blocks
            .iter()
            .filter(|b| b["type"].as_str() == Some("text"))
            .filter_map(|b| b["text"].as_str())
            .collect();
        Ok(non_empty(text))
    }

    fn parse_stream_event(&self, event: &str, data: &str) -> Result<StreamEvent, PrDraftError> {
        let v = parse_json(data.as_bytes(), "messages stream event")?;
        // The `type` field mirrors the SSE event name; fall back to it when absent.
        let kind = v["type"].as_str().unwrap_or(event);
        Ok(match kind {
            "content_block_delta" => match v["delta"]["text"].as_str() {
                Some(text) if !text.is_empty() => StreamEvent::Delta(text.to_string()),
                _ => StreamEvent::Ignore,
            },
            "message_stop" => StreamEvent::Done,
            "error" => StreamEvent::Error(
                error_message(&v).unwrap_or_else(|| "unknown stream error".to_string()),
            ),
            _ => StreamEvent::Ignore,
        })
    }
}

// ---------------------------------------------------------------------------
// Gemini generateContent
// ---------------------------------------------------------------------------

pub struct GeminiApi {
    base_url: String,
}

impl GeminiApi {
    fn candidate_text(v: &Value) -> String {
        v["candidates"][0]["content"]["parts"]
            .as_array()
            .map(|parts| {
                parts
                    .iter()
                    .filter_map(|p| p["text"].as_str())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

impl ChatApi for GeminiApi {
    fn build_request(
        &self,
        prompt: &str,
        model: &str,
        api_key: &str,
        max_tokens: u32,
        stream: bool,
    ) -> HttpCall {
        let url = if stream {
            format!("{}/models/{model}:streamGenerateContent?alt=sse", self.base_url)
        } else {
            format!("{}/models/{model}:generateContent", self.base_url)
        };
        HttpCall {
            url,
            headers: vec![
                ("x-goog-api-key".to_string(), api_key.to_string()),
                ("Content-Type".to_string(), "application/json".to_string()),
            ],
            body: json!({
                "contents": [{"role": "user", "parts": [{"text": prompt}]}],
                "generationConfig": {"maxOutputTokens": max_tokens},
            }),
        }
    }

    fn extract_text(&self, body: &[u8]) -> Result<Option<String>, PrDraftError> {
        let v = parse_json(body, "generateContent response")?;
        Ok(non_empty(Self::candidate_text(&v)))
    }

    fn parse_stream_event(&self, _event: &str, data: &str) -> Result<StreamEvent, PrDraftError> {
        let v = parse_json(data.as_bytes(), "generateContent chunk")?;
        if let Some(msg) = error_message(&v) {
            return Ok(StreamEvent::Error(msg));
        }
        Ok(match non_empty(Self::candidate_text(&v)) {
            Some(text) => StreamEvent::Delta(text),
            None => StreamEvent::Ignore,
        })
    }
}
