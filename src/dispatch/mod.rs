pub mod formats;
pub mod http;
pub mod registry;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::PrDraftError;

/// Callback receiving incremental text as a backend produces it.
pub type ChunkSink<'a> = dyn FnMut(&str) + Send + 'a;

/// Known LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Claude,
    OpenAi,
    Gemini,
    Copilot,
}

impl Backend {
    /// Discovery order. The first entry wins ties in listings.
    pub const ALL: &'static [Backend] = &[
        Backend::Claude,
        Backend::OpenAi,
        Backend::Gemini,
        Backend::Copilot,
    ];

    /// Symbolic name used in config sections and on the command line.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Copilot => "copilot",
        }
    }

    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Claude => "Claude (Anthropic)",
            Self::OpenAi => "OpenAI GPT",
            Self::Gemini => "Google Gemini",
            Self::Copilot => "GitHub Copilot",
        }
    }

    pub const fn default_model(&self) -> &'static str {
        match self {
            Self::Claude => "claude-sonnet-4-5-20250929",
            Self::OpenAi => "gpt-4o",
            Self::Gemini => "gemini-2.5-flash",
            Self::Copilot => "openai/gpt-4o",
        }
    }

    /// Legacy environment variables, primary first.
    pub const fn env_vars(&self) -> &'static [&'static str] {
        match self {
            Self::Claude => &["ANTHROPIC_API_KEY", "CLAUDE_API_KEY"],
            Self::OpenAi => &["OPENAI_API_KEY"],
            Self::Gemini => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            Self::Copilot => &["GITHUB_COPILOT_TOKEN", "GITHUB_TOKEN"],
        }
    }

    /// Whether the backend's API can deliver text incrementally.
    /// Copilot's endpoint is driven in one-shot mode and streamed synthetically.
    pub const fn native_streaming(&self) -> bool {
        !matches!(self, Self::Copilot)
    }
}

impl FromStr for Backend {
    type Err = PrDraftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        let normalized = match lower.as_str() {
            "anthropic" => "claude",
            "gpt" | "chatgpt" => "openai",
            "google" => "gemini",
            "github" => "copilot",
            other => other,
        };
        Self::ALL
            .iter()
            .find(|b| b.name() == normalized)
            .copied()
            .ok_or_else(|| PrDraftError::UnknownBackend(s.to_string()))
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One discovered backend. Immutable once discovery has produced it.
#[derive(Clone, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub backend: Backend,
    pub credential: String,
    /// Explicit model; None means the backend's default.
    pub model: Option<String>,
    /// Endpoint override from config (tests and proxies).
    pub base_url: Option<String>,
}

impl BackendDescriptor {
    pub fn new(backend: Backend, credential: impl Into<String>) -> Self {
        Self {
            backend,
            credential: credential.into(),
            model: None,
            base_url: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn effective_model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.backend.default_model())
    }
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("backend", &self.backend)
            .field("credential", &"[REDACTED]")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Output of one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    pub content: String,
    pub backend: Backend,
}

/// A live adapter bound to one descriptor.
///
/// Adapters translate the uniform prompt string into their backend's request
/// shape and map responses and failures back into [`PrDraftError`].
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn backend(&self) -> Backend;

    fn model(&self) -> &str;

    /// One non-streaming completion.
    async fn generate(&self, prompt: &str) -> Result<String, PrDraftError>;

    /// Completion delivered through `on_chunk` as it arrives; returns the
    /// assembled text. The default synthesizes chunks from [`Self::generate`].
    async fn generate_stream(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkSink<'_>,
    ) -> Result<String, PrDraftError> {
        let text = self.generate(prompt).await?;
        emit_words(&text, on_chunk);
        Ok(text)
    }
}

impl std::fmt::Debug for dyn BackendAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendAdapter")
            .field("backend", &self.backend())
            .field("model", &self.model())
            .finish()
    }
}

/// Feed `text` to `on_chunk` word by word, keeping the whitespace that follows
/// each word so the concatenated chunks equal the input exactly.
pub fn emit_words(text: &str, on_chunk: &mut ChunkSink<'_>) {
    let mut start = 0;
    let mut in_space = false;
    for (i, c) in text.char_indices() {
        let space = c.is_whitespace();
        if in_space && !space {
            on_chunk(&text[start..i]);
            start = i;
        }
        in_space = space;
    }
    if start < text.len() {
        on_chunk(&text[start..]);
    }
}
