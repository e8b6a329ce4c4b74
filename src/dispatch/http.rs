use std::time::{Duration, Instant};

use async_trait::async_trait;
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};

use crate::config::HttpSettings;
use crate::dispatch::formats::{ChatApi, HttpCall, StreamEvent, api_for};
use crate::dispatch::{Backend, BackendAdapter, BackendDescriptor, ChunkSink, emit_words};
use crate::error::PrDraftError;

pub const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Cap on error bodies quoted back in `Upstream` messages.
const MAX_ERROR_SNIPPET: usize = 512;

/// Build the shared client. One client (and connection pool) serves every adapter.
pub fn build_client(settings: &HttpSettings) -> Result<Client, PrDraftError> {
    Client::builder()
        .connect_timeout(settings.connect_timeout())
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(4)
        .build()
        .map_err(|e| PrDraftError::Config(format!("failed to build HTTP client: {e}")))
}

/// Adapter that speaks one backend's HTTP API.
pub struct HttpAdapter {
    client: Client,
    backend: Backend,
    model: String,
    api_key: String,
    api: Box<dyn ChatApi>,
    timeout: Duration,
    max_tokens: u32,
}

impl HttpAdapter {
    pub fn new(client: Client, descriptor: &BackendDescriptor, settings: &HttpSettings) -> Self {
        Self {
            client,
            backend: descriptor.backend,
            model: descriptor.effective_model().to_string(),
            api_key: descriptor.credential.clone(),
            api: api_for(descriptor.backend, descriptor.base_url.as_deref()),
            timeout: settings.timeout(),
            max_tokens: settings.max_tokens,
        }
    }

    async fn send(&self, call: HttpCall) -> Result<Response, PrDraftError> {
        let start = Instant::now();
        let mut request = self.client.post(&call.url).timeout(self.timeout);
        for (k, v) in &call.headers {
            request = request.header(k, v);
        }
        let response = request
            .json(&call.body)
            .send()
            .await
            .map_err(|e| transport_error(e, start))?;
        check_status(response, self.backend).await
    }
}

#[async_trait]
impl BackendAdapter for HttpAdapter {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String, PrDraftError> {
        let start = Instant::now();
        let call = self
            .api
            .build_request(prompt, &self.model, &self.api_key, self.max_tokens, false);
        let response = self.send(call).await?;

        if response
            .content_length()
            .is_some_and(|len| len as usize > MAX_RESPONSE_BYTES)
        {
            return Err(too_large(self.backend));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, start))?;
        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(too_large(self.backend));
        }

        let text = self
            .api
            .extract_text(&bytes)?
            .ok_or_else(|| empty_completion(self.backend))?;

        tracing::debug!(
            provider = self.backend.name(),
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            chars = text.len(),
            "completion received"
        );
        Ok(text)
    }

    async fn generate_stream(
        &self,
        prompt: &str,
        on_chunk: &mut ChunkSink<'_>,
    ) -> Result<String, PrDraftError> {
        if !self.backend.native_streaming() {
            let text = self.generate(prompt).await?;
            emit_words(&text, on_chunk);
            return Ok(text);
        }

        let start = Instant::now();
        let call = self
            .api
            .build_request(prompt, &self.model, &self.api_key, self.max_tokens, true);
        let response = self.send(call).await?;

        let mut events = response.bytes_stream().eventsource();
        let mut text = String::new();

        while let Some(event) = events.next().await {
            let event = event.map_err(|e| stream_error(e, self.backend, start))?;
            match self.api.parse_stream_event(&event.event, &event.data)? {
                StreamEvent::Delta(delta) => {
                    if text.len() + delta.len() > MAX_RESPONSE_BYTES {
                        return Err(too_large(self.backend));
                    }
                    on_chunk(&delta);
                    text.push_str(&delta);
                }
                StreamEvent::Done => break,
                StreamEvent::Ignore => {}
                StreamEvent::Error(message) => {
                    return Err(PrDraftError::Stream {
                        provider: self.backend.name().to_string(),
                        message,
                    });
                }
            }
        }

        if text.is_empty() {
            return Err(empty_completion(self.backend));
        }

        tracing::debug!(
            provider = self.backend.name(),
            model = %self.model,
            latency_ms = start.elapsed().as_millis() as u64,
            chars = text.len(),
            "stream complete"
        );
        Ok(text)
    }
}

/// Map non-success statuses onto the error taxonomy. 401/403 become
/// backend-named messages instead of raw transport errors.
pub async fn check_status(response: Response, backend: Backend) -> Result<Response, PrDraftError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let provider = backend.name().to_string();
    let primary_env = backend.env_vars().first().copied().unwrap_or("API key");

    match status {
        StatusCode::UNAUTHORIZED => Err(PrDraftError::AuthFailed {
            provider,
            message: format!(
                "{} rejected the credential; check {primary_env}",
                backend.display_name()
            ),
        }),
        StatusCode::FORBIDDEN => Err(PrDraftError::PermissionDenied {
            provider,
            message: format!(
                "the credential lacks access to this {} model or endpoint",
                backend.display_name()
            ),
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(PrDraftError::RateLimited { provider }),
        _ => {
            let error_bytes = response.bytes().await.unwrap_or_default();
            let snippet = &error_bytes[..error_bytes.len().min(MAX_ERROR_SNIPPET)];
            let text = String::from_utf8_lossy(snippet);
            Err(PrDraftError::Upstream {
                provider,
                message: format!("{status}: {text}"),
                status: Some(status.as_u16()),
            })
        }
    }
}

fn transport_error(e: reqwest::Error, start: Instant) -> PrDraftError {
    if e.is_timeout() {
        PrDraftError::Timeout(start.elapsed().as_millis() as u64)
    } else {
        PrDraftError::Request(e)
    }
}

fn stream_error(
    e: EventStreamError<reqwest::Error>,
    backend: Backend,
    start: Instant,
) -> PrDraftError {
    match e {
        EventStreamError::Transport(e) => transport_error(e, start),
        other => PrDraftError::Stream {
            provider: backend.name().to_string(),
            message: other.to_string(),
        },
    }
}

fn too_large(backend: Backend) -> PrDraftError {
    PrDraftError::Upstream {
        provider: backend.name().to_string(),
        message: format!("response exceeds {MAX_RESPONSE_BYTES} bytes"),
        status: None,
    }
}

fn empty_completion(backend: Backend) -> PrDraftError {
    PrDraftError::Upstream {
        provider: backend.name().to_string(),
        message: "empty completion".to_string(),
        status: None,
    }
}
