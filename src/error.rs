use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrDraftError {
    #[error("no AI backend configured; set one of: {}", env_vars.join(", "))]
    NoCredentials { env_vars: Vec<String> },

    #[error("backend not available: {backend}")]
    BackendUnavailable { backend: String },

    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    #[error("multiple backends available, a choice is required: {}", candidates.join(", "))]
    SelectionRequired { candidates: Vec<String> },

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("upstream error from {provider}: {message}")]
    Upstream {
        provider: String,
        message: String,
        status: Option<u16>,
    },

    #[error("auth failed for {provider}: {message}")]
    AuthFailed { provider: String, message: String },

    #[error("permission denied by {provider}: {message}")]
    PermissionDenied { provider: String, message: String },

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("stream error from {provider}: {message}")]
    Stream { provider: String, message: String },

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("no content received")]
    NoContent,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl PrDraftError {
    /// Extract provider name from structured error variants.
    /// Returns None for variants that don't carry provider context.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::RateLimited { provider }
            | Self::Upstream { provider, .. }
            | Self::AuthFailed { provider, .. }
            | Self::PermissionDenied { provider, .. }
            | Self::Stream { provider, .. } => Some(provider),
            Self::BackendUnavailable { backend } => Some(backend),
            _ => None,
        }
    }

    /// Returns true for transient errors that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) => true,
            Self::Upstream { status, .. } => {
                // status: None = not from HTTP (empty body, oversized) → not retryable
                status.is_some_and(|s| s == 429 || s >= 500)
            }
            Self::Request(e) => is_transient_reqwest(e),
            _ => false,
        }
    }

    /// Produce a sanitized message for display. Never includes request URLs
    /// or upstream response bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::NoCredentials { env_vars } => format!(
                "no AI backend is configured. Set one of these environment variables: {}",
                env_vars.join(", ")
            ),
            Self::BackendUnavailable { backend } => {
                format!("backend '{backend}' was requested but has no credentials configured")
            }
            Self::UnknownBackend(name) => {
                format!("unknown backend '{name}'. Supported: claude, openai, gemini, copilot")
            }
            Self::SelectionRequired { candidates } => {
                format!("choose a backend with --provider: {}", candidates.join(", "))
            }
            Self::Timeout(ms) => format!("request timed out after {ms}ms"),
            Self::RateLimited { provider } => {
                format!("rate limited by {provider}; try again shortly")
            }
            Self::Upstream {
                provider, status, ..
            } => match status {
                Some(code) => format!("{provider} returned HTTP {code}"),
                None => format!("{provider} returned an unusable response"),
            },
            Self::AuthFailed { provider, message } => {
                format!("authentication failed for {provider}: {message}")
            }
            Self::PermissionDenied { provider, message } => {
                format!("{provider} denied access: {message}")
            }
            Self::Request(_) => "request to provider failed".to_string(),
            Self::Stream { provider, .. } => format!("stream from {provider} was interrupted"),
            Self::SchemaParse(_) => "failed to parse provider response".to_string(),
            Self::NoContent => "no content received from the AI backend".to_string(),
            Self::Config(msg) => format!("configuration error: {msg}"),
            Self::Other(msg) => msg.clone(),
        }
    }
}

/// Connection resets, DNS failures and timeouts surface as connect/timeout/request
/// errors; a reqwest error carrying an HTTP status follows the status rules.
pub(crate) fn is_transient_reqwest(e: &reqwest::Error) -> bool {
    if let Some(status) = e.status() {
        return status.as_u16() == 429 || status.is_server_error();
    }
    e.is_timeout() || e.is_connect() || e.is_request() || e.is_body()
}
