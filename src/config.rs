use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::{Backend, BackendDescriptor};
use crate::error::PrDraftError;

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "PRDRAFT_CONFIG";

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "prdraft.toml";

/// Per-backend section, e.g. `[claude]`.
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    #[serde(alias = "apiKey")]
    pub api_key: Option<String>,
    #[serde(alias = "apiToken")]
    pub api_token: Option<String>,
    pub model: Option<String>,
    #[serde(alias = "baseUrl")]
    pub base_url: Option<String>,
}

impl BackendSection {
    /// `api_key` wins over `api_token`; blank values count as unset.
    pub fn credential(&self) -> Option<&str> {
        [self.api_key.as_deref(), self.api_token.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
    }
}

impl std::fmt::Debug for BackendSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendSection")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// `[retry]` section. Converted into a policy by `RetryPolicy::from_settings`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

/// `[http]` section shared by every HTTP adapter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub max_tokens: u32,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            connect_timeout_secs: 10,
            max_tokens: 4096,
        }
    }
}

impl HttpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub claude: Option<BackendSection>,
    pub openai: Option<BackendSection>,
    pub gemini: Option<BackendSection>,
    pub copilot: Option<BackendSection>,
    pub retry: RetrySettings,
    pub http: HttpSettings,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self, PrDraftError> {
        toml::from_str(text).map_err(|e| PrDraftError::Config(e.to_string()))
    }

    pub fn from_file(path: &Path) -> Result<Self, PrDraftError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| PrDraftError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Load from `$PRDRAFT_CONFIG`, else `./prdraft.toml` if present, else defaults.
    /// An explicitly named file that cannot be read is an error; a missing
    /// default file is not.
    pub fn load() -> Result<Self, PrDraftError> {
        if let Ok(path) = env::var(CONFIG_PATH_ENV) {
            tracing::debug!(path = %path, "loading config from {CONFIG_PATH_ENV}");
            return Self::from_file(&PathBuf::from(path));
        }
        let default_path = Path::new(DEFAULT_CONFIG_FILE);
        if default_path.exists() {
            tracing::debug!(path = DEFAULT_CONFIG_FILE, "loading config file");
            return Self::from_file(default_path);
        }
        tracing::debug!("no config file found, using environment only");
        Ok(Self::default())
    }

    pub fn section(&self, backend: Backend) -> Option<&BackendSection> {
        match backend {
            Backend::Claude => self.claude.as_ref(),
            Backend::OpenAi => self.openai.as_ref(),
            Backend::Gemini => self.gemini.as_ref(),
            Backend::Copilot => self.copilot.as_ref(),
        }
    }

    /// Resolve one backend's credential: config section first, then each
    /// legacy env var in order.
    pub fn resolve_credential<F>(&self, backend: Backend, lookup: &F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = self.section(backend).and_then(BackendSection::credential) {
            return Some(key.to_string());
        }
        backend.env_vars().iter().find_map(|&var| {
            lookup(var)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    }

    /// Every backend with a resolvable credential, in [`Backend::ALL`] order.
    /// Nothing is instantiated here.
    pub fn discover_with<F>(&self, lookup: F) -> Vec<BackendDescriptor>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut found = Vec::new();
        for &backend in Backend::ALL {
            let Some(credential) = self.resolve_credential(backend, &lookup) else {
                tracing::debug!(
                    provider = backend.name(),
                    "no credential ({}), {} unavailable",
                    backend.env_vars().join(" / "),
                    backend.display_name()
                );
                continue;
            };
            let section = self.section(backend);
            found.push(BackendDescriptor {
                backend,
                credential,
                model: section
                    .and_then(|s| s.model.clone())
                    .filter(|m| !m.trim().is_empty()),
                base_url: section.and_then(|s| s.base_url.clone()),
            });
        }
        tracing::debug!(
            available = ?found.iter().map(|d| d.backend.name()).collect::<Vec<_>>(),
            "backend discovery complete"
        );
        found
    }

    /// Discovery against the process environment.
    pub fn discover(&self) -> Vec<BackendDescriptor> {
        self.discover_with(|name| env::var(name).ok())
    }
}

/// All env var names that would enable at least one backend.
pub fn credential_env_vars() -> Vec<String> {
    Backend::ALL
        .iter()
        .flat_map(|b| b.env_vars().iter().map(|v| (*v).to_string()))
        .collect()
}
