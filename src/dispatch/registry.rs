use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::cache::InFlightCache;
use crate::config::{Config, HttpSettings, credential_env_vars};
use crate::dispatch::http::{HttpAdapter, build_client};
use crate::dispatch::{Backend, BackendAdapter, BackendDescriptor, ChunkSink, GenerationResult};
use crate::error::PrDraftError;
use crate::telemetry::PerformanceMonitor;

/// A selectable backend, as presented to whoever disambiguates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderChoice {
    pub backend: Backend,
    pub display_name: &'static str,
    pub model: String,
}

/// Picks one backend when several are available. Returning None means no
/// decision was made.
pub trait ProviderChooser: Send + Sync {
    fn choose(&self, choices: &[ProviderChoice]) -> Option<Backend>;
}

/// Builds adapters from descriptors. Called at most once per instance key
/// while the previous construction for that key is still cached.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn create(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<dyn BackendAdapter>, PrDraftError>;
}

/// Default factory: HTTP adapters sharing one client and connection pool.
pub struct HttpAdapterFactory {
    client: Client,
    settings: HttpSettings,
}

impl HttpAdapterFactory {
    pub fn new(settings: HttpSettings) -> Result<Self, PrDraftError> {
        Ok(Self {
            client: build_client(&settings)?,
            settings,
        })
    }
}

#[async_trait]
impl AdapterFactory for HttpAdapterFactory {
    async fn create(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<dyn BackendAdapter>, PrDraftError> {
        tracing::debug!(
            provider = %descriptor.backend,
            model = descriptor.effective_model(),
            "creating adapter"
        );
        Ok(Arc::new(HttpAdapter::new(
            self.client.clone(),
            descriptor,
            &self.settings,
        )))
    }
}

/// Identity of a constructed adapter. Same backend with a different
/// credential or model is a different instance.
#[derive(Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    backend: Backend,
    credential: String,
    model: String,
}

impl InstanceKey {
    fn of(descriptor: &BackendDescriptor) -> Self {
        Self {
            backend: descriptor.backend,
            credential: descriptor.credential.clone(),
            model: descriptor.effective_model().to_string(),
        }
    }
}

impl std::fmt::Debug for InstanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceKey")
            .field("backend", &self.backend)
            .field("credential", &"[REDACTED]")
            .field("model", &self.model)
            .finish()
    }
}

/// Discovers, selects, lazily builds and drives backends.
///
/// Discovery happens once at construction; adapters are only built on first
/// use. Selection is sticky for the registry's lifetime.
pub struct ProviderRegistry {
    available: Vec<BackendDescriptor>,
    selected: Mutex<Option<Backend>>,
    instances: InFlightCache<InstanceKey, Arc<dyn BackendAdapter>>,
    factory: Arc<dyn AdapterFactory>,
    monitor: Arc<PerformanceMonitor>,
}

impl ProviderRegistry {
    /// Discover backends from `config` and the process environment.
    pub fn from_config(config: &Config) -> Result<Self, PrDraftError> {
        let factory = HttpAdapterFactory::new(config.http.clone())?;
        Ok(Self::with_descriptors(config.discover(), Arc::new(factory)))
    }

    pub fn with_descriptors(
        available: Vec<BackendDescriptor>,
        factory: Arc<dyn AdapterFactory>,
    ) -> Self {
        Self {
            available,
            selected: Mutex::new(None),
            instances: InFlightCache::new(),
            factory,
            monitor: Arc::new(PerformanceMonitor::new()),
        }
    }

    pub fn with_monitor(mut self, monitor: Arc<PerformanceMonitor>) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }

    pub fn available(&self) -> &[BackendDescriptor] {
        &self.available
    }

    pub fn descriptor(&self, backend: Backend) -> Option<&BackendDescriptor> {
        self.available.iter().find(|d| d.backend == backend)
    }

    pub fn is_available(&self, backend: Backend) -> bool {
        self.descriptor(backend).is_some()
    }

    pub fn choices(&self) -> Vec<ProviderChoice> {
        self.available
            .iter()
            .map(|d| ProviderChoice {
                backend: d.backend,
                display_name: d.backend.display_name(),
                model: d.effective_model().to_string(),
            })
            .collect()
    }

    pub fn selected(&self) -> Option<Backend> {
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pin `backend` for the rest of the session.
    pub fn set_provider(&self, backend: Backend) -> Result<(), PrDraftError> {
        if !self.is_available(backend) {
            return Err(PrDraftError::BackendUnavailable {
                backend: backend.to_string(),
            });
        }
        *self.selected.lock().unwrap_or_else(PoisonError::into_inner) = Some(backend);
        tracing::info!(provider = %backend, "provider set");
        Ok(())
    }

    /// Return the session's backend, choosing one if none is selected yet.
    ///
    /// A single available backend is picked without consulting `chooser`.
    /// With several, `chooser` decides; without one (or if it declines) the
    /// call fails with [`PrDraftError::SelectionRequired`].
    pub fn select_provider(
        &self,
        chooser: Option<&dyn ProviderChooser>,
    ) -> Result<Backend, PrDraftError> {
        if let Some(backend) = self.selected() {
            return Ok(backend);
        }

        let backend = match self.available.as_slice() {
            [] => {
                return Err(PrDraftError::NoCredentials {
                    env_vars: credential_env_vars(),
                });
            }
            [only] => only.backend,
            _ => {
                let choices = self.choices();
                chooser
                    .and_then(|c| c.choose(&choices))
                    .filter(|b| self.is_available(*b))
                    .ok_or_else(|| PrDraftError::SelectionRequired {
                        candidates: choices.iter().map(|c| c.backend.to_string()).collect(),
                    })?
            }
        };

        let mut selected = self.selected.lock().unwrap_or_else(PoisonError::into_inner);
        // A concurrent caller may have selected first; theirs stands.
        let backend = *selected.get_or_insert(backend);
        tracing::info!(provider = %backend, "provider selected");
        Ok(backend)
    }

    fn resolve(&self, backend: Option<Backend>) -> Result<Backend, PrDraftError> {
        match backend {
            Some(b) if self.is_available(b) => Ok(b),
            Some(b) => Err(PrDraftError::BackendUnavailable {
                backend: b.to_string(),
            }),
            None => self.select_provider(None),
        }
    }

    /// The adapter for `backend`, constructing it on first use.
    pub async fn instance(
        &self,
        backend: Backend,
    ) -> Result<Arc<dyn BackendAdapter>, PrDraftError> {
        let descriptor = self
            .descriptor(backend)
            .ok_or_else(|| PrDraftError::BackendUnavailable {
                backend: backend.to_string(),
            })?;
        self.load(descriptor).await
    }

    /// The adapter for `descriptor`, shared by every caller with the same
    /// backend, credential and model.
    pub async fn load(
        &self,
        descriptor: &BackendDescriptor,
    ) -> Result<Arc<dyn BackendAdapter>, PrDraftError> {
        let factory = &self.factory;
        self.instances
            .get_or_try_init(InstanceKey::of(descriptor), || factory.create(descriptor))
            .await
    }

    /// One non-streaming completion from `backend`, or the session's backend.
    pub async fn generate_content(
        &self,
        prompt: &str,
        backend: Option<Backend>,
    ) -> Result<GenerationResult, PrDraftError> {
        let backend = self.resolve(backend)?;
        let adapter = self.instance(backend).await?;

        let start = Instant::now();
        let result = adapter.generate(prompt).await;
        self.record(backend, start, result.is_ok());

        result.map(|content| GenerationResult { content, backend })
    }

    /// Streaming completion. `on_chunk` sees text as it arrives; the return
    /// value is the assembled text either way.
    pub async fn generate_content_stream(
        &self,
        prompt: &str,
        backend: Option<Backend>,
        on_chunk: Option<&mut ChunkSink<'_>>,
    ) -> Result<GenerationResult, PrDraftError> {
        let backend = self.resolve(backend)?;
        let adapter = self.instance(backend).await?;

        let mut discard = |_: &str| {};
        let sink: &mut ChunkSink<'_> = match on_chunk {
            Some(sink) => sink,
            None => &mut discard,
        };

        let start = Instant::now();
        let result = adapter.generate_stream(prompt, sink).await;
        self.record(backend, start, result.is_ok());

        result.map(|content| GenerationResult { content, backend })
    }

    fn record(&self, backend: Backend, start: Instant, ok: bool) {
        let elapsed = start.elapsed();
        self.monitor
            .record(&format!("generate:{backend}"), elapsed, ok);
        tracing::debug!(
            provider = %backend,
            elapsed_ms = elapsed.as_millis() as u64,
            ok,
            "generation finished"
        );
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("available", &self.available)
            .field("selected", &self.selected())
            .finish_non_exhaustive()
    }
}
