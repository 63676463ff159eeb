use std::sync::Arc;

use crate::catalog::ProviderCatalog;
use crate::config::{CredentialStore, GatewayConfig, RoutingPolicy};
use crate::core::error::{ConfigError, GatewayError};
use crate::core::traits::ProviderAdapter;
use crate::core::types::{
    AudioPayload, Capability, GenerationOptions, ImagePayload, ResultEnvelope, TextFragment,
    TextPayload, TextRequest, TextStream,
};
use crate::registry::{AdapterFactory, BuiltinAdapterFactory, ProviderRegistry};
use crate::selection::select_provider;
use crate::streaming::{self, StreamPacing};
use crate::transport::http::{DEFAULT_TIMEOUT_MS, RetryPolicy};

/// Uniform entry point for text, image and audio generation.
///
/// Every call selects a backend for its capability, then hands the request to
/// that backend alone. Failures come back as failure envelopes (or a single
/// error fragment when streaming); nothing here returns `Err` after build.
pub struct GenerationGateway {
    registry: ProviderRegistry,
    routing: RoutingPolicy,
    pacing: StreamPacing,
}

pub struct GenerationGatewayBuilder {
    catalog: ProviderCatalog,
    credentials: CredentialStore,
    routing: RoutingPolicy,
    factory: Option<Arc<dyn AdapterFactory>>,
    request_timeout_ms: u64,
    retry_policy: RetryPolicy,
    pacing: StreamPacing,
}

impl GenerationGateway {
    pub fn builder() -> GenerationGatewayBuilder {
        GenerationGatewayBuilder {
            catalog: ProviderCatalog::builtin(),
            credentials: CredentialStore::default(),
            routing: RoutingPolicy::default(),
            factory: None,
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_policy: RetryPolicy::default(),
            pacing: StreamPacing::default(),
        }
    }

    pub fn from_config(config: GatewayConfig) -> Result<Self, ConfigError> {
        Self::builder().with_config(config).build()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn routing(&self) -> &RoutingPolicy {
        &self.routing
    }

    pub async fn select(
        &self,
        capability: Capability,
    ) -> Result<Arc<dyn ProviderAdapter>, GatewayError> {
        select_provider(&self.registry, &self.routing, capability).await
    }

    pub async fn generate_text(&self, request: &TextRequest) -> ResultEnvelope<TextPayload> {
        match self.select(Capability::Text).await {
            Ok(adapter) => adapter.generate_text(request).await,
            Err(error) => selection_failure(error),
        }
    }

    pub async fn generate_image(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> ResultEnvelope<ImagePayload> {
        match self.select(Capability::Image).await {
            Ok(adapter) => adapter.generate_image(prompt, options).await,
            Err(error) => selection_failure(error),
        }
    }

    pub async fn generate_audio(
        &self,
        text: &str,
        options: &GenerationOptions,
    ) -> ResultEnvelope<AudioPayload> {
        match self.select(Capability::Audio).await {
            Ok(adapter) => adapter.generate_audio(text, options).await,
            Err(error) => selection_failure(error),
        }
    }

    pub async fn stream_text(&self, request: TextRequest) -> TextStream {
        match self.select(Capability::Text).await {
            Ok(adapter) => streaming::stream_text(adapter, request, self.pacing),
            Err(error) => {
                tracing::error!(capability = %Capability::Text, error = %error, "stream not started");
                Box::pin(futures::stream::once(async move {
                    TextFragment::Error(error.to_string())
                }))
            }
        }
    }
}

fn selection_failure<T>(error: GatewayError) -> ResultEnvelope<T> {
    tracing::error!(error = %error, "provider selection failed");
    ResultEnvelope::failure(error.to_string())
}

impl GenerationGatewayBuilder {
    /// Applies routing, credentials, timeout, retry and pacing settings from a
    /// parsed configuration.
    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.routing = config.routing;
        self.credentials = config.credentials;
        self.request_timeout_ms = config.request_timeout_ms;
        self.retry_policy = config.retry_policy;
        self.pacing = StreamPacing::from_millis(config.stream_delay_ms);
        self
    }

    pub fn with_catalog(mut self, catalog: ProviderCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_routing(mut self, routing: RoutingPolicy) -> Self {
        self.routing = routing;
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn AdapterFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn with_request_timeout_ms(mut self, request_timeout_ms: u64) -> Self {
        self.request_timeout_ms = request_timeout_ms;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_stream_pacing(mut self, pacing: StreamPacing) -> Self {
        self.pacing = pacing;
        self
    }

    /// Validates the catalog, transport settings and every backend the
    /// routing policy names. Misconfiguration fails here rather than on the
    /// first request.
    pub fn build(self) -> Result<GenerationGateway, ConfigError> {
        self.catalog.validate()?;
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                timeout_ms: self.request_timeout_ms,
            });
        }
        self.retry_policy.validate()?;

        let factory = self.factory.unwrap_or_else(|| {
            Arc::new(BuiltinAdapterFactory::new(
                self.request_timeout_ms,
                self.retry_policy.clone(),
            ))
        });

        for provider in self.routing.named_providers() {
            self.catalog.descriptor(provider)?;
            if !factory.supports(provider) {
                return Err(ConfigError::AdapterNotImplemented { provider });
            }
        }

        tracing::debug!(
            default_provider = %self.routing.default_provider,
            fallbacks = self.routing.fallback_providers.len(),
            "generation gateway configured"
        );

        Ok(GenerationGateway {
            registry: ProviderRegistry::new(self.catalog, self.credentials, factory),
            routing: self.routing,
            pacing: self.pacing,
        })
    }
}
