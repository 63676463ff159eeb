use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::catalog::ProviderCatalog;
use crate::config::{CredentialStore, GatewayConfig};
use crate::core::error::ConfigError;
use crate::core::traits::ProviderAdapter;
use crate::core::types::{ProviderDescriptor, ProviderId};
use crate::providers::openrouter::OpenRouterAttribution;
use crate::providers::{
    ClaudeAdapter, DeepSeekAdapter, GeminiAdapter, OpenRouterAdapter, TogetherAdapter,
};
use crate::transport::http::{DEFAULT_TIMEOUT_MS, HttpTransport, RetryPolicy};

/// Builds adapter instances from a catalog entry plus its credential.
pub trait AdapterFactory: Send + Sync {
    /// Whether an implementation exists for `provider` at all.
    fn supports(&self, provider: ProviderId) -> bool;

    fn build(
        &self,
        descriptor: &ProviderDescriptor,
        credential: &str,
    ) -> Result<Arc<dyn ProviderAdapter>, ConfigError>;
}

/// Factory for the five shipped adapters. `grok` is catalogued without one.
#[derive(Debug, Clone)]
pub struct BuiltinAdapterFactory {
    timeout_ms: u64,
    retry_policy: RetryPolicy,
    attribution: OpenRouterAttribution,
}

impl BuiltinAdapterFactory {
    pub fn new(timeout_ms: u64, retry_policy: RetryPolicy) -> Self {
        Self {
            timeout_ms,
            retry_policy,
            attribution: OpenRouterAttribution::default(),
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(config.request_timeout_ms, config.retry_policy.clone())
    }

    pub fn with_attribution(mut self, attribution: OpenRouterAttribution) -> Self {
        self.attribution = attribution;
        self
    }
}

impl Default for BuiltinAdapterFactory {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT_MS, RetryPolicy::default())
    }
}

impl AdapterFactory for BuiltinAdapterFactory {
    fn supports(&self, provider: ProviderId) -> bool {
        !matches!(provider, ProviderId::Grok)
    }

    fn build(
        &self,
        descriptor: &ProviderDescriptor,
        credential: &str,
    ) -> Result<Arc<dyn ProviderAdapter>, ConfigError> {
        if !self.supports(descriptor.id) {
            return Err(ConfigError::AdapterNotImplemented {
                provider: descriptor.id,
            });
        }

        let transport = HttpTransport::new(self.timeout_ms, self.retry_policy.clone())?;
        let descriptor = descriptor.clone();

        let adapter: Arc<dyn ProviderAdapter> = match descriptor.id {
            ProviderId::Openrouter => Arc::new(OpenRouterAdapter::with_transport(
                descriptor,
                credential,
                self.attribution.clone(),
                transport,
            )?),
            ProviderId::Deepseek => Arc::new(DeepSeekAdapter::with_transport(
                descriptor, credential, transport,
            )?),
            ProviderId::Claude => Arc::new(ClaudeAdapter::with_transport(
                descriptor, credential, transport,
            )?),
            ProviderId::Gemini => Arc::new(GeminiAdapter::with_transport(
                descriptor, credential, transport,
            )?),
            ProviderId::Together => Arc::new(TogetherAdapter::with_transport(
                descriptor, credential, transport,
            )?),
            ProviderId::Grok => {
                return Err(ConfigError::AdapterNotImplemented {
                    provider: descriptor.id,
                });
            }
        };

        Ok(adapter)
    }
}

/// Resolves backend names to adapter instances, building each at most once.
///
/// Instances are cached for the registry's lifetime and never evicted. A
/// backend whose credential is missing resolves to `None` rather than an
/// error so selection can move on to the next candidate.
pub struct ProviderRegistry {
    catalog: ProviderCatalog,
    credentials: CredentialStore,
    factory: Arc<dyn AdapterFactory>,
    cache: RwLock<BTreeMap<ProviderId, Arc<dyn ProviderAdapter>>>,
}

impl ProviderRegistry {
    pub fn new(
        catalog: ProviderCatalog,
        credentials: CredentialStore,
        factory: Arc<dyn AdapterFactory>,
    ) -> Self {
        Self {
            catalog,
            credentials,
            factory,
            cache: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn catalog(&self) -> &ProviderCatalog {
        &self.catalog
    }

    pub fn factory(&self) -> &dyn AdapterFactory {
        self.factory.as_ref()
    }

    pub fn resolve_name(
        &self,
        name: &str,
    ) -> Result<Option<Arc<dyn ProviderAdapter>>, ConfigError> {
        self.resolve(name.parse()?)
    }

    pub fn resolve(
        &self,
        provider: ProviderId,
    ) -> Result<Option<Arc<dyn ProviderAdapter>>, ConfigError> {
        if let Some(adapter) = self.cached(provider) {
            return Ok(Some(adapter));
        }

        let descriptor = self.catalog.descriptor(provider)?;
        if !self.factory.supports(provider) {
            return Err(ConfigError::AdapterNotImplemented { provider });
        }

        let Some(credential) = self.credentials.get(&descriptor.credential_key) else {
            tracing::debug!(
                provider = %provider,
                credential_key = %descriptor.credential_key,
                "credential not configured; skipping provider"
            );
            return Ok(None);
        };

        // Built outside the lock; a concurrent duplicate loses to the first insert.
        let built = self.factory.build(descriptor, credential)?;
        let mut cache = self
            .cache
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let adapter = cache.entry(provider).or_insert(built);

        Ok(Some(Arc::clone(adapter)))
    }

    pub fn is_cached(&self, provider: ProviderId) -> bool {
        self.cached(provider).is_some()
    }

    fn cached(&self, provider: ProviderId) -> Option<Arc<dyn ProviderAdapter>> {
        self.cache
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&provider)
            .map(Arc::clone)
    }
}
