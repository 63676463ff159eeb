//! Process-environment configuration.
//!
//! Everything the gateway reads from the environment is parsed here, once, so
//! a typo in a provider name fails at startup instead of on the first request.

use std::collections::BTreeMap;
use std::fmt;

use crate::catalog::ProviderCatalog;
use crate::core::error::ConfigError;
use crate::core::types::{Capability, ProviderId};
use crate::transport::http::{DEFAULT_TIMEOUT_MS, RetryPolicy};

pub const GLOBAL_PROVIDER_ENV: &str = "AI_PROVIDER";
/// Older name for the global override; read only when `AI_PROVIDER` is unset.
pub const LEGACY_GLOBAL_PROVIDER_ENV: &str = "NEXT_AI_PROVIDER";
pub const TEXT_PROVIDER_ENV: &str = "AI_TEXT_PROVIDER";
pub const IMAGE_PROVIDER_ENV: &str = "AI_IMAGE_PROVIDER";
pub const AUDIO_PROVIDER_ENV: &str = "AI_AUDIO_PROVIDER";
pub const FALLBACK_PROVIDERS_ENV: &str = "FALLBACK_PROVIDERS";
pub const REQUEST_TIMEOUT_ENV: &str = "AI_REQUEST_TIMEOUT_MS";
pub const STREAM_DELAY_ENV: &str = "AI_STREAM_DELAY_MS";

pub const DEFAULT_PROVIDER: ProviderId = ProviderId::Openrouter;
pub const SMART_DEFAULT_PROVIDER: ProviderId = ProviderId::Gemini;
pub const DEFAULT_STREAM_DELAY_MS: u64 = 20;

/// Env var consulted for a per-capability override.
pub fn capability_override_env(capability: Capability) -> &'static str {
    match capability {
        Capability::Text => TEXT_PROVIDER_ENV,
        Capability::Image => IMAGE_PROVIDER_ENV,
        Capability::Audio => AUDIO_PROVIDER_ENV,
    }
}

/// Which backend to try first for each capability, and what to try next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingPolicy {
    pub default_provider: ProviderId,
    pub global_override: Option<ProviderId>,
    pub capability_overrides: BTreeMap<Capability, ProviderId>,
    pub fallback_providers: Vec<ProviderId>,
    /// Last resort for image and audio once the fallback chain is exhausted.
    pub smart_default: Option<ProviderId>,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            default_provider: DEFAULT_PROVIDER,
            global_override: None,
            capability_overrides: BTreeMap::new(),
            fallback_providers: Vec::new(),
            smart_default: Some(SMART_DEFAULT_PROVIDER),
        }
    }
}

impl RoutingPolicy {
    pub fn with_default_provider(mut self, provider: ProviderId) -> Self {
        self.default_provider = provider;
        self
    }

    pub fn with_global_override(mut self, provider: ProviderId) -> Self {
        self.global_override = Some(provider);
        self
    }

    pub fn with_capability_override(mut self, capability: Capability, provider: ProviderId) -> Self {
        self.capability_overrides.insert(capability, provider);
        self
    }

    pub fn with_fallback_providers(mut self, providers: Vec<ProviderId>) -> Self {
        self.fallback_providers = providers;
        self
    }

    pub fn with_smart_default(mut self, provider: Option<ProviderId>) -> Self {
        self.smart_default = provider;
        self
    }

    /// Capability override, else global override, else the default.
    pub fn primary_for(&self, capability: Capability) -> ProviderId {
        self.capability_overrides
            .get(&capability)
            .copied()
            .or(self.global_override)
            .unwrap_or(self.default_provider)
    }

    /// Every provider the policy can route to, deduplicated, in first-mention
    /// order.
    pub fn named_providers(&self) -> Vec<ProviderId> {
        let mut named = Vec::new();
        let candidates = std::iter::once(self.default_provider)
            .chain(self.global_override)
            .chain(self.capability_overrides.values().copied())
            .chain(self.fallback_providers.iter().copied())
            .chain(self.smart_default);
        for provider in candidates {
            if !named.contains(&provider) {
                named.push(provider);
            }
        }
        named
    }
}

/// Secrets keyed by the descriptor's credential key (e.g. `GEMINI_API_KEY`).
/// Blank values are treated as absent.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialStore {
    secrets: BTreeMap<String, String>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, key: impl Into<String>, secret: impl Into<String>) -> Self {
        self.insert(key, secret);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, secret: impl Into<String>) {
        let secret = secret.into();
        let trimmed = secret.trim();
        if trimmed.is_empty() {
            return;
        }
        self.secrets.insert(key.into(), trimmed.to_string());
    }

    /// Collects the credential of every catalogued backend through `lookup`.
    pub fn from_lookup<F>(catalog: &ProviderCatalog, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut store = Self::new();
        for descriptor in catalog.descriptors() {
            if let Some(secret) = lookup(&descriptor.credential_key) {
                store.insert(descriptor.credential_key.clone(), secret);
            }
        }
        store
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.secrets.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.secrets.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.secrets.keys()).finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub routing: RoutingPolicy,
    pub credentials: CredentialStore,
    pub request_timeout_ms: u64,
    pub stream_delay_ms: u64,
    pub retry_policy: RetryPolicy,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            routing: RoutingPolicy::default(),
            credentials: CredentialStore::default(),
            request_timeout_ms: DEFAULT_TIMEOUT_MS,
            stream_delay_ms: DEFAULT_STREAM_DELAY_MS,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::from_lookup_with_catalog(&ProviderCatalog::builtin(), lookup)
    }

    pub fn from_lookup_with_catalog<F>(
        catalog: &ProviderCatalog,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut routing = RoutingPolicy::default();
        routing.global_override = match parse_optional_provider(&lookup, GLOBAL_PROVIDER_ENV)? {
            Some(provider) => Some(provider),
            None => parse_optional_provider(&lookup, LEGACY_GLOBAL_PROVIDER_ENV)?,
        };
        for capability in Capability::ALL {
            if let Some(provider) =
                parse_optional_provider(&lookup, capability_override_env(capability))?
            {
                routing.capability_overrides.insert(capability, provider);
            }
        }
        if let Some(raw) = lookup(FALLBACK_PROVIDERS_ENV) {
            routing.fallback_providers = parse_provider_list(&raw)?;
        }

        let request_timeout_ms =
            parse_millis(&lookup, REQUEST_TIMEOUT_ENV)?.unwrap_or(DEFAULT_TIMEOUT_MS);
        if request_timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout {
                timeout_ms: request_timeout_ms,
            });
        }
        let stream_delay_ms =
            parse_millis(&lookup, STREAM_DELAY_ENV)?.unwrap_or(DEFAULT_STREAM_DELAY_MS);

        Ok(Self {
            routing,
            credentials: CredentialStore::from_lookup(catalog, &lookup),
            request_timeout_ms,
            stream_delay_ms,
            retry_policy: RetryPolicy::default(),
        })
    }
}

/// Parses a comma-separated provider list. Entries are trimmed, empty entries
/// are skipped, order is kept.
pub fn parse_provider_list(raw: &str) -> Result<Vec<ProviderId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse)
        .collect()
}

fn parse_optional_provider<F>(lookup: &F, key: &str) -> Result<Option<ProviderId>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw.parse().map(Some),
        _ => Ok(None),
    }
}

fn parse_millis<F>(lookup: &F, key: &str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|error| ConfigError::InvalidSetting {
                    key: key.to_string(),
                    reason: format!("expected milliseconds, got {raw:?}: {error}"),
                })
        }
        _ => Ok(None),
    }
}
