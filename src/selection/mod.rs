//! Picks the adapter that serves a request.
//!
//! Order: primary, then the fallback list as declared, then (image and audio
//! only) the smart default unless it was already tried. The first candidate
//! that resolves and answers its probe wins. A probe failure only means "try
//! the next one".

use std::sync::Arc;

use crate::config::RoutingPolicy;
use crate::core::error::GatewayError;
use crate::core::traits::ProviderAdapter;
use crate::core::types::{Capability, ProviderId};
use crate::registry::ProviderRegistry;

pub async fn select_provider(
    registry: &ProviderRegistry,
    policy: &RoutingPolicy,
    capability: Capability,
) -> Result<Arc<dyn ProviderAdapter>, GatewayError> {
    let primary = policy.primary_for(capability);
    if let Some(adapter) = probe_candidate(registry, primary, capability).await? {
        tracing::info!(provider = %primary, capability = %capability, "selected primary provider");
        return Ok(adapter);
    }

    for &fallback in &policy.fallback_providers {
        if let Some(adapter) = probe_candidate(registry, fallback, capability).await? {
            tracing::info!(
                provider = %fallback,
                primary = %primary,
                capability = %capability,
                "selected fallback provider"
            );
            return Ok(adapter);
        }
    }

    if matches!(capability, Capability::Image | Capability::Audio)
        && let Some(smart_default) = policy.smart_default
        && smart_default != primary
        && !policy.fallback_providers.contains(&smart_default)
        && let Some(adapter) = probe_candidate(registry, smart_default, capability).await?
    {
        tracing::info!(
            provider = %smart_default,
            capability = %capability,
            "selected smart default provider"
        );
        return Ok(adapter);
    }

    tracing::warn!(capability = %capability, "no provider available");
    Err(GatewayError::CapabilityUnavailable { capability })
}

async fn probe_candidate(
    registry: &ProviderRegistry,
    provider: ProviderId,
    capability: Capability,
) -> Result<Option<Arc<dyn ProviderAdapter>>, GatewayError> {
    let Some(adapter) = registry.resolve(provider)? else {
        return Ok(None);
    };

    if adapter.is_available().await {
        return Ok(Some(adapter));
    }

    tracing::debug!(provider = %provider, capability = %capability, "provider unavailable");
    Ok(None)
}
