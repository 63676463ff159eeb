use crate::core::types::{Capability, ProviderId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown provider: {name}")]
    UnknownProvider { name: String },
    #[error("provider {provider:?} is catalogued but has no adapter implementation")]
    AdapterNotImplemented { provider: ProviderId },
    #[error("invalid provider config for {provider:?}: {reason}")]
    InvalidProviderConfig {
        provider: ProviderId,
        reason: String,
    },
    #[error("invalid timeout: {timeout_ms} ms")]
    InvalidTimeout { timeout_ms: u64 },
    #[error("invalid retry policy: {reason}")]
    InvalidRetryPolicy { reason: String },
    #[error("invalid setting {key}: {reason}")]
    InvalidSetting { key: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("{capability} generation not supported by {provider_name}")]
    Unsupported {
        provider: ProviderId,
        provider_name: String,
        capability: Capability,
    },
    #[error(
        "provider credentials rejected{context}: {message}",
        context = format_context(Some(.provider), None, .request_id.as_deref(), Some(*.status_code))
    )]
    CredentialsRejected {
        provider: ProviderId,
        status_code: u16,
        request_id: Option<String>,
        message: String,
    },
    #[error(
        "provider transport error{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), None, None)
    )]
    Transport {
        provider: ProviderId,
        model: Option<String>,
        message: String,
    },
    #[error(
        "provider status error{context}: {message}",
        context = format_context(
            Some(.provider),
            .model.as_deref(),
            .request_id.as_deref(),
            Some(*.status_code)
        )
    )]
    Status {
        provider: ProviderId,
        model: Option<String>,
        status_code: u16,
        request_id: Option<String>,
        message: String,
    },
    #[error(
        "provider protocol error{context}: {message}",
        context = format_context(Some(.provider), .model.as_deref(), None, None)
    )]
    Protocol {
        provider: ProviderId,
        model: Option<String>,
        message: String,
    },
    #[error(
        "provider serialization error{context}: {message}",
        context = format_context(
            Some(.provider),
            .model.as_deref(),
            .request_id.as_deref(),
            None
        )
    )]
    Serialization {
        provider: ProviderId,
        model: Option<String>,
        request_id: Option<String>,
        message: String,
    },
}

impl ProviderError {
    pub fn unsupported(provider: ProviderId, provider_name: &str, capability: Capability) -> Self {
        Self::Unsupported {
            provider,
            provider_name: provider_name.to_string(),
            capability,
        }
    }

    pub fn protocol(
        provider: ProviderId,
        model: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self::Protocol {
            provider,
            model: model.map(str::to_string),
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status_code, .. } | Self::CredentialsRejected { status_code, .. } => {
                Some(*status_code)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("no {capability} provider available; configure provider API keys")]
    CapabilityUnavailable { capability: Capability },
}

fn format_context(
    provider: Option<&ProviderId>,
    model: Option<&str>,
    request_id: Option<&str>,
    status_code: Option<u16>,
) -> String {
    let mut context = Vec::new();

    if let Some(provider) = provider {
        context.push(format!("provider={provider:?}"));
    }
    if let Some(model) = model {
        context.push(format!("model={model}"));
    }
    if let Some(request_id) = request_id {
        context.push(format!("request_id={request_id}"));
    }
    if let Some(status_code) = status_code {
        context.push(format!("status_code={status_code}"));
    }

    if context.is_empty() {
        String::new()
    } else {
        format!(" [{}]", context.join(", "))
    }
}
