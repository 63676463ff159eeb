use crate::core::error::ConfigError;
use crate::core::types::{
    Capability, ModelLists, ProviderDescriptor, ProviderId, ProviderKind, RateLimits,
};

/// Read-only table of every backend the gateway knows about, in declaration
/// order. Adding a backend means adding an entry here plus an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCatalog {
    descriptors: Vec<ProviderDescriptor>,
}

impl ProviderCatalog {
    pub fn new(descriptors: Vec<ProviderDescriptor>) -> Self {
        let mut deduped: Vec<ProviderDescriptor> = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if let Some(existing) = deduped.iter_mut().find(|entry| entry.id == descriptor.id) {
                *existing = descriptor;
            } else {
                deduped.push(descriptor);
            }
        }

        Self {
            descriptors: deduped,
        }
    }

    pub fn builtin() -> Self {
        Self::new(builtin_descriptors())
    }

    pub fn get(&self, provider: ProviderId) -> Option<&ProviderDescriptor> {
        self.descriptors
            .iter()
            .find(|descriptor| descriptor.id == provider)
    }

    pub fn descriptor(&self, provider: ProviderId) -> Result<&ProviderDescriptor, ConfigError> {
        self.get(provider).ok_or_else(|| ConfigError::UnknownProvider {
            name: provider.as_str().to_string(),
        })
    }

    pub fn descriptors(&self) -> &[ProviderDescriptor] {
        &self.descriptors
    }

    /// Providers declaring support for `capability`, in catalog order.
    pub fn supporting(&self, capability: Capability) -> Vec<ProviderId> {
        self.descriptors
            .iter()
            .filter(|descriptor| descriptor.supports(capability))
            .map(|descriptor| descriptor.id)
            .collect()
    }

    /// Points one backend at a different endpoint, e.g. a self-hosted proxy.
    pub fn with_base_url(mut self, provider: ProviderId, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        if let Some(descriptor) = self
            .descriptors
            .iter_mut()
            .find(|descriptor| descriptor.id == provider)
        {
            descriptor.base_url = normalize_base_url(&base_url);
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for descriptor in &self.descriptors {
            if descriptor.base_url.trim().is_empty() {
                return Err(ConfigError::InvalidProviderConfig {
                    provider: descriptor.id,
                    reason: "base_url must not be empty".to_string(),
                });
            }
            if descriptor.credential_key.trim().is_empty() {
                return Err(ConfigError::InvalidProviderConfig {
                    provider: descriptor.id,
                    reason: "credential_key must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn export_catalog_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(&self.descriptors).map_err(|error| {
            ConfigError::InvalidSetting {
                key: "catalog".to_string(),
                reason: error.to_string(),
            }
        })
    }
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

pub(crate) fn builtin_descriptors() -> Vec<ProviderDescriptor> {
    vec![
        descriptor(
            ProviderId::Openrouter,
            "OpenRouter",
            ProviderKind::Gateway,
            "https://openrouter.ai/api/v1",
            "OPENROUTER_API_KEY",
            ModelLists {
                text: models(&[
                    "deepseek/deepseek-chat",
                    "anthropic/claude-3.5-sonnet",
                    "google/gemini-2.5-flash",
                    "x-ai/grok-2",
                    "mistralai/mistral-large",
                    "meta-llama/llama-3.3-70b-instruct",
                ]),
                image: Some(models(&["openrouter/auto"])),
                audio: None,
            },
            (20, 250_000),
        ),
        descriptor(
            ProviderId::Deepseek,
            "DeepSeek",
            ProviderKind::Native,
            "https://api.deepseek.com/v1",
            "DEEPSEEK_API_KEY",
            ModelLists {
                text: models(&["deepseek-chat", "deepseek-reasoner"]),
                image: None,
                audio: None,
            },
            (60, 1_000_000),
        ),
        descriptor(
            ProviderId::Claude,
            "Anthropic Claude",
            ProviderKind::Native,
            "https://api.anthropic.com/v1",
            "ANTHROPIC_API_KEY",
            ModelLists {
                text: models(&["claude-3-5-sonnet-20241022", "claude-3-opus-20240229"]),
                image: None,
                audio: None,
            },
            (50, 400_000),
        ),
        descriptor(
            ProviderId::Grok,
            "Grok (xAI)",
            ProviderKind::Native,
            "https://api.x.ai/v1",
            "GROK_API_KEY",
            ModelLists {
                text: models(&["grok-2-1212", "grok-2-vision-1212"]),
                image: None,
                audio: None,
            },
            (60, 600_000),
        ),
        descriptor(
            ProviderId::Gemini,
            "Google Gemini",
            ProviderKind::Native,
            "https://generativelanguage.googleapis.com/v1beta",
            "GEMINI_API_KEY",
            ModelLists {
                text: models(&["gemini-2.5-flash-preview-09-2025", "gemini-2.5-pro"]),
                image: Some(models(&["imagen-4.0-generate-001"])),
                audio: Some(models(&["gemini-2.5-flash-preview-tts"])),
            },
            (15, 1_000_000),
        ),
        descriptor(
            ProviderId::Together,
            "Together AI",
            ProviderKind::Gateway,
            "https://api.together.xyz/v1",
            "TOGETHER_API_KEY",
            ModelLists {
                text: models(&[
                    "deepseek-ai/DeepSeek-R1",
                    "meta-llama/Meta-Llama-3.1-70B-Instruct-Turbo",
                    "Qwen/QwQ-32B-Preview",
                ]),
                image: Some(models(&["black-forest-labs/FLUX.1-schnell"])),
                audio: None,
            },
            (60, 600_000),
        ),
    ]
}

fn descriptor(
    id: ProviderId,
    name: &str,
    kind: ProviderKind,
    base_url: &str,
    credential_key: &str,
    models: ModelLists,
    (requests_per_minute, tokens_per_minute): (u32, u64),
) -> ProviderDescriptor {
    ProviderDescriptor {
        id,
        name: name.to_string(),
        kind,
        base_url: base_url.to_string(),
        credential_key: credential_key.to_string(),
        models,
        rate_limits: Some(RateLimits {
            requests_per_minute,
            tokens_per_minute,
        }),
    }
}

fn models(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|id| (*id).to_string()).collect()
}

pub(crate) fn normalize_base_url(base_url: &str) -> String {
    base_url.trim().trim_end_matches('/').to_string()
}
