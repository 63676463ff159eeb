use serde_json::{Map, Value};

use crate::core::error::ProviderError;
use crate::core::types::{
    Capability, GenerationOptions, ProviderId, ResultEnvelope, TextPayload, TextRequest, Usage,
};

pub(crate) const DEFAULT_TEMPERATURE: f64 = 0.7;
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 2_000;

/// Internal text translation contract.
///
/// `ProviderAdapter` stays the gateway-facing extension point (transport,
/// credentials, probes). Translators only reshape the uniform request into a
/// backend payload and the backend response back into text plus usage, which
/// keeps them testable without a network.
pub(crate) trait ProviderTranslator {
    /// Backend payload used for outbound request encoding.
    type RequestPayload;

    /// Backend payload used for inbound response decoding.
    type ResponsePayload;

    fn encode_request(&self, req: &TextRequest) -> Result<Self::RequestPayload, ProviderError>;

    fn decode_response(
        &self,
        payload: &Self::ResponsePayload,
    ) -> Result<DecodedText, ProviderError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct DecodedText {
    pub text: String,
    pub usage: Usage,
}

/// Model, temperature and token budget after adapter defaults are applied.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Sampling {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Sampling {
    pub(crate) fn resolve(options: &GenerationOptions, default_model: &str) -> Self {
        Self {
            model: options
                .model
                .as_deref()
                .map(str::trim)
                .filter(|model| !model.is_empty())
                .unwrap_or(default_model)
                .to_string(),
            temperature: options.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        }
    }
}

/// Copies backend-specific extension parameters into `target`, overriding
/// whatever the adapter put there.
pub(crate) fn merge_extra(target: &mut Map<String, Value>, options: &GenerationOptions) {
    for (key, value) in &options.extra {
        target.insert(key.clone(), value.clone());
    }
}

/// Reads a token counter, treating absent or non-numeric values as zero.
pub(crate) fn token_count(value: &Value, pointer: &str) -> u64 {
    value.pointer(pointer).and_then(Value::as_u64).unwrap_or(0)
}

/// Reads a string at `pointer`, empty when the path is missing.
pub(crate) fn text_at(value: &Value, pointer: &str) -> String {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

pub(crate) fn text_envelope(
    provider: ProviderId,
    result: Result<DecodedText, ProviderError>,
) -> ResultEnvelope<TextPayload> {
    match result {
        Ok(decoded) => {
            ResultEnvelope::success_with_usage(TextPayload { text: decoded.text }, decoded.usage)
        }
        Err(error) => failure_envelope(provider, Capability::Text, error),
    }
}

pub(crate) fn into_envelope<T>(
    provider: ProviderId,
    capability: Capability,
    result: Result<T, ProviderError>,
) -> ResultEnvelope<T> {
    match result {
        Ok(payload) => ResultEnvelope::success(payload),
        Err(error) => failure_envelope(provider, capability, error),
    }
}

fn failure_envelope<T>(
    provider: ProviderId,
    capability: Capability,
    error: ProviderError,
) -> ResultEnvelope<T> {
    tracing::error!(
        provider = %provider,
        capability = %capability,
        status_code = error.status_code(),
        error = %error,
        "generation failed"
    );
    ResultEnvelope::failure(error.to_string())
}
