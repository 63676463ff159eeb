use async_trait::async_trait;

use crate::core::error::ProviderError;
use crate::core::types::{
    AudioPayload, Capability, GenerationOptions, ImagePayload, ProviderDescriptor, ProviderId,
    ProviderKind, ResultEnvelope, TextPayload, TextRequest, TextStream,
};

/// Backend adapter contract.
///
/// Every method answers with an envelope, success or failure; transport and
/// protocol faults never escape an adapter. A capability the backend lacks is
/// reported as a failure envelope, which is a declaration rather than an error.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Catalog entry this adapter was built from.
    fn descriptor(&self) -> &ProviderDescriptor;

    fn id(&self) -> ProviderId {
        self.descriptor().id
    }

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    fn kind(&self) -> ProviderKind {
        self.descriptor().kind
    }

    async fn generate_text(&self, request: &TextRequest) -> ResultEnvelope<TextPayload>;

    async fn generate_image(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> ResultEnvelope<ImagePayload> {
        unsupported(self.descriptor(), Capability::Image)
    }

    async fn generate_audio(
        &self,
        _text: &str,
        _options: &GenerationOptions,
    ) -> ResultEnvelope<AudioPayload> {
        unsupported(self.descriptor(), Capability::Audio)
    }

    /// Lightweight reachability and credential probe. Resolves to `false` on
    /// any network or protocol error.
    async fn is_available(&self) -> bool;

    /// Declared models for `capability`; empty when unsupported.
    fn list_models(&self, capability: Capability) -> Vec<String> {
        self.descriptor()
            .models
            .for_capability(capability)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    /// Native incremental delivery. Adapters without one return `None` and the
    /// streaming bridge paces a whole response instead.
    fn stream_text(&self, _request: &TextRequest) -> Option<TextStream> {
        None
    }
}

fn unsupported<T>(descriptor: &ProviderDescriptor, capability: Capability) -> ResultEnvelope<T> {
    ResultEnvelope::failure(
        ProviderError::unsupported(descriptor.id, &descriptor.name, capability).to_string(),
    )
}
