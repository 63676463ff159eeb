use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde_json::Value;

use crate::catalog::normalize_base_url;
use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::ProviderAdapter;
use crate::core::types::{
    ProviderDescriptor, ProviderId, ResultEnvelope, TextPayload, TextRequest,
};
use crate::providers::chat_completions::ChatCompletionsTranslator;
use crate::providers::{is_success_status, probe_reachable};
use crate::providers::translator_contract::{DecodedText, ProviderTranslator, text_envelope};
use crate::transport::http::{DEFAULT_TIMEOUT_MS, HttpTransport, RetryPolicy, build_headers};

const DEEPSEEK_DEFAULT_MODEL: &str = "deepseek-chat";

pub struct DeepSeekAdapter {
    descriptor: ProviderDescriptor,
    transport: HttpTransport,
    translator: ChatCompletionsTranslator,
    base_url: String,
    headers: HeaderMap,
}

impl DeepSeekAdapter {
    pub fn new(descriptor: ProviderDescriptor, api_key: &str) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(DEFAULT_TIMEOUT_MS, RetryPolicy::default())?;
        Self::with_transport(descriptor, api_key, transport)
    }

    pub fn with_transport(
        descriptor: ProviderDescriptor,
        api_key: &str,
        transport: HttpTransport,
    ) -> Result<Self, ConfigError> {
        let headers = build_headers(
            ProviderId::Deepseek,
            &[("authorization", &format!("Bearer {}", api_key.trim()))],
        )?;

        Ok(Self {
            base_url: normalize_base_url(&descriptor.base_url),
            descriptor,
            transport,
            translator: ChatCompletionsTranslator {
                provider: ProviderId::Deepseek,
                default_model: DEEPSEEK_DEFAULT_MODEL,
            },
            headers,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    async fn complete(&self, request: &TextRequest) -> Result<DecodedText, ProviderError> {
        let encoded = self.translator.encode_request(request)?;
        let response: Value = self
            .transport
            .post_json(
                ProviderId::Deepseek,
                Some(&encoded.model),
                &self.chat_url(),
                &encoded.body,
                &self.headers,
            )
            .await?;

        self.translator.decode_response(&response)
    }
}

#[async_trait]
impl ProviderAdapter for DeepSeekAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate_text(&self, request: &TextRequest) -> ResultEnvelope<TextPayload> {
        text_envelope(ProviderId::Deepseek, self.complete(request).await)
    }

    async fn is_available(&self) -> bool {
        let outcome = self
            .transport
            .probe(
                ProviderId::Deepseek,
                Method::GET,
                &self.models_url(),
                None,
                &self.headers,
            )
            .await;
        probe_reachable(ProviderId::Deepseek, outcome, is_success_status)
    }
}

#[cfg(test)]
mod tests;
