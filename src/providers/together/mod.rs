use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde_json::{Map, Value, json};

use crate::catalog::normalize_base_url;
use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::ProviderAdapter;
use crate::core::types::{
    Capability, GenerationOptions, ImagePayload, ProviderDescriptor, ProviderId, ResultEnvelope,
    TextPayload, TextRequest,
};
use crate::providers::chat_completions::{ChatCompletionsTranslator, embedded_error_message};
use crate::providers::translator_contract::{
    DecodedText, ProviderTranslator, into_envelope, merge_extra, text_envelope,
};
use crate::providers::{is_success_status, probe_reachable};
use crate::transport::http::{DEFAULT_TIMEOUT_MS, HttpTransport, RetryPolicy, build_headers};

const TOGETHER_DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-R1";
const TOGETHER_DEFAULT_IMAGE_MODEL: &str = "black-forest-labs/FLUX.1-schnell";
const IMAGE_WIDTH: u32 = 1024;
const IMAGE_HEIGHT: u32 = 1024;
const IMAGE_STEPS: u32 = 4;

pub struct TogetherAdapter {
    descriptor: ProviderDescriptor,
    transport: HttpTransport,
    translator: ChatCompletionsTranslator,
    base_url: String,
    headers: HeaderMap,
}

impl TogetherAdapter {
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
            ProviderId::Together,
            &[("authorization", &format!("Bearer {}", api_key.trim()))],
        )?;

        Ok(Self {
            base_url: normalize_base_url(&descriptor.base_url),
            descriptor,
            transport,
            translator: ChatCompletionsTranslator {
                provider: ProviderId::Together,
                default_model: TOGETHER_DEFAULT_MODEL,
            },
            headers,
        })
    }

    async fn complete(&self, request: &TextRequest) -> Result<DecodedText, ProviderError> {
        let encoded = self.translator.encode_request(request)?;
        let response: Value = self
            .transport
            .post_json(
                ProviderId::Together,
                Some(&encoded.model),
                &format!("{}/chat/completions", self.base_url),
                &encoded.body,
                &self.headers,
            )
            .await?;

        self.translator.decode_response(&response)
    }

    async fn render_image(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<ImagePayload, ProviderError> {
        let model = options
            .model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(TOGETHER_DEFAULT_IMAGE_MODEL);

        let mut body = Map::new();
        body.insert("model".to_string(), json!(model));
        body.insert("prompt".to_string(), json!(prompt));
        body.insert("width".to_string(), json!(IMAGE_WIDTH));
        body.insert("height".to_string(), json!(IMAGE_HEIGHT));
        body.insert("steps".to_string(), json!(IMAGE_STEPS));
        body.insert("n".to_string(), json!(1));
        merge_extra(&mut body, options);

        let response: Value = self
            .transport
            .post_json(
                ProviderId::Together,
                Some(model),
                &format!("{}/images/generations", self.base_url),
                &Value::Object(body),
                &self.headers,
            )
            .await?;

        if let Some(message) = embedded_error_message(&response) {
            return Err(ProviderError::protocol(
                ProviderId::Together,
                Some(model),
                message,
            ));
        }

        if let Some(encoded) = response
            .pointer("/data/0/b64_json")
            .and_then(Value::as_str)
            .filter(|encoded| !encoded.is_empty())
        {
            return Ok(ImagePayload {
                image: encoded.to_string(),
            });
        }

        let Some(image_url) = response
            .pointer("/data/0/url")
            .and_then(Value::as_str)
            .filter(|url| !url.is_empty())
        else {
            return Err(ProviderError::protocol(
                ProviderId::Together,
                Some(model),
                "no image data returned",
            ));
        };

        // Hosted result URLs are public; the API key must not leak to them.
        let bytes = self
            .transport
            .get_bytes(ProviderId::Together, image_url, &HeaderMap::new())
            .await?;

        Ok(ImagePayload {
            image: BASE64.encode(bytes),
        })
    }
}

#[async_trait]
impl ProviderAdapter for TogetherAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate_text(&self, request: &TextRequest) -> ResultEnvelope<TextPayload> {
        text_envelope(ProviderId::Together, self.complete(request).await)
    }

    async fn generate_image(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> ResultEnvelope<ImagePayload> {
        into_envelope(
            ProviderId::Together,
            Capability::Image,
            self.render_image(prompt, options).await,
        )
    }

    async fn is_available(&self) -> bool {
        let outcome = self
            .transport
            .probe(
                ProviderId::Together,
                Method::GET,
                &format!("{}/models", self.base_url),
                None,
                &self.headers,
            )
            .await;
        probe_reachable(ProviderId::Together, outcome, is_success_status)
    }
}
