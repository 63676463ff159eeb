use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde_json::{Map, Value, json};

use crate::catalog::normalize_base_url;
use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::ProviderAdapter;
use crate::core::types::{
    Capability, GenerationOptions, ImagePayload, ProviderDescriptor, ProviderId, ResultEnvelope,
    TextFragment, TextPayload, TextRequest, TextStream,
};
use crate::providers::chat_completions::{
    ChatCompletionsTranslator, embedded_error_message, event_stream_fragments,
};
use crate::providers::translator_contract::{
    DecodedText, ProviderTranslator, Sampling, into_envelope, merge_extra, text_envelope,
};
use crate::providers::{is_success_status, probe_reachable};
use crate::transport::http::{DEFAULT_TIMEOUT_MS, HttpTransport, RetryPolicy, build_headers};

const OPENROUTER_DEFAULT_MODEL: &str = "deepseek/deepseek-chat";
const OPENROUTER_DEFAULT_IMAGE_MODEL: &str = "openrouter/auto";
const DEFAULT_HTTP_REFERER: &str = "http://localhost:3000";
const DEFAULT_X_TITLE: &str = "genai-gateway";

/// Attribution headers OpenRouter uses for its app rankings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenRouterAttribution {
    pub http_referer: String,
    pub x_title: String,
}

impl Default for OpenRouterAttribution {
    fn default() -> Self {
        Self {
            http_referer: DEFAULT_HTTP_REFERER.to_string(),
            x_title: DEFAULT_X_TITLE.to_string(),
        }
    }
}

pub struct OpenRouterAdapter {
    descriptor: ProviderDescriptor,
    transport: HttpTransport,
    translator: ChatCompletionsTranslator,
    base_url: String,
    headers: HeaderMap,
}

impl OpenRouterAdapter {
    pub fn new(descriptor: ProviderDescriptor, api_key: &str) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(DEFAULT_TIMEOUT_MS, RetryPolicy::default())?;
        Self::with_transport(
            descriptor,
            api_key,
            OpenRouterAttribution::default(),
            transport,
        )
    }

    pub fn with_transport(
        descriptor: ProviderDescriptor,
        api_key: &str,
        attribution: OpenRouterAttribution,
        transport: HttpTransport,
    ) -> Result<Self, ConfigError> {
        let headers = build_headers(
            ProviderId::Openrouter,
            &[
                ("authorization", &format!("Bearer {}", api_key.trim())),
                ("http-referer", attribution.http_referer.trim()),
                ("x-title", attribution.x_title.trim()),
            ],
        )?;

        Ok(Self {
            base_url: normalize_base_url(&descriptor.base_url),
            descriptor,
            transport,
            translator: ChatCompletionsTranslator {
                provider: ProviderId::Openrouter,
                default_model: OPENROUTER_DEFAULT_MODEL,
            },
            headers,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn complete(&self, request: &TextRequest) -> Result<DecodedText, ProviderError> {
        let encoded = self.translator.encode_request(request)?;
        let response: Value = self
            .transport
            .post_json(
                ProviderId::Openrouter,
                Some(&encoded.model),
                &self.chat_url(),
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
        let model = Sampling::resolve(options, OPENROUTER_DEFAULT_IMAGE_MODEL).model;

        let mut body = Map::new();
        body.insert("model".to_string(), json!(model));
        body.insert(
            "messages".to_string(),
            json!([{ "role": "user", "content": prompt }]),
        );
        body.insert("modalities".to_string(), json!(["image", "text"]));
        merge_extra(&mut body, options);

        let response: Value = self
            .transport
            .post_json(
                ProviderId::Openrouter,
                Some(&model),
                &self.chat_url(),
                &Value::Object(body),
                &self.headers,
            )
            .await?;

        if let Some(message) = embedded_error_message(&response) {
            return Err(ProviderError::protocol(
                ProviderId::Openrouter,
                Some(&model),
                message,
            ));
        }

        response
            .pointer("/choices/0/message/images/0/image_url/url")
            .and_then(Value::as_str)
            .filter(|image| !image.is_empty())
            .map(|image| ImagePayload {
                image: image.to_string(),
            })
            .ok_or_else(|| {
                ProviderError::protocol(
                    ProviderId::Openrouter,
                    Some(&model),
                    "no image data returned",
                )
            })
    }
}

#[async_trait]
impl ProviderAdapter for OpenRouterAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate_text(&self, request: &TextRequest) -> ResultEnvelope<TextPayload> {
        text_envelope(ProviderId::Openrouter, self.complete(request).await)
    }

    async fn generate_image(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> ResultEnvelope<ImagePayload> {
        into_envelope(
            ProviderId::Openrouter,
            Capability::Image,
            self.render_image(prompt, options).await,
        )
    }

    async fn is_available(&self) -> bool {
        let outcome = self
            .transport
            .probe(
                ProviderId::Openrouter,
                Method::GET,
                &format!("{}/key", self.base_url),
                None,
                &self.headers,
            )
            .await;
        probe_reachable(ProviderId::Openrouter, outcome, is_success_status)
    }

    fn stream_text(&self, request: &TextRequest) -> Option<TextStream> {
        let encoded = match self.translator.encode_request(request) {
            Ok(encoded) => encoded,
            Err(error) => {
                return Some(Box::pin(futures::stream::once(async move {
                    TextFragment::Error(error.to_string())
                })));
            }
        };

        let mut body = encoded.body;
        if let Some(fields) = body.as_object_mut() {
            fields.insert("stream".to_string(), Value::Bool(true));
        }

        let transport = self.transport.clone();
        let headers = self.headers.clone();
        let url = self.chat_url();
        let model = encoded.model;
        let idle_timeout = Duration::from_millis(transport.timeout_ms());

        Some(Box::pin(async_stream::stream! {
            let opened = transport
                .post_event_stream(ProviderId::Openrouter, Some(&model), &url, &body, &headers)
                .await;

            match opened {
                Ok(response) => {
                    let mut fragments =
                        event_stream_fragments(ProviderId::Openrouter, response, idle_timeout);
                    while let Some(fragment) = fragments.next().await {
                        yield fragment;
                    }
                }
                Err(error) => {
                    tracing::error!(
                        provider = %ProviderId::Openrouter,
                        capability = %Capability::Text,
                        status_code = error.status_code(),
                        error = %error,
                        "stream could not be opened"
                    );
                    yield TextFragment::Error(error.to_string());
                }
            }
        }))
    }
}
