use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde_json::{Map, Value, json};

use crate::audio::pcm_to_wav;
use crate::catalog::normalize_base_url;
use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::ProviderAdapter;
use crate::core::types::{
    AudioPayload, Capability, GenerationOptions, ImagePayload, ProviderDescriptor, ProviderId,
    ResultEnvelope, TextPayload, TextRequest, TurnRole, Usage,
};
use crate::providers::chat_completions::embedded_error_message;
use crate::providers::translator_contract::{
    DecodedText, ProviderTranslator, Sampling, into_envelope, text_at, text_envelope, token_count,
};
use crate::providers::{is_success_status, probe_reachable};
use crate::transport::http::{DEFAULT_TIMEOUT_MS, HttpTransport, RetryPolicy};

const GEMINI_DEFAULT_MODEL: &str = "gemini-2.5-flash-preview-09-2025";
const GEMINI_IMAGE_MODEL: &str = "imagen-4.0-generate-001";
const GEMINI_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
const GEMINI_DEFAULT_VOICE: &str = "Fenrir";
const VOICE_OPTION_KEY: &str = "voice";
const WAV_MIME_TYPE: &str = "audio/wav";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct GenerateContentRequest {
    pub model: String,
    pub body: Value,
}

/// `generateContent` framing. Gemini has no system role, so the system prompt
/// travels as the opening user turn, and non-user history turns become
/// `model` turns.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GeminiTranslator;

impl ProviderTranslator for GeminiTranslator {
    type RequestPayload = GenerateContentRequest;
    type ResponsePayload = Value;

    fn encode_request(&self, req: &TextRequest) -> Result<Self::RequestPayload, ProviderError> {
        let sampling = Sampling::resolve(&req.options, GEMINI_DEFAULT_MODEL);

        let mut contents = Vec::with_capacity(req.history.len() + 2);
        contents.push(json!({ "role": "user", "parts": [{ "text": req.system_prompt }] }));
        for turn in &req.history {
            let role = match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant | TurnRole::System => "model",
            };
            contents.push(json!({ "role": role, "parts": [{ "text": turn.content }] }));
        }
        contents.push(json!({ "role": "user", "parts": [{ "text": req.input }] }));

        let mut generation_config = Map::new();
        generation_config.insert("temperature".to_string(), json!(sampling.temperature));
        generation_config.insert("maxOutputTokens".to_string(), json!(sampling.max_tokens));
        for (key, value) in &req.options.extra {
            generation_config.insert(key.clone(), value.clone());
        }

        Ok(GenerateContentRequest {
            model: sampling.model,
            body: json!({
                "contents": contents,
                "generationConfig": Value::Object(generation_config),
            }),
        })
    }

    fn decode_response(&self, payload: &Self::ResponsePayload) -> Result<DecodedText, ProviderError> {
        if let Some(message) = embedded_error_message(payload) {
            return Err(ProviderError::protocol(ProviderId::Gemini, None, message));
        }

        Ok(DecodedText {
            text: text_at(payload, "/candidates/0/content/parts/0/text"),
            usage: Usage {
                prompt_tokens: token_count(payload, "/usageMetadata/promptTokenCount"),
                completion_tokens: token_count(payload, "/usageMetadata/candidatesTokenCount"),
                total_tokens: token_count(payload, "/usageMetadata/totalTokenCount"),
            },
        })
    }
}

pub struct GeminiAdapter {
    descriptor: ProviderDescriptor,
    transport: HttpTransport,
    translator: GeminiTranslator,
    base_url: String,
    api_key: String,
    headers: HeaderMap,
}

impl GeminiAdapter {
    pub fn new(descriptor: ProviderDescriptor, api_key: &str) -> Result<Self, ConfigError> {
        let transport = HttpTransport::new(DEFAULT_TIMEOUT_MS, RetryPolicy::default())?;
        Self::with_transport(descriptor, api_key, transport)
    }

    pub fn with_transport(
        descriptor: ProviderDescriptor,
        api_key: &str,
        transport: HttpTransport,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(ConfigError::InvalidProviderConfig {
                provider: ProviderId::Gemini,
                reason: "api key must not be empty".to_string(),
            });
        }

        Ok(Self {
            base_url: normalize_base_url(&descriptor.base_url),
            descriptor,
            transport,
            translator: GeminiTranslator,
            api_key: api_key.to_string(),
            headers: HeaderMap::new(),
        })
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{model}:{method}?key={}",
            self.base_url, self.api_key
        )
    }

    async fn complete(&self, request: &TextRequest) -> Result<DecodedText, ProviderError> {
        let encoded = self.translator.encode_request(request)?;
        let response: Value = self
            .transport
            .post_json(
                ProviderId::Gemini,
                Some(&encoded.model),
                &self.model_url(&encoded.model, "generateContent"),
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
        let model = Sampling::resolve(options, GEMINI_IMAGE_MODEL).model;

        let mut parameters = Map::new();
        parameters.insert("sampleCount".to_string(), json!(1));
        for (key, value) in &options.extra {
            parameters.insert(key.clone(), value.clone());
        }

        let response: Value = self
            .transport
            .post_json(
                ProviderId::Gemini,
                Some(&model),
                &self.model_url(&model, "predict"),
                &json!({
                    "instances": [{ "prompt": prompt }],
                    "parameters": Value::Object(parameters),
                }),
                &self.headers,
            )
            .await?;

        if let Some(message) = embedded_error_message(&response) {
            return Err(ProviderError::protocol(ProviderId::Gemini, Some(&model), message));
        }

        response
            .pointer("/predictions/0/bytesBase64Encoded")
            .and_then(Value::as_str)
            .filter(|image| !image.is_empty())
            .map(|image| ImagePayload {
                image: image.to_string(),
            })
            .ok_or_else(|| {
                ProviderError::protocol(ProviderId::Gemini, Some(&model), "no image data returned")
            })
    }

    async fn synthesize(
        &self,
        text: &str,
        options: &GenerationOptions,
    ) -> Result<AudioPayload, ProviderError> {
        let model = Sampling::resolve(options, GEMINI_TTS_MODEL).model;
        let voice = options
            .extra
            .get(VOICE_OPTION_KEY)
            .and_then(Value::as_str)
            .filter(|voice| !voice.trim().is_empty())
            .unwrap_or(GEMINI_DEFAULT_VOICE);

        let response: Value = self
            .transport
            .post_json(
                ProviderId::Gemini,
                Some(&model),
                &self.model_url(&model, "generateContent"),
                &json!({
                    "contents": [{ "parts": [{ "text": text }] }],
                    "generationConfig": {
                        "responseModalities": ["AUDIO"],
                        "speechConfig": {
                            "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": voice } }
                        }
                    }
                }),
                &self.headers,
            )
            .await?;

        if let Some(message) = embedded_error_message(&response) {
            return Err(ProviderError::protocol(ProviderId::Gemini, Some(&model), message));
        }

        let encoded_pcm = response
            .pointer("/candidates/0/content/parts/0/inlineData/data")
            .and_then(Value::as_str)
            .filter(|data| !data.is_empty())
            .ok_or_else(|| {
                ProviderError::protocol(ProviderId::Gemini, Some(&model), "no audio data returned")
            })?;

        let pcm = BASE64
            .decode(encoded_pcm)
            .map_err(|error| ProviderError::Serialization {
                provider: ProviderId::Gemini,
                model: Some(model.clone()),
                request_id: None,
                message: format!("audio payload is not valid base64: {error}"),
            })?;

        Ok(AudioPayload {
            audio: BASE64.encode(pcm_to_wav(&pcm)),
            mime_type: WAV_MIME_TYPE.to_string(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate_text(&self, request: &TextRequest) -> ResultEnvelope<TextPayload> {
        text_envelope(ProviderId::Gemini, self.complete(request).await)
    }

    async fn generate_image(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> ResultEnvelope<ImagePayload> {
        into_envelope(
            ProviderId::Gemini,
            Capability::Image,
            self.render_image(prompt, options).await,
        )
    }

    async fn generate_audio(
        &self,
        text: &str,
        options: &GenerationOptions,
    ) -> ResultEnvelope<AudioPayload> {
        into_envelope(
            ProviderId::Gemini,
            Capability::Audio,
            self.synthesize(text, options).await,
        )
    }

    async fn is_available(&self) -> bool {
        let outcome = self
            .transport
            .probe(
                ProviderId::Gemini,
                Method::GET,
                &format!("{}/models?key={}", self.base_url, self.api_key),
                None,
                &self.headers,
            )
            .await;
        probe_reachable(ProviderId::Gemini, outcome, is_success_status)
    }
}
