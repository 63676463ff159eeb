use async_trait::async_trait;
use reqwest::Method;
use reqwest::header::HeaderMap;
use serde_json::{Map, Value, json};

use crate::catalog::normalize_base_url;
use crate::core::error::{ConfigError, ProviderError};
use crate::core::traits::ProviderAdapter;
use crate::core::types::{
    ProviderDescriptor, ProviderId, ResultEnvelope, TextPayload, TextRequest, TurnRole, Usage,
};
use crate::providers::chat_completions::embedded_error_message;
use crate::providers::probe_reachable;
use crate::providers::translator_contract::{
    DecodedText, ProviderTranslator, Sampling, merge_extra, text_at, text_envelope, token_count,
};
use crate::transport::http::{DEFAULT_TIMEOUT_MS, HttpTransport, RetryPolicy, build_headers};

const CLAUDE_DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";
const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct MessagesRequest {
    pub model: String,
    pub body: Value,
}

/// Anthropic Messages framing. The system prompt is a top-level field and
/// the conversation only knows `user` and `assistant` turns.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ClaudeTranslator;

impl ProviderTranslator for ClaudeTranslator {
    type RequestPayload = MessagesRequest;
    type ResponsePayload = Value;

    fn encode_request(&self, req: &TextRequest) -> Result<Self::RequestPayload, ProviderError> {
        let sampling = Sampling::resolve(&req.options, CLAUDE_DEFAULT_MODEL);

        let mut messages: Vec<Value> = req
            .history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant | TurnRole::System => "assistant",
                };
                json!({ "role": role, "content": turn.content })
            })
            .collect();
        messages.push(json!({ "role": "user", "content": req.input }));

        let mut body = Map::new();
        body.insert("model".to_string(), json!(sampling.model));
        body.insert("max_tokens".to_string(), json!(sampling.max_tokens));
        body.insert("temperature".to_string(), json!(sampling.temperature));
        body.insert("system".to_string(), json!(req.system_prompt));
        body.insert("messages".to_string(), Value::Array(messages));
        merge_extra(&mut body, &req.options);

        Ok(MessagesRequest {
            model: sampling.model,
            body: Value::Object(body),
        })
    }

    fn decode_response(&self, payload: &Self::ResponsePayload) -> Result<DecodedText, ProviderError> {
        if let Some(message) = embedded_error_message(payload) {
            return Err(ProviderError::protocol(ProviderId::Claude, None, message));
        }

        let prompt_tokens = token_count(payload, "/usage/input_tokens");
        let completion_tokens = token_count(payload, "/usage/output_tokens");

        Ok(DecodedText {
            text: text_at(payload, "/content/0/text"),
            usage: Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            },
        })
    }
}

pub struct ClaudeAdapter {
    descriptor: ProviderDescriptor,
    transport: HttpTransport,
    translator: ClaudeTranslator,
    base_url: String,
    headers: HeaderMap,
}

impl ClaudeAdapter {
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
            ProviderId::Claude,
            &[
                ("x-api-key", api_key.trim()),
                ("anthropic-version", ANTHROPIC_VERSION),
            ],
        )?;

        Ok(Self {
            base_url: normalize_base_url(&descriptor.base_url),
            descriptor,
            transport,
            translator: ClaudeTranslator,
            headers,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url)
    }

    async fn complete(&self, request: &TextRequest) -> Result<DecodedText, ProviderError> {
        let encoded = self.translator.encode_request(request)?;
        let response: Value = self
            .transport
            .post_json(
                ProviderId::Claude,
                Some(&encoded.model),
                &self.messages_url(),
                &encoded.body,
                &self.headers,
            )
            .await?;

        self.translator.decode_response(&response)
    }
}

/// A 400 still proves the endpoint is reachable and the key was accepted far
/// enough to validate the body.
fn accepts_probe_status(status_code: u16) -> bool {
    (200..300).contains(&status_code) || status_code == 400
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn generate_text(&self, request: &TextRequest) -> ResultEnvelope<TextPayload> {
        text_envelope(ProviderId::Claude, self.complete(request).await)
    }

    async fn is_available(&self) -> bool {
        let probe_body = json!({
            "model": CLAUDE_DEFAULT_MODEL,
            "max_tokens": 1,
            "messages": [{ "role": "user", "content": "test" }],
        });
        let outcome = self
            .transport
            .probe(
                ProviderId::Claude,
                Method::POST,
                &self.messages_url(),
                Some(&probe_body),
                &self.headers,
            )
            .await;
        probe_reachable(ProviderId::Claude, outcome, accepts_probe_status)
    }
}
