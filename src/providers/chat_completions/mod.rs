//! OpenAI-style `/chat/completions` framing shared by DeepSeek, Together and
//! OpenRouter.

use std::time::Duration;

use futures::StreamExt;
use serde_json::{Map, Value, json};

use crate::core::error::ProviderError;
use crate::core::types::{ProviderId, TextFragment, TextRequest, TextStream, Usage};
use crate::providers::translator_contract::{
    DecodedText, ProviderTranslator, Sampling, merge_extra, text_at, token_count,
};
use crate::transport::http::describe_reqwest_error;

const STREAM_DONE_SENTINEL: &str = "[DONE]";

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChatCompletionsRequest {
    pub model: String,
    pub body: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChatCompletionsTranslator {
    pub provider: ProviderId,
    pub default_model: &'static str,
}

impl ProviderTranslator for ChatCompletionsTranslator {
    type RequestPayload = ChatCompletionsRequest;
    type ResponsePayload = Value;

    fn encode_request(&self, req: &TextRequest) -> Result<Self::RequestPayload, ProviderError> {
        let sampling = Sampling::resolve(&req.options, self.default_model);

        let mut messages = Vec::with_capacity(req.history.len() + 2);
        messages.push(json!({ "role": "system", "content": req.system_prompt }));
        for turn in &req.history {
            messages.push(json!({ "role": turn.role.as_str(), "content": turn.content }));
        }
        messages.push(json!({ "role": "user", "content": req.input }));

        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(sampling.model.clone()));
        body.insert("messages".to_string(), Value::Array(messages));
        body.insert("temperature".to_string(), json!(sampling.temperature));
        body.insert("max_tokens".to_string(), json!(sampling.max_tokens));
        merge_extra(&mut body, &req.options);

        Ok(ChatCompletionsRequest {
            model: sampling.model,
            body: Value::Object(body),
        })
    }

    fn decode_response(&self, payload: &Self::ResponsePayload) -> Result<DecodedText, ProviderError> {
        if let Some(message) = embedded_error_message(payload) {
            return Err(ProviderError::protocol(self.provider, None, message));
        }

        Ok(DecodedText {
            text: text_at(payload, "/choices/0/message/content"),
            usage: Usage {
                prompt_tokens: token_count(payload, "/usage/prompt_tokens"),
                completion_tokens: token_count(payload, "/usage/completion_tokens"),
                total_tokens: token_count(payload, "/usage/total_tokens"),
            },
        })
    }
}

/// Some gateways answer 200 with an `{"error": {...}}` body.
pub(crate) fn embedded_error_message(payload: &Value) -> Option<String> {
    let error = payload.get("error")?;
    if error.is_null() {
        return None;
    }
    error
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| error.as_str())
        .map(str::to_string)
        .or_else(|| Some(error.to_string()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StreamEvent {
    Delta(String),
    Done,
    Error(String),
    Skip,
}

/// Decodes one server-sent `data:` payload of a streamed chat completion.
pub(crate) fn decode_stream_event(data: &str) -> StreamEvent {
    let data = data.trim();
    if data == STREAM_DONE_SENTINEL {
        return StreamEvent::Done;
    }

    let Ok(value) = serde_json::from_str::<Value>(data) else {
        return StreamEvent::Skip;
    };

    if let Some(message) = embedded_error_message(&value) {
        return StreamEvent::Error(message);
    }

    match value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
    {
        Some(content) if !content.is_empty() => StreamEvent::Delta(content.to_string()),
        _ => StreamEvent::Skip,
    }
}

/// Accumulates raw event-stream bytes and hands back complete `data:`
/// payloads. Comment lines and other fields are dropped.
///
/// Bytes are only decoded once a full line has arrived, so a multi-byte
/// character split across network chunks is reassembled intact.
#[derive(Debug, Default)]
pub(crate) struct EventStreamBuffer {
    pending: Vec<u8>,
}

impl EventStreamBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=newline).collect();
            if let Some(data) = data_field(&line[..newline]) {
                payloads.push(data);
            }
        }
        payloads
    }

    /// Flushes a trailing line that arrived without a newline.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.pending);
        data_field(&line)
    }
}

fn data_field(line: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(line);
    line.trim_end_matches('\r')
        .strip_prefix("data:")
        .map(|data| data.trim_start().to_string())
}

/// Turns an open event-stream response into text fragments. Ends after
/// `[DONE]`, at end of body, or right after the first error fragment.
///
/// `idle_timeout` bounds the wait for each chunk, not the whole stream.
pub(crate) fn event_stream_fragments(
    provider: ProviderId,
    response: reqwest::Response,
    idle_timeout: Duration,
) -> TextStream {
    Box::pin(async_stream::stream! {
        let mut bytes = response.bytes_stream();
        let mut buffer = EventStreamBuffer::default();

        loop {
            let next = match tokio::time::timeout(idle_timeout, bytes.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let error = ProviderError::Transport {
                        provider,
                        model: None,
                        message: format!(
                            "event stream idle for more than {} ms",
                            idle_timeout.as_millis()
                        ),
                    };
                    tracing::error!(provider = %provider, error = %error, "stream stalled");
                    yield TextFragment::Error(error.to_string());
                    return;
                }
            };
            let Some(chunk) = next else {
                break;
            };
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    let error = ProviderError::Transport {
                        provider,
                        model: None,
                        message: describe_reqwest_error(error),
                    };
                    tracing::error!(provider = %provider, error = %error, "stream interrupted");
                    yield TextFragment::Error(error.to_string());
                    return;
                }
            };

            for data in buffer.push(&chunk) {
                match decode_stream_event(&data) {
                    StreamEvent::Delta(text) => yield TextFragment::Delta(text),
                    StreamEvent::Done => return,
                    StreamEvent::Error(message) => {
                        yield TextFragment::Error(message);
                        return;
                    }
                    StreamEvent::Skip => {}
                }
            }
        }

        if let Some(data) = buffer.finish() {
            match decode_stream_event(&data) {
                StreamEvent::Delta(text) => yield TextFragment::Delta(text),
                StreamEvent::Error(message) => yield TextFragment::Error(message),
                StreamEvent::Done | StreamEvent::Skip => {}
            }
        }
    })
}
