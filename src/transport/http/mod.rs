use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Response};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::error::{ConfigError, ProviderError};
use crate::core::types::ProviderId;

pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

const REQUEST_ID_HEADERS: [&str; 2] = ["x-request-id", "request-id"];
const MAX_ERROR_MESSAGE_CHARS: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub retryable_status_codes: Vec<u16>,
}

impl RetryPolicy {
    /// Single attempt, used by probes and tests.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            retryable_status_codes: Vec::new(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: "max_attempts must be >= 1".to_string(),
            });
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: "max_backoff_ms must be >= initial_backoff_ms".to_string(),
            });
        }
        if let Some(status) = self
            .retryable_status_codes
            .iter()
            .copied()
            .find(|status| !(100..=599).contains(status))
        {
            return Err(ConfigError::InvalidRetryPolicy {
                reason: format!("retryable status code must be in 100..=599: {status}"),
            });
        }
        Ok(())
    }

    fn should_retry_status(&self, status_code: u16) -> bool {
        self.retryable_status_codes.contains(&status_code)
    }

    fn backoff_duration_for_retry(&self, retry_index: u32) -> Duration {
        let shift = retry_index.min(63);
        let multiplier = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        let backoff_ms = self
            .initial_backoff_ms
            .saturating_mul(multiplier)
            .min(self.max_backoff_ms);
        Duration::from_millis(backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            retryable_status_codes: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

/// Thin reqwest wrapper shared by every adapter. Each call carries its own
/// timeout; nothing here holds state across requests besides the pooled
/// client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    retry_policy: RetryPolicy,
    timeout_ms: u64,
    probe_timeout_ms: u64,
}

impl HttpTransport {
    pub fn new(timeout_ms: u64, retry_policy: RetryPolicy) -> Result<Self, ConfigError> {
        Self::with_client(reqwest::Client::new(), timeout_ms, retry_policy)
    }

    pub fn with_client(
        client: reqwest::Client,
        timeout_ms: u64,
        retry_policy: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        Self::validate_timeout(timeout_ms)?;
        retry_policy.validate()?;

        Ok(Self {
            client,
            retry_policy,
            timeout_ms,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS.min(timeout_ms),
        })
    }

    pub fn with_probe_timeout(mut self, probe_timeout_ms: u64) -> Result<Self, ConfigError> {
        Self::validate_timeout(probe_timeout_ms)?;
        self.probe_timeout_ms = probe_timeout_ms;
        Ok(self)
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub async fn get_json<TResp>(
        &self,
        provider: ProviderId,
        model: Option<&str>,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<TResp, ProviderError>
    where
        TResp: DeserializeOwned,
    {
        self.execute_json_request(provider, model, Method::GET, url, None, headers)
            .await
    }

    pub async fn post_json<TReq, TResp>(
        &self,
        provider: ProviderId,
        model: Option<&str>,
        url: &str,
        body: &TReq,
        headers: &HeaderMap,
    ) -> Result<TResp, ProviderError>
    where
        TReq: Serialize + ?Sized,
        TResp: DeserializeOwned,
    {
        let payload = encode_body(provider, model, body)?;

        self.execute_json_request(provider, model, Method::POST, url, Some(payload), headers)
            .await
    }

    /// Fetches a binary resource such as a generated image URL.
    pub async fn get_bytes(
        &self,
        provider: ProviderId,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .send_with_retry(provider, None, Method::GET, url, None, headers)
            .await?;
        let request_id = extract_request_id(response.headers());

        let bytes = response
            .bytes()
            .await
            .map_err(|error| ProviderError::Serialization {
                provider,
                model: None,
                request_id,
                message: describe_reqwest_error(error),
            })?;

        Ok(bytes.to_vec())
    }

    /// Opens a streaming POST. No retries: a partially consumed stream cannot
    /// be replayed safely.
    ///
    /// The request timeout covers only the wait for response headers. The body
    /// may run for as long as the upstream keeps sending; readers bound each
    /// chunk with their own idle timeout.
    pub async fn post_event_stream<TReq>(
        &self,
        provider: ProviderId,
        model: Option<&str>,
        url: &str,
        body: &TReq,
        headers: &HeaderMap,
    ) -> Result<Response, ProviderError>
    where
        TReq: Serialize + ?Sized,
    {
        let payload = encode_body(provider, model, body)?;

        let pending = self
            .client
            .post(url)
            .headers(headers.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .body(payload)
            .send();

        let response = tokio::time::timeout(Duration::from_millis(self.timeout_ms), pending)
            .await
            .map_err(|_| ProviderError::Transport {
                provider,
                model: model.map(str::to_string),
                message: format!("event stream not opened within {} ms", self.timeout_ms),
            })?
            .map_err(|error| ProviderError::Transport {
                provider,
                model: model.map(str::to_string),
                message: describe_reqwest_error(error),
            })?;

        if !response.status().is_success() {
            return Err(build_status_error(provider, model, response).await);
        }

        Ok(response)
    }

    /// Single-attempt health probe returning the raw status code. Callers
    /// decide which statuses count as reachable.
    pub async fn probe(
        &self,
        provider: ProviderId,
        method: Method,
        url: &str,
        body: Option<&Value>,
        headers: &HeaderMap,
    ) -> Result<u16, ProviderError> {
        let mut request_builder = self
            .client
            .request(method, url)
            .timeout(Duration::from_millis(self.probe_timeout_ms))
            .headers(headers.clone());

        if let Some(body) = body {
            request_builder = request_builder
                .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .body(encode_body(provider, None, body)?);
        }

        let response = request_builder
            .send()
            .await
            .map_err(|error| ProviderError::Transport {
                provider,
                model: None,
                message: describe_reqwest_error(error),
            })?;

        Ok(response.status().as_u16())
    }

    async fn execute_json_request<TResp>(
        &self,
        provider: ProviderId,
        model: Option<&str>,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        headers: &HeaderMap,
    ) -> Result<TResp, ProviderError>
    where
        TResp: DeserializeOwned,
    {
        let response = self
            .send_with_retry(provider, model, method, url, body, headers)
            .await?;
        let request_id = extract_request_id(response.headers());

        response
            .json::<TResp>()
            .await
            .map_err(|error| ProviderError::Serialization {
                provider,
                model: model.map(str::to_string),
                request_id,
                message: describe_reqwest_error(error),
            })
    }

    async fn send_with_retry(
        &self,
        provider: ProviderId,
        model: Option<&str>,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        headers: &HeaderMap,
    ) -> Result<Response, ProviderError> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let mut request_builder = self
                .client
                .request(method.clone(), url)
                .timeout(Duration::from_millis(self.timeout_ms))
                .headers(headers.clone());

            if let Some(payload) = &body {
                request_builder = request_builder
                    .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                    .body(payload.clone());
            }

            match request_builder.send().await {
                Ok(response) => {
                    let status_code = response.status().as_u16();
                    if response.status().is_success() {
                        return Ok(response);
                    }

                    let status_error = build_status_error(provider, model, response).await;
                    if attempt < self.retry_policy.max_attempts
                        && self.retry_policy.should_retry_status(status_code)
                    {
                        tracing::debug!(
                            provider = %provider,
                            status_code,
                            attempt,
                            "retrying upstream request"
                        );
                        self.sleep_before_retry(attempt).await;
                        continue;
                    }

                    return Err(status_error);
                }
                Err(error) => {
                    let retryable = is_retryable_transport(&error);
                    let transport_error = ProviderError::Transport {
                        provider,
                        model: model.map(str::to_string),
                        message: describe_reqwest_error(error),
                    };

                    if attempt < self.retry_policy.max_attempts && retryable {
                        tracing::debug!(
                            provider = %provider,
                            attempt,
                            "retrying upstream request after transport error"
                        );
                        self.sleep_before_retry(attempt).await;
                        continue;
                    }

                    return Err(transport_error);
                }
            }
        }
    }

    fn validate_timeout(timeout_ms: u64) -> Result<(), ConfigError> {
        if timeout_ms == 0 {
            return Err(ConfigError::InvalidTimeout { timeout_ms });
        }
        Ok(())
    }

    async fn sleep_before_retry(&self, attempt: u32) {
        let retry_index = attempt.saturating_sub(1);
        let backoff = self.retry_policy.backoff_duration_for_retry(retry_index);
        tokio::time::sleep(backoff).await;
    }
}

/// Builds a header map from static `(name, value)` pairs, failing on values
/// that are not valid header text (for example a credential with a newline).
pub fn build_headers(
    provider: ProviderId,
    pairs: &[(&str, &str)],
) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|error| {
            ConfigError::InvalidProviderConfig {
                provider,
                reason: format!("invalid header name {name}: {error}"),
            }
        })?;
        let header_value =
            HeaderValue::from_str(value).map_err(|error| ConfigError::InvalidProviderConfig {
                provider,
                reason: format!("invalid header value for {name}: {error}"),
            })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}

fn encode_body<TReq>(
    provider: ProviderId,
    model: Option<&str>,
    body: &TReq,
) -> Result<Vec<u8>, ProviderError>
where
    TReq: Serialize + ?Sized,
{
    serde_json::to_vec(body).map_err(|error| ProviderError::Serialization {
        provider,
        model: model.map(str::to_string),
        request_id: None,
        message: error.to_string(),
    })
}

async fn build_status_error(
    provider: ProviderId,
    model: Option<&str>,
    response: Response,
) -> ProviderError {
    let status_code = response.status().as_u16();
    let request_id = extract_request_id(response.headers());

    let message = match response.text().await {
        Ok(body) if !body.trim().is_empty() => extract_error_message(&body),
        Ok(_) => format!("http status {status_code}"),
        Err(error) => {
            format!("http status {status_code}; failed to read response body: {error}")
        }
    };

    if status_code == 401 || status_code == 403 {
        return ProviderError::CredentialsRejected {
            provider,
            status_code,
            request_id,
            message,
        };
    }

    ProviderError::Status {
        provider,
        model: model.map(str::to_string),
        status_code,
        request_id,
        message,
    }
}

/// Pulls a readable message out of the usual `{"error": {"message": ..}}`,
/// `{"error": ".."}` or `{"message": ..}` bodies, falling back to the raw
/// text.
pub(crate) fn extract_error_message(body: &str) -> String {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        value
            .pointer("/error/message")
            .or_else(|| value.get("error"))
            .or_else(|| value.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    let message = message.unwrap_or_else(|| body.trim().to_string());
    if message.chars().count() > MAX_ERROR_MESSAGE_CHARS {
        let truncated: String = message.chars().take(MAX_ERROR_MESSAGE_CHARS).collect();
        format!("{truncated}...")
    } else {
        message
    }
}

fn extract_request_id(headers: &HeaderMap) -> Option<String> {
    REQUEST_ID_HEADERS.iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    })
}

/// Renders a client error without its URL; some backends authenticate with a
/// query parameter that must not end up in envelopes or logs.
pub(crate) fn describe_reqwest_error(error: reqwest::Error) -> String {
    error.without_url().to_string()
}

fn is_retryable_transport(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}
