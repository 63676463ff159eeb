pub(crate) mod chat_completions;
pub mod claude;
pub mod deepseek;
pub mod gemini;
pub mod openrouter;
pub mod together;
pub(crate) mod translator_contract;

use crate::core::error::ProviderError;
use crate::core::types::ProviderId;

pub use claude::ClaudeAdapter;
pub use deepseek::DeepSeekAdapter;
pub use gemini::GeminiAdapter;
pub use openrouter::OpenRouterAdapter;
pub use together::TogetherAdapter;

/// Folds a probe outcome into a yes/no answer. Probe failures are expected
/// (offline backend, bad key) and only logged at debug level.
pub(crate) fn probe_reachable(
    provider: ProviderId,
    outcome: Result<u16, ProviderError>,
    accepts: fn(u16) -> bool,
) -> bool {
    match outcome {
        Ok(status_code) => {
            let reachable = accepts(status_code);
            tracing::debug!(
                provider = %provider,
                status_code,
                reachable,
                "availability probe answered"
            );
            reachable
        }
        Err(error) => {
            tracing::debug!(provider = %provider, error = %error, "availability probe failed");
            false
        }
    }
}

pub(crate) fn is_success_status(status_code: u16) -> bool {
    (200..300).contains(&status_code)
}
