//! Incremental text delivery.
//!
//! Adapters with a native stream are forwarded as-is. For the rest the bridge
//! runs one whole-response generation and replays it piece by piece, with a
//! short pause between pieces so consumers see typing-like output.

use std::sync::Arc;
use std::time::Duration;

use crate::core::traits::ProviderAdapter;
use crate::core::types::{TextFragment, TextRequest, TextStream};

/// Pause inserted between synthesized pieces. Zero disables pacing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamPacing {
    pub delay: Duration,
}

impl StreamPacing {
    pub fn from_millis(delay_ms: u64) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
        }
    }

    pub fn immediate() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }
}

impl Default for StreamPacing {
    fn default() -> Self {
        Self::from_millis(crate::config::DEFAULT_STREAM_DELAY_MS)
    }
}

/// Splits `text` into alternating runs of non-whitespace and whitespace.
/// Concatenating the pieces reproduces `text` exactly; no piece is empty.
pub fn split_preserving_whitespace(text: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_whitespace = None;

    for (index, ch) in text.char_indices() {
        let is_whitespace = ch.is_whitespace();
        match in_whitespace {
            Some(current) if current != is_whitespace => {
                pieces.push(&text[start..index]);
                start = index;
            }
            _ => {}
        }
        in_whitespace = Some(is_whitespace);
    }

    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Streams a text response from `adapter`.
///
/// The returned stream is finite and yields at most one
/// [`TextFragment::Error`], always last. Dropping it cancels the in-flight
/// generation.
pub fn stream_text(
    adapter: Arc<dyn ProviderAdapter>,
    request: TextRequest,
    pacing: StreamPacing,
) -> TextStream {
    if let Some(native) = adapter.stream_text(&request) {
        tracing::debug!(provider = %adapter.id(), "forwarding native stream");
        return native;
    }

    Box::pin(async_stream::stream! {
        let envelope = adapter.generate_text(&request).await;
        let text = match envelope.into_result() {
            Ok(payload) => payload.text,
            Err(message) => {
                yield TextFragment::Error(message);
                return;
            }
        };

        let pieces = split_preserving_whitespace(&text);
        let last = pieces.len().saturating_sub(1);
        for (index, piece) in pieces.into_iter().enumerate() {
            yield TextFragment::Delta(piece.to_string());
            if index < last && !pacing.delay.is_zero() {
                tokio::time::sleep(pacing.delay).await;
            }
        }
    })
}
