//! C4 — protocol adapters.
//!
//! Each upstream speaks one of two wire dialects (spec §4.4). An adapter
//! knows how to build that dialect's request body from the (already
//! trigger-enriched) [`ClientRequest`] and how to pull plain-text deltas back
//! out of it, whether the upstream streams or not. Everything downstream of
//! dispatch — the incremental parser, the SSE writer — works on plain text
//! and never sees the upstream's own shape again.

pub mod anthropic;
pub mod openai;

use reqwest::header::HeaderMap;
use secrecy::SecretString;
use serde_json::Value;

use crate::model::ClientRequest;

/// One upstream-received SSE line, stripped of eventsource-stream's own
/// bookkeeping. `event` is `None` for dialects (OpenAI) that don't use the
/// named-event field.
#[derive(Debug, Clone)]
pub struct UpstreamEvent {
    pub event: Option<String>,
    pub data: String,
}

pub trait ProtocolAdapter: Send + Sync {
    /// Path appended to the upstream's `base_url`, e.g. `/chat/completions`.
    fn endpoint_path(&self) -> &'static str;

    /// Builds the dialect-specific request headers (spec §4.4).
    fn build_headers(&self, api_key: Option<&SecretString>) -> HeaderMap;

    /// Builds the upstream-native request body.
    fn build_body(&self, request: &ClientRequest, upstream_model: &str) -> Value;

    /// `true` once `event` signals the end of the upstream's stream.
    fn is_stream_done(&self, event: &UpstreamEvent) -> bool;

    /// Plain-text delta carried by one stream event, if any.
    fn extract_stream_delta(&self, event: &UpstreamEvent) -> Option<String>;

    /// Upstream-native "thinking" delta (e.g. OpenAI's `reasoning_content`),
    /// fed to the parser via `feed_reasoning` rather than the char-by-char
    /// `<thinking>`-tag scan. `None` for dialects with no such field.
    fn extract_stream_reasoning_delta(&self, _event: &UpstreamEvent) -> Option<String> {
        None
    }

    /// Plain assistant text from a non-streaming response body.
    fn extract_full_text(&self, response: &Value) -> Option<String>;

    /// Prompt/completion token usage reported by the upstream, if present.
    fn extract_usage(&self, response: &Value) -> Option<(u32, u32)>;
}

/// Returns the adapter for a configured upstream's [`config::Protocol`].
pub fn for_protocol(protocol: config::Protocol) -> Box<dyn ProtocolAdapter> {
    match protocol {
        config::Protocol::OpenAi => Box::new(openai::OpenAiAdapter),
        config::Protocol::Anthropic => Box::new(anthropic::AnthropicAdapter),
    }
}
