//! C7 — retry controller.
//!
//! Triggered when the incremental parser yields `ToolCallFailed` at stream
//! EOF (spec §4.7). Runs a bounded, non-streaming re-prompt loop against the
//! same upstream, keeping the client's SSE connection alive with `ping`
//! frames, and hands a synthesized `ToolCall` back to the SSE writer on
//! success. Never reopens a block the writer already closed — it only ever
//! calls `writer.handle_events` with a fresh `ToolCall` or `Text` event,
//! exactly as if the upstream had produced it (spec §4.7 contract).

use std::time::Duration;

use config::UpstreamConfig;

use crate::{
    error::{ProxyError, Result},
    model::{ClientRequest, Message, MessageContent, Role},
    parser::{IncrementalParser, ParserEvent},
    protocol::{self, ProtocolAdapter},
    sse_writer::{ClaudeSseWriter, Frame},
    trigger::TriggerDelimiter,
};

const CORRECTION_INSTRUCTION: &str = concat!(
    "Your previous reply did not follow the required tool-call format. ",
    "Reply again using exactly the trigger line followed by a single well-formed ",
    "<invoke name=\"...\"> block with <parameter name=\"...\"> children, then stop."
);

/// Runs the bounded repair loop. Returns the frames to append to the
/// client's SSE stream (pings during each attempt, plus the eventual
/// `tool_use` or degraded text block).
pub async fn retry_malformed_tool_call(
    client: &reqwest::Client,
    upstream: &UpstreamConfig,
    base_request: &ClientRequest,
    delimiter: &TriggerDelimiter,
    prior_text: &str,
    failed_content: &str,
    max_retries: u32,
    timeout: Duration,
    keep_alive: bool,
    writer: &mut ClaudeSseWriter,
) -> Vec<Frame> {
    let mut frames = Vec::new();

    for _attempt in 1..=max_retries {
        if keep_alive {
            frames.push(writer_ping());
        }

        if let Some(tool_call) = attempt_round(client, upstream, base_request, delimiter, prior_text, failed_content, timeout).await {
            frames.extend(writer.handle_events(vec![tool_call]));
            return frames;
        }
    }

    // All attempts exhausted: degrade to plain text, no tool_use block.
    frames.extend(writer.handle_events(vec![ParserEvent::Text { content: failed_content.to_string() }]));
    frames
}

/// The same bounded repair loop as [`retry_malformed_tool_call`], for the
/// non-streaming response path: no ping frames, and the resolved event
/// (`ToolCall` on success, degraded `Text` on exhaustion) is handed back
/// directly instead of going through the SSE writer.
pub async fn repair_non_streaming(
    client: &reqwest::Client,
    upstream: &UpstreamConfig,
    base_request: &ClientRequest,
    delimiter: &TriggerDelimiter,
    prior_text: &str,
    failed_content: &str,
    max_retries: u32,
    timeout: Duration,
) -> ParserEvent {
    for _attempt in 1..=max_retries {
        if let Some(tool_call) = attempt_round(client, upstream, base_request, delimiter, prior_text, failed_content, timeout).await {
            return tool_call;
        }
    }

    ParserEvent::Text { content: failed_content.to_string() }
}

/// One non-streaming re-prompt against the upstream: builds the correction
/// turn, sends it, and parses the reply looking for a well-formed
/// `ToolCall`. Returns `None` on any transport failure or when the retried
/// reply is itself malformed — the caller decides whether to try again.
async fn attempt_round(
    client: &reqwest::Client,
    upstream: &UpstreamConfig,
    base_request: &ClientRequest,
    delimiter: &TriggerDelimiter,
    prior_text: &str,
    failed_content: &str,
    timeout: Duration,
) -> Option<ParserEvent> {
    let adapter = protocol::for_protocol(upstream.protocol);
    let retry_request = build_retry_request(base_request, prior_text, failed_content);

    let text = call_upstream_once(client, upstream, adapter.as_ref(), &retry_request, timeout).await.ok()?;

    let mut parser = IncrementalParser::new(Some(delimiter.clone()));
    parser.feed_str(&text);
    parser.finish();

    parser.consume_events().into_iter().find(|e| matches!(e, ParserEvent::ToolCall { .. }))
}

fn writer_ping() -> Frame {
    // A bare ping never touches block-index state, so constructing it
    // doesn't need to go through the writer.
    Frame { event: crate::sse_event::StreamEvent::Ping, pace: false }
}

fn build_retry_request(base_request: &ClientRequest, prior_text: &str, failed_content: &str) -> ClientRequest {
    let mut retry = base_request.clone();

    let mut assistant_text = String::new();
    assistant_text.push_str(prior_text);
    assistant_text.push_str(failed_content);

    retry.messages.push(Message {
        role: Role::Assistant,
        content: MessageContent::Text(assistant_text),
    });
    retry.messages.push(Message {
        role: Role::User,
        content: MessageContent::Text(CORRECTION_INSTRUCTION.to_string()),
    });
    retry.stream = false;

    retry
}

async fn call_upstream_once(
    client: &reqwest::Client,
    upstream: &UpstreamConfig,
    adapter: &dyn ProtocolAdapter,
    request: &ClientRequest,
    timeout: Duration,
) -> Result<String> {
    let url = format!("{}{}", upstream.base_url, adapter.endpoint_path());
    let headers = adapter.build_headers(upstream.api_key.as_ref());
    let body = adapter.build_body(request, &upstream.upstream_model);

    let response = client
        .post(url)
        .headers(headers)
        .json(&body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| ProxyError::UpstreamRead(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body_snippet: String = response.text().await.unwrap_or_default().chars().take(200).collect();
        return Err(ProxyError::UpstreamHttp { status, body_snippet });
    }

    let body: serde_json::Value = response.json().await.map_err(|e| ProxyError::UpstreamRead(e.to_string()))?;

    adapter
        .extract_full_text(&body)
        .ok_or_else(|| ProxyError::UpstreamRead("retry response had no extractable text".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MessageContent, Role};

    fn base_request() -> ClientRequest {
        ClientRequest {
            model: "openai+gpt-4o".to_string(),
            messages: vec![Message { role: Role::User, content: MessageContent::Text("weather?".to_string()) }],
            system: None,
            tools: None,
            max_tokens: 100,
            temperature: None,
            top_p: None,
            stream: true,
            thinking: None,
            stop_sequences: None,
            metadata: None,
            tool_choice: None,
        }
    }

    #[test]
    fn retry_request_carries_prior_and_failed_text_then_a_correction_turn() {
        let original = base_request();
        let retry = build_retry_request(&original, "Checking.", "<<CALL_ab12>>\n<invoke name=\"x\">");

        assert!(!retry.stream);
        assert_eq!(retry.messages.len(), 3);
        match &retry.messages[1].content {
            MessageContent::Text(text) => {
                assert!(text.contains("Checking."));
                assert!(text.contains("<invoke name=\"x\">"));
            }
            other => panic!("expected text content, got {other:?}"),
        }
        assert_eq!(retry.messages[2].role, Role::User);
    }

    #[test]
    fn retry_request_keeps_the_enriched_system_prompt() {
        let mut enriched = base_request();
        enriched.system = Some(crate::model::SystemPrompt::Text("catalog + trigger instructions".to_string()));

        let retry = build_retry_request(&enriched, "Checking.", "<<CALL_ab12>>\n<invoke name=\"x\">");

        assert!(retry.system.is_some(), "retry must still teach the upstream the tool catalog/trigger protocol");
    }
}
