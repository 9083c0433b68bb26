//! C10 — end-to-end forwarder.
//!
//! Composes C1-C9 into the two request shapes spec §4.9 describes: a
//! streaming path that drives the upstream SSE loop into a [`Frame`] stream
//! the caller can hand to an SSE transport, and a non-streaming path that
//! assembles one final Anthropic-shaped [`MessageResponse`]. Grounded on the
//! teacher's `provider::openai::chat_completion_stream` (non-2xx-to-typed-error
//! mapping, `response.bytes_stream().eventsource()`) and its
//! `proxy::anthropic::v1_messages` handler (bridging an async pipeline into an
//! SSE stream).

use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::channel::mpsc::{self, UnboundedSender};
use futures::{Stream, StreamExt};

use config::ProxyConfig;

use crate::{
    context::RequestContext,
    error::{ProxyError, Result},
    model::{ClientRequest, ContentBlock, MessageResponse, Role, Usage},
    parser::{IncrementalParser, ParserEvent},
    protocol::{self, UpstreamEvent},
    retry,
    sse_writer::{ClaudeSseWriter, Frame},
    token_counter,
    trigger::random_alnum,
};

/// Fixed model name reported in `message_start` (spec §4.6): the client never
/// learns which upstream model actually answered.
const RESPONSE_MODEL: &str = "claude-proxy";
const INTER_CHUNK_PAUSE: Duration = Duration::from_millis(10);

/// Drives requests against resolved upstreams. Holds nothing per-request;
/// one instance is shared for the process's lifetime (spec §5: "a single
/// `reqwest::Client` is reused across requests").
#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Starts the streaming pipeline on a detached task and returns the
    /// receiving half as a `Stream<Item = Frame>`. Closing (dropping) the
    /// returned stream is the cancellation signal: the spawned task's next
    /// send fails, the loop breaks, and the in-flight upstream response is
    /// dropped without any further retry (spec §5).
    pub fn stream(&self, ctx: RequestContext, proxy_config: ProxyConfig) -> impl Stream<Item = Frame> + Send + 'static {
        let (tx, rx) = mpsc::unbounded();
        let client = self.client.clone();
        tokio::spawn(run_stream(ctx, proxy_config, client, tx));
        rx
    }

    /// Runs the non-streaming request/response cycle to completion.
    pub async fn complete(&self, ctx: &RequestContext, proxy_config: &ProxyConfig) -> Result<MessageResponse> {
        run_complete(ctx, proxy_config, &self.client).await
    }
}

/// Renders the enriched prompt preserving role labels, the shape the token
/// counter must see (spec §4.9: "this shape must be preserved because it
/// influences the count").
pub fn render_for_token_count(request: &ClientRequest) -> String {
    let mut parts = Vec::new();

    if let Some(system) = &request.system {
        parts.push(format!("System: {}", system.as_text()));
    }

    for message in &request.messages {
        let label = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        parts.push(format!("{label}: {}", message.content.flatten_to_text()));
    }

    parts.join("\n\n")
}

async fn run_stream(ctx: RequestContext, proxy_config: ProxyConfig, client: reqwest::Client, tx: UnboundedSender<Frame>) {
    let input_text = render_for_token_count(&ctx.enriched);
    let input_tokens = token_counter::count(&input_text, &ctx.original.model) as u32;

    log_enrichment(&ctx);

    let mut writer = ClaudeSseWriter::new(ctx.request_id.clone(), RESPONSE_MODEL.to_string(), proxy_config.aggregation_interval_ms, proxy_config.token_multiplier);

    if !send_all(&tx, writer.init(input_tokens)) {
        return;
    }

    let adapter = protocol::for_protocol(ctx.upstream.protocol);
    let timeout = Duration::from_millis(proxy_config.timeout_ms);
    let url = format!("{}{}", ctx.upstream.base_url, adapter.endpoint_path());
    let headers = adapter.build_headers(ctx.upstream.api_key.as_ref());
    let body = adapter.build_body(&ctx.enriched, &ctx.upstream.upstream_model);

    let response = match client.post(&url).headers(headers).json(&body).timeout(timeout).send().await {
        Ok(response) => response,
        Err(e) => {
            let (error_type, message) = classify_request_error(e);
            let _ = tx.unbounded_send(writer.error(error_type, message));
            return;
        }
    };

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body_snippet: String = response.text().await.unwrap_or_default().chars().take(200).collect();
        log::warn!("upstream returned {status}: {body_snippet}");
        let _ = tx.unbounded_send(writer.error("api_error", format!("upstream request failed with status {status}")));
        return;
    }

    let mut parser = IncrementalParser::new(ctx.delimiter.clone());
    let mut byte_stream = response.bytes_stream().eventsource();

    while let Some(event) = byte_stream.next().await {
        if tx.is_closed() {
            return;
        }

        let event = match event {
            Ok(event) => event,
            Err(_) => {
                let _ = tx.unbounded_send(writer.error("api_error", "upstream read failed".to_string()));
                return;
            }
        };

        let upstream_event = UpstreamEvent {
            event: if event.event == "message" { None } else { Some(event.event.clone()) },
            data: event.data.clone(),
        };

        if adapter.is_stream_done(&upstream_event) {
            break;
        }

        if let Some(reasoning) = adapter.extract_stream_reasoning_delta(&upstream_event) {
            parser.feed_reasoning(&reasoning);
        }
        if let Some(delta) = adapter.extract_stream_delta(&upstream_event) {
            parser.feed_str(&delta);
        }

        if !drain_events(&mut parser, &mut writer, &ctx, &proxy_config, &client, &tx).await {
            return;
        }
    }

    parser.finish();
    drain_events(&mut parser, &mut writer, &ctx, &proxy_config, &client, &tx).await;

    log::debug!(
        "request {} finished: {} raw output tokens",
        ctx.request_id,
        writer.total_output_tokens_raw()
    );
}

/// Logs the C2 enrichment step (spec §4.9 C10 step 2: "Log enrichment (tool
/// count, delimiter head)").
fn log_enrichment(ctx: &RequestContext) {
    let tool_count = ctx.original.tools.as_ref().map_or(0, |tools| tools.len());
    let delimiter_head = ctx.delimiter.as_ref().map(|d| d.tc_start.as_str()).unwrap_or("-");
    log::debug!(
        "request {}: {} tool(s), delimiter {}, upstream protocol {}",
        ctx.request_id,
        tool_count,
        delimiter_head,
        ctx.upstream.protocol.as_str()
    );
}

/// Drains pending parser events into writer frames, routing `ToolCallFailed`
/// through the bounded retry controller and holding `End` back until last so
/// `message_stop` always closes the stream exactly once (spec §8 invariant
/// 4). Returns `false` once the client has gone away — the caller should
/// stop driving the upstream.
async fn drain_events(
    parser: &mut IncrementalParser,
    writer: &mut ClaudeSseWriter,
    ctx: &RequestContext,
    proxy_config: &ProxyConfig,
    client: &reqwest::Client,
    tx: &UnboundedSender<Frame>,
) -> bool {
    let mut end_event = None;

    for event in parser.consume_events() {
        if tx.is_closed() {
            return false;
        }

        match event {
            ParserEvent::End => end_event = Some(event),
            ParserEvent::ToolCallFailed { content, prior_text } => {
                let delimiter = ctx.delimiter.clone().expect("a malformed tool call implies a delimiter was issued");

                let frames = if proxy_config.max_retries == 0 {
                    writer.handle_events(vec![ParserEvent::Text { content }])
                } else {
                    let timeout = Duration::from_millis(proxy_config.timeout_ms);
                    retry::retry_malformed_tool_call(
                        client,
                        &ctx.upstream,
                        &ctx.enriched,
                        &delimiter,
                        &prior_text,
                        &content,
                        proxy_config.max_retries,
                        timeout,
                        true,
                        writer,
                    )
                    .await
                };

                if !send_frames_paced(tx, frames).await {
                    return false;
                }
            }
            other => {
                if !send_frames_paced(tx, writer.handle_events(vec![other])).await {
                    return false;
                }
            }
        }
    }

    if let Some(end) = end_event {
        if !send_frames_paced(tx, writer.handle_events(vec![end])).await {
            return false;
        }
    }

    true
}

fn send_all(tx: &UnboundedSender<Frame>, frames: Vec<Frame>) -> bool {
    for frame in frames {
        if tx.unbounded_send(frame).is_err() {
            return false;
        }
    }
    true
}

/// Sends frames in order, sleeping `INTER_CHUNK_PAUSE` after any frame
/// marked `pace` (spec §4.6: "~10 ms inter-chunk pause... to simulate
/// streaming UX").
async fn send_frames_paced(tx: &UnboundedSender<Frame>, frames: Vec<Frame>) -> bool {
    for frame in frames {
        let pace = frame.pace;
        if tx.unbounded_send(frame).is_err() {
            return false;
        }
        if pace {
            tokio::time::sleep(INTER_CHUNK_PAUSE).await;
        }
    }
    true
}

fn classify_request_error(e: reqwest::Error) -> (&'static str, String) {
    if e.is_timeout() {
        ("timeout_error", "upstream request timed out".to_string())
    } else {
        ("api_error", "upstream connection failed".to_string())
    }
}

async fn run_complete(ctx: &RequestContext, proxy_config: &ProxyConfig, client: &reqwest::Client) -> Result<MessageResponse> {
    log_enrichment(ctx);

    let adapter = protocol::for_protocol(ctx.upstream.protocol);
    let timeout = Duration::from_millis(proxy_config.timeout_ms);
    let url = format!("{}{}", ctx.upstream.base_url, adapter.endpoint_path());
    let headers = adapter.build_headers(ctx.upstream.api_key.as_ref());
    let body = adapter.build_body(&ctx.enriched, &ctx.upstream.upstream_model);

    let response = client
        .post(&url)
        .headers(headers)
        .json(&body)
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| if e.is_timeout() { ProxyError::Timeout } else { ProxyError::UpstreamRead(e.to_string()) })?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body_snippet: String = response.text().await.unwrap_or_default().chars().take(200).collect();
        return Err(ProxyError::UpstreamHttp { status, body_snippet });
    }

    let payload: serde_json::Value = response.json().await.map_err(|e| ProxyError::UpstreamRead(e.to_string()))?;
    let text = adapter.extract_full_text(&payload).unwrap_or_default();
    let upstream_usage = adapter.extract_usage(&payload);

    let mut content = Vec::new();
    let mut stop_reason = "end_turn";

    if let Some(delimiter) = &ctx.delimiter {
        let mut parser = IncrementalParser::new(Some(delimiter.clone()));
        parser.feed_str(&text);
        parser.finish();

        for event in parser.consume_events() {
            match event {
                ParserEvent::Text { content: text } => push_text(&mut content, text),
                ParserEvent::Thinking { content: thinking } => content.push(ContentBlock::Thinking { thinking, signature: Some(String::new()) }),
                ParserEvent::ToolCall { name, arguments } => {
                    push_tool_use(&mut content, name, arguments);
                    stop_reason = "tool_use";
                }
                ParserEvent::ToolCallFailed { content: failed, prior_text } => {
                    let resolved = if proxy_config.max_retries == 0 {
                        ParserEvent::Text { content: failed }
                    } else {
                        retry::repair_non_streaming(client, &ctx.upstream, &ctx.enriched, delimiter, &prior_text, &failed, proxy_config.max_retries, timeout).await
                    };

                    match resolved {
                        ParserEvent::ToolCall { name, arguments } => {
                            push_tool_use(&mut content, name, arguments);
                            stop_reason = "tool_use";
                        }
                        ParserEvent::Text { content: text } => push_text(&mut content, text),
                        _ => {}
                    }
                }
                ParserEvent::End => {}
            }
        }
    } else if !text.is_empty() {
        content.push(ContentBlock::Text { text });
    }

    let (input_tokens, output_tokens) = match upstream_usage {
        Some(usage) => usage,
        None => {
            let input_text = render_for_token_count(&ctx.enriched);
            let input_tokens = token_counter::count(&input_text, &ctx.original.model) as u32;
            let output_text: String = content.iter().map(ContentBlock::flatten_to_text).collect::<Vec<_>>().join("");
            let output_tokens = token_counter::count(&output_text, &ctx.original.model) as u32;
            (input_tokens, output_tokens)
        }
    };

    Ok(MessageResponse {
        id: format!("msg_{}", ctx.request_id),
        kind: "message",
        role: "assistant",
        model: RESPONSE_MODEL.to_string(),
        content,
        stop_reason,
        stop_sequence: None,
        usage: Usage { input_tokens, output_tokens },
    })
}

fn push_text(content: &mut Vec<ContentBlock>, text: String) {
    if !text.is_empty() {
        content.push(ContentBlock::Text { text });
    }
}

fn push_tool_use(content: &mut Vec<ContentBlock>, name: String, input: serde_json::Value) {
    content.push(ContentBlock::ToolUse { id: format!("toolu_{}", random_alnum(12)), name, input });
}
