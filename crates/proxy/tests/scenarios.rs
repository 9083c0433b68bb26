//! End-to-end scenario tests (spec §8 "End-to-end scenarios", S1-S6).
//!
//! Each test spins a tiny axum router as a stand-in OpenAI-dialect upstream,
//! points a real [`RequestContext`]/[`Forwarder`] pair at it, and asserts on
//! the Anthropic-shaped frames or response that come out the other end.
//! Grounded on the teacher's `integration-tests` crate, which spins a real
//! mock LLM endpoint behind the router under test rather than stubbing at
//! the trait level — trimmed here to a bare axum handler since this bridge
//! has one upstream dialect to fake instead of nexus's full provider matrix.

use std::{collections::VecDeque, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::post,
};
use futures::StreamExt;
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::Mutex};

use config::{Channel, LegacyUpstream, Protocol, ProxyConfig};
use proxy::{
    Forwarder, RequestContext,
    model::{ClientRequest, Message, MessageContent, Role, ToolDef},
    sse_event::{ContentBlock, Delta, StreamEvent},
};

#[derive(Clone, Default)]
struct MockState {
    /// Raw assistant text to stream back (as one `delta.content` chunk,
    /// followed by `[DONE]`) for any request with `"stream": true`.
    stream_reply: Arc<Mutex<String>>,
    /// Non-streaming `message.content` replies, consumed in order — one per
    /// `"stream": false` request (used by the retry controller's one-shot
    /// calls, and directly by the non-streaming S6 test).
    completion_replies: Arc<Mutex<VecDeque<String>>>,
    /// Every request this mock has received, for asserting on headers/body.
    requests: Arc<Mutex<Vec<(HeaderMap, Value)>>>,
}

async fn mock_upstream(State(state): State<MockState>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    state.requests.lock().await.push((headers, body.clone()));

    let is_stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    if is_stream {
        let content = state.stream_reply.lock().await.clone();
        let chunk = json!({"choices": [{"delta": {"content": content}}]});
        let body = format!("data: {chunk}\n\ndata: [DONE]\n\n");
        Response::builder()
            .header("content-type", "text/event-stream")
            .body(Body::from(body))
            .unwrap()
    } else {
        let content = state.completion_replies.lock().await.pop_front().unwrap_or_default();
        Json(json!({"choices": [{"message": {"content": content}}]})).into_response()
    }
}

/// Starts the mock upstream on an ephemeral port and returns its base URL.
async fn spawn_mock(state: MockState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new().route("/chat/completions", post(mock_upstream)).with_state(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn proxy_config(base_url: String) -> ProxyConfig {
    ProxyConfig {
        aggregation_interval_ms: 0,
        legacy_upstream: Some(LegacyUpstream { base_url, api_key: None, model_override: None }),
        ..Default::default()
    }
}

fn user_request(content: &str, tools: Option<Vec<ToolDef>>, stream: bool) -> ClientRequest {
    ClientRequest {
        model: "stand-in-model".to_string(),
        messages: vec![Message { role: Role::User, content: MessageContent::Text(content.to_string()) }],
        system: None,
        tools,
        max_tokens: 256,
        temperature: None,
        top_p: None,
        stream,
        thinking: None,
        stop_sequences: None,
        metadata: None,
        tool_choice: None,
    }
}

fn weather_tool() -> ToolDef {
    ToolDef {
        name: "get_weather".to_string(),
        description: "Look up the current weather for a city".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {"city": {"type": "string"}},
            "required": ["city"]
        }),
    }
}

async fn run_stream(ctx: RequestContext, proxy_config: ProxyConfig) -> Vec<StreamEvent> {
    let forwarder = Forwarder::new(reqwest::Client::new());
    forwarder.stream(ctx, proxy_config).collect::<Vec<_>>().await.into_iter().map(|frame| frame.event).collect()
}

fn event_names(events: &[StreamEvent]) -> Vec<&'static str> {
    events.iter().map(StreamEvent::event_name).collect()
}

/// S1 — plain chat, no tools: the OpenAI deltas "Hel"/"lo" round-trip as two
/// `text_delta` frames inside one text block, closing with `end_turn`.
#[tokio::test(flavor = "multi_thread")]
async fn s1_plain_chat_no_tools() {
    let state = MockState::default();
    *state.stream_reply.lock().await = "Hello".to_string();
    let base_url = spawn_mock(state).await;

    let config = proxy_config(base_url);
    let request = user_request("hi", None, true);
    let ctx = RequestContext::build("s1".to_string(), request, &config, None).unwrap();
    assert!(ctx.delimiter.is_none(), "no tools means no trigger delimiter");

    let events = run_stream(ctx, config).await;

    assert_eq!(
        event_names(&events),
        vec![
            "message_start",
            "ping",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    match &events[5] {
        StreamEvent::MessageDelta { delta, .. } => assert_eq!(delta.stop_reason, "end_turn"),
        other => panic!("expected message_delta, got {other:?}"),
    }
}

/// S2 — tool call: upstream text containing the trigger + a well-formed
/// `<invoke>` becomes a text block followed by a `tool_use` block.
#[tokio::test(flavor = "multi_thread")]
async fn s2_tool_call_is_recognized_end_to_end() {
    let state = MockState::default();
    let base_url = spawn_mock(state.clone()).await;

    let config = proxy_config(base_url);
    let request = user_request("what's the weather in SF?", Some(vec![weather_tool()]), true);
    let ctx = RequestContext::build("s2".to_string(), request, &config, None).unwrap();
    let trigger = ctx.delimiter.clone().expect("tools present, delimiter required").tc_start;

    *state.stream_reply.lock().await =
        format!("Checking.{trigger}\n<invoke name=\"get_weather\">\n<parameter name=\"city\">\"SF\"</parameter>\n</invoke>");

    let events = run_stream(ctx, config).await;

    let text = events.iter().find_map(|e| match e {
        StreamEvent::ContentBlockDelta { delta: Delta::TextDelta { text }, .. } => Some(text.clone()),
        _ => None,
    });
    assert_eq!(text.as_deref(), Some("Checking."));

    let tool_use = events.iter().find_map(|e| match e {
        StreamEvent::ContentBlockStart { content_block: ContentBlock::ToolUse { name, .. }, .. } => Some(name.clone()),
        _ => None,
    });
    assert_eq!(tool_use.as_deref(), Some("get_weather"));

    let input_json: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ContentBlockDelta { delta: Delta::InputJsonDelta { partial_json }, .. } => Some(partial_json.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(serde_json::from_str::<Value>(&input_json).unwrap(), json!({"city": "SF"}));

    let stop_reason = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::MessageDelta { delta, .. } => Some(delta.stop_reason),
            _ => None,
        })
        .unwrap();
    assert_eq!(stop_reason, "tool_use");
}

/// S3 — malformed tool call, retry succeeds: the first upstream turn is
/// malformed, the retry controller re-prompts once, and the client sees a
/// single well-formed `tool_use` block with `stop_reason = tool_use`. This
/// also exercises the fix keeping the tool catalog/trigger instructions in
/// the retry prompt (the mock upstream reuses the context's one delimiter
/// across both calls, so the retry can only succeed if it still sees it).
#[tokio::test(flavor = "multi_thread")]
async fn s3_malformed_tool_call_then_retry_succeeds() {
    let state = MockState::default();
    let base_url = spawn_mock(state.clone()).await;

    let config = ProxyConfig { max_retries: 2, ..proxy_config(base_url) };
    let request = user_request("what's the weather in SF?", Some(vec![weather_tool()]), true);
    let ctx = RequestContext::build("s3".to_string(), request, &config, None).unwrap();
    let trigger = ctx.delimiter.clone().expect("tools present, delimiter required").tc_start;

    *state.stream_reply.lock().await = format!("{trigger}<invoke name=\"get_weather\"><parameter>");
    state
        .completion_replies
        .lock()
        .await
        .push_back(format!("{trigger}<invoke name=\"get_weather\"><parameter name=\"city\">\"SF\"</parameter></invoke>"));

    let events = run_stream(ctx, config).await;

    let ping_count = events.iter().filter(|e| matches!(e, StreamEvent::Ping)).count();
    assert_eq!(ping_count, 2, "unconditional init ping + one keep-alive ping during the retry round-trip");

    let tool_use_count = events.iter().filter(|e| matches!(e, StreamEvent::ContentBlockStart { content_block: ContentBlock::ToolUse { .. }, .. })).count();
    assert_eq!(tool_use_count, 1);

    let stop_reason = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::MessageDelta { delta, .. } => Some(delta.stop_reason),
            _ => None,
        })
        .unwrap();
    assert_eq!(stop_reason, "tool_use");
}

/// S4 — malformed tool call, retries exhausted: with `max_retries = 1` and a
/// retry reply that's also malformed, the client sees the raw failed text as
/// a text block and `stop_reason = end_turn`, no `tool_use` block.
#[tokio::test(flavor = "multi_thread")]
async fn s4_malformed_tool_call_retries_exhausted_degrades_to_text() {
    let state = MockState::default();
    let base_url = spawn_mock(state.clone()).await;

    let config = ProxyConfig { max_retries: 1, ..proxy_config(base_url) };
    let request = user_request("what's the weather in SF?", Some(vec![weather_tool()]), true);
    let ctx = RequestContext::build("s4".to_string(), request, &config, None).unwrap();
    let trigger = ctx.delimiter.clone().expect("tools present, delimiter required").tc_start;

    let malformed = format!("{trigger}<invoke name=\"get_weather\"><parameter>");
    *state.stream_reply.lock().await = malformed.clone();
    state.completion_replies.lock().await.push_back(malformed.clone());

    let events = run_stream(ctx, config).await;

    let tool_use_count = events.iter().filter(|e| matches!(e, StreamEvent::ContentBlockStart { content_block: ContentBlock::ToolUse { .. }, .. })).count();
    assert_eq!(tool_use_count, 0);

    let text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ContentBlockDelta { delta: Delta::TextDelta { text }, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert!(text.contains(&malformed), "degraded text should contain the raw malformed content");

    let stop_reason = events
        .iter()
        .find_map(|e| match e {
            StreamEvent::MessageDelta { delta, .. } => Some(delta.stop_reason),
            _ => None,
        })
        .unwrap();
    assert_eq!(stop_reason, "end_turn");
}

/// S5 — thinking interleaved: a `<thinking>` span and the text that follows
/// it become two blocks, in order, at indices 0 and 1.
#[tokio::test(flavor = "multi_thread")]
async fn s5_thinking_then_text_closes_in_order() {
    let state = MockState::default();
    *state.stream_reply.lock().await = "<thinking>weighing options</thinking>Answer: 4".to_string();
    let base_url = spawn_mock(state).await;

    let config = proxy_config(base_url);
    let request = user_request("what is 2+2?", None, true);
    let ctx = RequestContext::build("s5".to_string(), request, &config, None).unwrap();

    let events = run_stream(ctx, config).await;

    let mut opened = Vec::new();
    for event in &events {
        if let StreamEvent::ContentBlockStart { index, content_block } = event {
            let kind = match content_block {
                ContentBlock::Thinking { .. } => "thinking",
                ContentBlock::Text { .. } => "text",
                ContentBlock::ToolUse { .. } => "tool_use",
            };
            opened.push((*index, kind));
        }
    }
    assert_eq!(opened, vec![(0, "thinking"), (1, "text")]);

    let thinking: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ContentBlockDelta { delta: Delta::ThinkingDelta { thinking }, .. } => Some(thinking.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(thinking, "weighing options");

    let text: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ContentBlockDelta { delta: Delta::TextDelta { text }, .. } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "Answer: 4");
}

/// S6 — channel routing + passthrough: `channel+model` selects the channel's
/// base URL, and a client-presented key overrides the (absent) channel key
/// because `passthrough_api_key` is enabled.
#[tokio::test(flavor = "multi_thread")]
async fn s6_channel_routing_and_passthrough_api_key() {
    let state = MockState::default();
    state.completion_replies.lock().await.push_back("ok".to_string());
    let base_url = spawn_mock(state.clone()).await;

    let config = ProxyConfig {
        channels: vec![Channel { name: "openrouter".to_string(), base_url, api_key: None, protocol: Protocol::OpenAi }],
        passthrough_api_key: true,
        ..Default::default()
    };

    let request = user_request("hi", None, false);
    let request = ClientRequest { model: "openrouter+foo/bar".to_string(), ..request };
    let client_key = Some(SecretString::from("sk-client".to_string()));
    let ctx = RequestContext::build("s6".to_string(), request, &config, client_key).unwrap();
    assert_eq!(ctx.upstream.upstream_model, "foo/bar");

    let forwarder = Forwarder::new(reqwest::Client::new());
    forwarder.complete(&ctx, &config).await.unwrap();

    let requests = state.requests.lock().await;
    let (headers, body) = requests.last().expect("mock upstream should have received exactly one request");
    assert_eq!(headers.get("authorization").unwrap(), "Bearer sk-client");
    assert_eq!(body["model"], "foo/bar");
}
