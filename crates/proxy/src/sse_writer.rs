//! C6 — Claude SSE writer.
//!
//! Owns the outgoing Anthropic-shaped event stream and enforces its
//! block-index discipline (spec §4.6, §8 invariants 2-5). Pure and
//! synchronous: it turns [`ParserEvent`]s into [`Frame`]s, leaving the actual
//! pacing of thinking/tool-input chunks (`Frame::pace`) to the caller driving
//! the async SSE loop (the forwarder), so this module stays unit-testable
//! without a runtime.

use serde_json::Value;

use crate::{
    parser::ParserEvent,
    sse_event::{ContentBlock, Delta, ErrorBody, MessageDeltaBody, MessageStart, OutputUsage, StreamEvent},
    token_counter,
    trigger::random_alnum,
};

const CL100K: &str = "cl100k_base";
const THINKING_CHUNK_SIZE: usize = 5;
const INPUT_JSON_CHUNK_SIZE: usize = 5;

/// One outgoing frame plus whether the forwarder should pause briefly (spec
/// §4.6: "~10 ms inter-chunk pause... to simulate streaming UX") after
/// writing it.
#[derive(Debug, Clone)]
pub struct Frame {
    pub event: StreamEvent,
    pub pace: bool,
}

fn frame(event: StreamEvent) -> Frame {
    Frame { event, pace: false }
}

fn paced_frame(event: StreamEvent) -> Frame {
    Frame { event, pace: true }
}

pub struct ClaudeSseWriter {
    request_id: String,
    model: String,
    token_multiplier: f64,

    next_block_index: u32,
    text_block_index: Option<u32>,
    thinking_block_index: Option<u32>,
    pending_text: String,
    last_flush: std::time::Instant,
    aggregation_interval: std::time::Duration,

    has_tool_calls: bool,
    output_tokens: usize,
    finished: bool,
}

impl ClaudeSseWriter {
    pub fn new(request_id: String, model: String, aggregation_interval_ms: u64, token_multiplier: f64) -> Self {
        Self {
            request_id,
            model,
            token_multiplier,
            next_block_index: 0,
            text_block_index: None,
            thinking_block_index: None,
            pending_text: String::new(),
            last_flush: std::time::Instant::now(),
            aggregation_interval: std::time::Duration::from_millis(aggregation_interval_ms),
            has_tool_calls: false,
            output_tokens: 0,
            finished: false,
        }
    }

    /// `message_start` + unconditional `ping` (spec §9 open question 1: this
    /// design emits it unconditionally, matching the spec's stated current
    /// behavior).
    pub fn init(&mut self, input_tokens: u32) -> Vec<Frame> {
        vec![
            frame(StreamEvent::MessageStart {
                message: MessageStart {
                    id: format!("msg_{}", self.request_id),
                    kind: "message",
                    role: "assistant",
                    model: self.model.clone(),
                    content: [],
                    stop_reason: None,
                    stop_sequence: None,
                    usage: crate::sse_event::InputUsage { input_tokens, output_tokens: 0 },
                },
            }),
            frame(StreamEvent::Ping),
        ]
    }

    /// Raw (pre-multiplier) accumulated output token count, for the
    /// `getTotalOutputTokens()` contract (spec §4.6).
    pub fn total_output_tokens_raw(&self) -> usize {
        self.output_tokens
    }

    pub fn handle_events(&mut self, events: Vec<ParserEvent>) -> Vec<Frame> {
        let mut frames = Vec::new();
        for event in events {
            self.handle_event(event, &mut frames);
        }
        frames
    }

    fn handle_event(&mut self, event: ParserEvent, frames: &mut Vec<Frame>) {
        match event {
            ParserEvent::Text { content } => self.handle_text(content, frames),
            ParserEvent::Thinking { content } => self.handle_thinking(content, frames),
            ParserEvent::ToolCall { name, arguments } => self.handle_tool_call(name, arguments, frames),
            // A retry-exhausted degrade already converts this to `Text`
            // before the writer sees it; treat a stray one the same way as a
            // defensive fallback rather than dropping it silently.
            ParserEvent::ToolCallFailed { content, .. } => self.handle_text(content, frames),
            ParserEvent::End => self.handle_end(frames),
        }
    }

    fn handle_text(&mut self, content: String, frames: &mut Vec<Frame>) {
        if self.thinking_block_index.is_some() {
            self.close_thinking_block(frames);
        }

        if content.is_empty() {
            return;
        }

        self.output_tokens += token_counter::count(&content, CL100K);
        self.pending_text.push_str(&content);

        if self.last_flush.elapsed() >= self.aggregation_interval {
            self.flush_text(frames);
        }
    }

    fn flush_text(&mut self, frames: &mut Vec<Frame>) {
        if self.pending_text.is_empty() {
            return;
        }

        let index = match self.text_block_index {
            Some(index) => index,
            None => {
                let index = self.next_block_index;
                self.next_block_index += 1;
                self.text_block_index = Some(index);
                frames.push(frame(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::Text { text: String::new() },
                }));
                index
            }
        };

        let text = std::mem::take(&mut self.pending_text);
        frames.push(frame(StreamEvent::ContentBlockDelta { index, delta: Delta::TextDelta { text } }));
        self.last_flush = std::time::Instant::now();
    }

    fn close_text_block(&mut self, frames: &mut Vec<Frame>) {
        self.flush_text(frames);
        if let Some(index) = self.text_block_index.take() {
            frames.push(frame(StreamEvent::ContentBlockStop { index }));
        }
    }

    fn close_thinking_block(&mut self, frames: &mut Vec<Frame>) {
        if let Some(index) = self.thinking_block_index.take() {
            frames.push(frame(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::SignatureDelta { signature: String::new() },
            }));
            frames.push(frame(StreamEvent::ContentBlockStop { index }));
        }
    }

    fn handle_thinking(&mut self, content: String, frames: &mut Vec<Frame>) {
        self.flush_text(frames);
        if let Some(index) = self.text_block_index.take() {
            frames.push(frame(StreamEvent::ContentBlockStop { index }));
        }

        let index = match self.thinking_block_index {
            Some(index) => index,
            None => {
                let index = self.next_block_index;
                self.next_block_index += 1;
                self.thinking_block_index = Some(index);
                frames.push(frame(StreamEvent::ContentBlockStart {
                    index,
                    content_block: ContentBlock::Thinking { thinking: String::new(), signature: String::new() },
                }));
                index
            }
        };

        self.output_tokens += token_counter::count(&content, CL100K);

        let chars: Vec<char> = content.chars().collect();
        for chunk in chars.chunks(THINKING_CHUNK_SIZE) {
            let piece: String = chunk.iter().collect();
            frames.push(paced_frame(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::ThinkingDelta { thinking: piece },
            }));
        }
    }

    fn handle_tool_call(&mut self, name: String, arguments: Value, frames: &mut Vec<Frame>) {
        self.close_text_block(frames);
        self.close_thinking_block(frames);

        let index = self.next_block_index;
        self.next_block_index += 1;

        let id = format!("toolu_{}", random_alnum(12));
        frames.push(frame(StreamEvent::ContentBlockStart {
            index,
            content_block: ContentBlock::ToolUse { id, name, input: Value::Object(serde_json::Map::new()) },
        }));

        let json = serde_json::to_string(&arguments).unwrap_or_else(|_| "{}".to_string());
        self.output_tokens += token_counter::count(&json, CL100K);

        let chars: Vec<char> = json.chars().collect();
        for chunk in chars.chunks(INPUT_JSON_CHUNK_SIZE) {
            let piece: String = chunk.iter().collect();
            frames.push(paced_frame(StreamEvent::ContentBlockDelta {
                index,
                delta: Delta::InputJsonDelta { partial_json: piece },
            }));
        }

        frames.push(frame(StreamEvent::ContentBlockStop { index }));
        self.has_tool_calls = true;
    }

    fn handle_end(&mut self, frames: &mut Vec<Frame>) {
        if self.finished {
            return;
        }
        self.finished = true;

        self.close_text_block(frames);
        self.close_thinking_block(frames);

        let stop_reason = if self.has_tool_calls { "tool_use" } else { "end_turn" };
        let multiplier = if self.token_multiplier.is_finite() && self.token_multiplier > 0.0 {
            self.token_multiplier
        } else {
            1.0
        };
        let output_tokens = ((self.output_tokens as f64) * multiplier).ceil().max(1.0) as u32;

        frames.push(frame(StreamEvent::MessageDelta {
            delta: MessageDeltaBody { stop_reason, stop_sequence: None },
            usage: OutputUsage { output_tokens },
        }));
        frames.push(frame(StreamEvent::MessageStop));
    }

    /// Emits a mid-stream `error` frame without closing blocks with synthetic
    /// frames (spec §5 cancellation semantics: "partial blocks are NOT closed
    /// with synthetic frames").
    pub fn error(&mut self, error_type: &'static str, message: String) -> Frame {
        frame(StreamEvent::Error { error: ErrorBody { kind: error_type, message } })
    }
}
