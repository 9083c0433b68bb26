//! Anthropic SSE wire shapes emitted at `/v1/messages` (spec §6 "Anthropic
//! SSE events emitted"). Grounded on the teacher's
//! `protocol::anthropic::messages::sse::StreamEvent` tagged-enum shape
//! (`#[serde(tag = "type", rename_all = "snake_case")]`), trimmed to exactly
//! the event/delta variants this bridge produces.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart { message: MessageStart },
    Ping,
    ContentBlockStart { index: u32, content_block: ContentBlock },
    ContentBlockDelta { index: u32, delta: Delta },
    ContentBlockStop { index: u32 },
    MessageDelta { delta: MessageDeltaBody, usage: OutputUsage },
    MessageStop,
    Error { error: ErrorBody },
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageStart {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
    pub model: String,
    pub content: [(); 0],
    pub stop_reason: Option<&'static str>,
    pub stop_sequence: Option<&'static str>,
    pub usage: InputUsage,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct InputUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct OutputUsage {
    pub output_tokens: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageDeltaBody {
    pub stop_reason: &'static str,
    pub stop_sequence: Option<&'static str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    Thinking { thinking: String, signature: String },
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Delta {
    TextDelta { text: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
    InputJsonDelta { partial_json: String },
}

impl StreamEvent {
    /// The SSE `event:` field name, matching the `type` tag used in `data:`.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::MessageStart { .. } => "message_start",
            Self::Ping => "ping",
            Self::ContentBlockStart { .. } => "content_block_start",
            Self::ContentBlockDelta { .. } => "content_block_delta",
            Self::ContentBlockStop { .. } => "content_block_stop",
            Self::MessageDelta { .. } => "message_delta",
            Self::MessageStop => "message_stop",
            Self::Error { .. } => "error",
        }
    }

    /// Renders to an `axum::response::sse::Event` (named event + JSON data).
    pub fn into_axum_event(self) -> axum::response::sse::Event {
        let name = self.event_name();
        axum::response::sse::Event::default()
            .event(name)
            .json_data(&self)
            .unwrap_or_else(|_| axum::response::sse::Event::default().event("error").data("{}"))
    }
}
