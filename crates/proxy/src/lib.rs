//! Protocol-translation pipeline: turns a plain-text chat completion from a
//! non-Anthropic-native upstream into an Anthropic-shaped `/v1/messages`
//! response, streaming or not, with synthetic tool-use recovered from an
//! XML/trigger-signal convention injected into the prompt.
//!
//! Module-to-component mapping (spec §2, §4):
//! - [`trigger`] — C1, the per-request trigger signal.
//! - [`prompt`] — C2, the tool-catalog/instruction injector.
//! - [`channel`] — C3, `model` string → upstream resolution.
//! - [`protocol`] — C4, the OpenAI/Anthropic wire dialects.
//! - [`parser`] — C5, the incremental character-fed state machine.
//! - [`sse_writer`] — C6, the Anthropic-shaped SSE frame builder.
//! - [`retry`] — C7, the bounded malformed-tool-call repair loop.
//! - [`token_counter`] — C8, the tiktoken-backed counting facade.
//! - [`context`] — C9, the immutable per-request context.
//! - [`forwarder`] — C10, end-to-end composition of the above.

pub mod channel;
pub mod context;
pub mod error;
pub mod forwarder;
pub mod model;
pub mod parser;
pub mod prompt;
pub mod protocol;
pub mod retry;
pub mod sse_event;
pub mod sse_writer;
pub mod token_counter;
pub mod trigger;

pub use context::RequestContext;
pub use error::{ProxyError, Result};
pub use forwarder::Forwarder;
pub use model::{ClientRequest, MessageResponse};
