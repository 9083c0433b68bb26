//! C5 — incremental stream parser.
//!
//! A single-threaded, character-fed state machine (spec §4.5, §9 "represent
//! with an explicit state enum and a rolling match buffer; do not pipe
//! through generators"). Feed it the upstream's plain-text assistant output
//! one character at a time via [`IncrementalParser::feed_char`], plus any
//! upstream-native reasoning deltas via [`IncrementalParser::feed_reasoning`],
//! then call [`IncrementalParser::finish`] at EOF and drain
//! [`IncrementalParser::consume_events`].

use std::collections::VecDeque;

use serde_json::Value;

use crate::trigger::{INVOKE_CLOSE, INVOKE_OPEN, PARAM_CLOSE, PARAM_OPEN, TriggerDelimiter};

const THINKING_OPEN: &str = "<thinking>";
const THINKING_CLOSE: &str = "</thinking>";
const INVOKE_OPEN_NO_NAME: &str = "<invoke>";
const PARAM_OPEN_NO_NAME: &str = "<parameter>";
const NAME_CLOSE: &str = "\">";

/// One unit of output from the parser (spec §3 `ParserEvent`).
#[derive(Debug, Clone, PartialEq)]
pub enum ParserEvent {
    Text { content: String },
    Thinking { content: String },
    ToolCall { name: String, arguments: Value },
    /// `content` is the full raw text from the trigger signal through what
    /// was consumed; `prior_text` is the text emitted before the trigger was
    /// seen, so the retry controller can show the upstream both.
    ToolCallFailed { content: String, prior_text: String },
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Normal,
    Thinking,
    ToolScanInvoke,
    ToolName,
    ToolBody,
    ToolParamName,
    ToolParamValue,
    /// A tool call (well-formed or malformed) has already been resolved for
    /// this response; everything further is dropped (DESIGN.md's decision on
    /// multiple `<invoke>` blocks in one upstream turn).
    Done,
}

/// Rolling-window marker matcher (spec §4.5: "matching of multi-character
/// markers is performed with a rolling window the length of the longest
/// marker; partially matched prefixes are not emitted as text until
/// refuted"). Not a general substring search — restarts the candidate check
/// from scratch on refutation, which is correct (if not maximally efficient)
/// for the fixed, non-self-overlapping literal markers this parser watches.
#[derive(Debug, Default)]
struct Matcher {
    pending: String,
}

enum Step {
    Waiting,
    Matched(usize),
}

impl Matcher {
    fn reset(&mut self) {
        self.pending.clear();
    }

    /// Feeds one character against `candidates`. Returns characters that are
    /// definitely not part of any candidate (the caller decides whether to
    /// emit, buffer, or drop them) plus the match outcome.
    fn feed(&mut self, c: char, candidates: &[&str]) -> (Vec<char>, Step) {
        self.pending.push(c);
        let mut flushed = Vec::new();

        loop {
            if let Some(idx) = candidates.iter().position(|m| *m == self.pending) {
                self.pending.clear();
                return (flushed, Step::Matched(idx));
            }

            if self.pending.is_empty() || candidates.iter().any(|m| m.starts_with(self.pending.as_str())) {
                return (flushed, Step::Waiting);
            }

            let mut chars = self.pending.chars();
            flushed.push(chars.next().expect("pending is non-empty"));
            self.pending = chars.collect();
        }
    }
}

pub struct IncrementalParser {
    state: State,
    matcher: Matcher,
    delimiter: Option<TriggerDelimiter>,

    text_buf: String,
    thinking_buf: String,
    prior_text: String,
    raw_since_trigger: String,

    tool_name: String,
    tool_params: serde_json::Map<String, Value>,
    current_param_name: String,
    current_param_value: String,
    current_param_named: bool,

    malformed: bool,
    events: VecDeque<ParserEvent>,
    finished: bool,
}

impl IncrementalParser {
    pub fn new(delimiter: Option<TriggerDelimiter>) -> Self {
        Self {
            state: State::Normal,
            matcher: Matcher::default(),
            delimiter,
            text_buf: String::new(),
            thinking_buf: String::new(),
            prior_text: String::new(),
            raw_since_trigger: String::new(),
            tool_name: String::new(),
            tool_params: serde_json::Map::new(),
            current_param_name: String::new(),
            current_param_value: String::new(),
            current_param_named: false,
            malformed: false,
            events: VecDeque::new(),
            finished: false,
        }
    }

    /// Feeds one character of the upstream's plain-text assistant response.
    pub fn feed_char(&mut self, c: char) {
        match self.state {
            State::Normal => self.feed_normal(c),
            State::Thinking => self.feed_thinking(c),
            State::ToolScanInvoke => self.feed_tool_scan_invoke(c),
            State::ToolName => self.feed_tool_name(c),
            State::ToolBody => self.feed_tool_body(c),
            State::ToolParamName => self.feed_tool_param_name(c),
            State::ToolParamValue => self.feed_tool_param_value(c),
            State::Done => {}
        }
    }

    /// Feeds a whole chunk of plain text, one character at a time, then
    /// flushes any confirmed-non-marker text accumulated during this chunk
    /// as a `Text` event. Flushing at chunk boundaries (rather than only at
    /// `finish()`) is what lets a marker-free response stream incrementally:
    /// the forwarder calls this once per upstream SSE delta, so each call
    /// surfaces that delta's text instead of it all landing in one `Text`
    /// event at EOF.
    pub fn feed_str(&mut self, s: &str) {
        for c in s.chars() {
            self.feed_char(c);
        }
        if self.state == State::Normal {
            self.flush_text();
        }
    }

    /// Feeds an upstream-native thinking delta (e.g. OpenAI's
    /// `reasoning_content`), appended verbatim as its own `Thinking` event
    /// rather than scanned for `<thinking>` tags.
    pub fn feed_reasoning(&mut self, s: &str) {
        if !s.is_empty() {
            self.events.push_back(ParserEvent::Thinking { content: s.to_string() });
        }
    }

    /// Signals EOF. Flushes any pending buffers and, if a tool call was left
    /// unterminated, emits `ToolCallFailed`.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        match self.state {
            State::Normal => self.flush_text(),
            State::Thinking => self.flush_thinking(),
            State::ToolScanInvoke | State::ToolName | State::ToolBody | State::ToolParamName | State::ToolParamValue => {
                self.fail_tool_call();
            }
            State::Done => {}
        }

        self.events.push_back(ParserEvent::End);
    }

    /// Drains and returns all events produced so far, in order.
    pub fn consume_events(&mut self) -> Vec<ParserEvent> {
        self.events.drain(..).collect()
    }

    fn flush_text(&mut self) {
        if !self.text_buf.is_empty() {
            let content = std::mem::take(&mut self.text_buf);
            self.prior_text.push_str(&content);
            self.events.push_back(ParserEvent::Text { content });
        }
    }

    fn flush_thinking(&mut self) {
        if !self.thinking_buf.is_empty() {
            let content = std::mem::take(&mut self.thinking_buf);
            self.events.push_back(ParserEvent::Thinking { content });
        }
    }

    fn fail_tool_call(&mut self) {
        let content = self.raw_since_trigger.clone();
        let prior_text = self.prior_text.clone();
        self.events.push_back(ParserEvent::ToolCallFailed { content, prior_text });
        self.state = State::Done;
    }

    fn succeed_tool_call(&mut self) {
        let name = self.tool_name.clone();
        let arguments = Value::Object(self.tool_params.clone());
        self.events.push_back(ParserEvent::ToolCall { name, arguments });
        self.state = State::Done;
    }

    fn feed_normal(&mut self, c: char) {
        let trigger = self.delimiter.as_ref().map(|d| d.tc_start.as_str());
        let mut candidates: Vec<&str> = vec![THINKING_OPEN];
        if let Some(trigger) = trigger {
            candidates.push(trigger);
        }

        let (flushed, step) = self.matcher.feed(c, &candidates);
        self.text_buf.extend(flushed);

        if let Step::Matched(idx) = step {
            let marker = candidates[idx];
            if marker == THINKING_OPEN {
                self.flush_text();
                self.state = State::Thinking;
            } else {
                // The matched marker is the trigger signal.
                self.flush_text();
                self.raw_since_trigger = marker.to_string();
                self.state = State::ToolScanInvoke;
            }
            self.matcher.reset();
        }
    }

    fn feed_thinking(&mut self, c: char) {
        let (flushed, step) = self.matcher.feed(c, &[THINKING_CLOSE]);
        self.thinking_buf.extend(flushed);

        if let Step::Matched(_) = step {
            self.flush_thinking();
            self.state = State::Normal;
            self.matcher.reset();
        }
    }

    fn feed_tool_scan_invoke(&mut self, c: char) {
        let candidates = [INVOKE_OPEN, INVOKE_OPEN_NO_NAME];
        let (flushed, step) = self.matcher.feed(c, &candidates);
        self.raw_since_trigger.extend(flushed);

        if let Step::Matched(idx) = step {
            self.raw_since_trigger.push_str(candidates[idx]);
            self.matcher.reset();
            if candidates[idx] == INVOKE_OPEN_NO_NAME {
                self.malformed = true;
                self.state = State::ToolBody;
            } else {
                self.state = State::ToolName;
            }
        }
    }

    fn feed_tool_name(&mut self, c: char) {
        let (flushed, step) = self.matcher.feed(c, &[NAME_CLOSE]);
        for &ch in &flushed {
            self.tool_name.push(ch);
            self.raw_since_trigger.push(ch);
        }

        if let Step::Matched(_) = step {
            self.raw_since_trigger.push_str(NAME_CLOSE);
            self.matcher.reset();
            self.state = State::ToolBody;
        }
    }

    fn feed_tool_body(&mut self, c: char) {
        let candidates = [PARAM_OPEN, PARAM_OPEN_NO_NAME, INVOKE_CLOSE];
        let (flushed, step) = self.matcher.feed(c, &candidates);
        self.raw_since_trigger.extend(flushed);

        if let Step::Matched(idx) = step {
            let marker = candidates[idx];
            self.raw_since_trigger.push_str(marker);
            self.matcher.reset();

            match marker {
                INVOKE_CLOSE => {
                    if self.malformed {
                        self.fail_tool_call();
                    } else {
                        self.succeed_tool_call();
                    }
                }
                PARAM_OPEN_NO_NAME => {
                    self.malformed = true;
                    self.current_param_name.clear();
                    self.current_param_value.clear();
                    self.current_param_named = false;
                    self.state = State::ToolParamValue;
                }
                _ => {
                    self.current_param_name.clear();
                    self.current_param_value.clear();
                    self.current_param_named = true;
                    self.state = State::ToolParamName;
                }
            }
        }
    }

    fn feed_tool_param_name(&mut self, c: char) {
        let (flushed, step) = self.matcher.feed(c, &[NAME_CLOSE]);
        for &ch in &flushed {
            self.current_param_name.push(ch);
            self.raw_since_trigger.push(ch);
        }

        if let Step::Matched(_) = step {
            self.raw_since_trigger.push_str(NAME_CLOSE);
            self.matcher.reset();
            self.state = State::ToolParamValue;
        }
    }

    fn feed_tool_param_value(&mut self, c: char) {
        let (flushed, step) = self.matcher.feed(c, &[PARAM_CLOSE]);
        for &ch in &flushed {
            self.current_param_value.push(ch);
            self.raw_since_trigger.push(ch);
        }

        if let Step::Matched(_) = step {
            self.raw_since_trigger.push_str(PARAM_CLOSE);
            self.matcher.reset();

            if self.current_param_named {
                let value = serde_json::from_str::<Value>(&self.current_param_value)
                    .unwrap_or_else(|_| Value::String(self.current_param_value.clone()));
                self.tool_params.insert(self.current_param_name.clone(), value);
            }

            self.state = State::ToolBody;
        }
    }
}
