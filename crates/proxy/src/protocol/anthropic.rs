//! Anthropic `/v1/messages` dialect, for upstreams that already speak it
//! (spec §4.4's second branch). Grounded on the teacher's
//! `protocol::anthropic::messages::sse::StreamEvent` tagged-enum shape.

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::model::{ClientRequest, Role};

use super::{ProtocolAdapter, UpstreamEvent};

pub struct AnthropicAdapter;

impl ProtocolAdapter for AnthropicAdapter {
    fn endpoint_path(&self) -> &'static str {
        "/v1/messages"
    }

    fn build_headers(&self, api_key: Option<&SecretString>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            HeaderName::from_static("anthropic-version"),
            HeaderValue::from_static("2023-06-01"),
        );

        if let Some(key) = api_key
            && let Ok(value) = HeaderValue::from_str(key.expose_secret())
        {
            headers.insert(HeaderName::from_static("x-api-key"), value);
        }

        headers
    }

    fn build_body(&self, request: &ClientRequest, upstream_model: &str) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|message| {
                let role = match message.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                json!({"role": role, "content": message.content.flatten_to_text()})
            })
            .collect();

        let mut body = json!({
            "model": upstream_model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "stream": request.stream,
        });

        let object = body.as_object_mut().expect("object literal");
        if let Some(system) = &request.system {
            object.insert("system".to_string(), json!(system.as_text()));
        }
        if let Some(temperature) = request.temperature {
            object.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            object.insert("top_p".to_string(), json!(top_p));
        }
        if let Some(stop) = &request.stop_sequences {
            object.insert("stop_sequences".to_string(), json!(stop));
        }

        body
    }

    fn is_stream_done(&self, event: &UpstreamEvent) -> bool {
        event.event.as_deref() == Some("message_stop")
    }

    fn extract_stream_delta(&self, event: &UpstreamEvent) -> Option<String> {
        if event.event.as_deref() != Some("content_block_delta") {
            return None;
        }

        let payload: Value = serde_json::from_str(&event.data).ok()?;
        match payload.get("delta")?.get("type")?.as_str()? {
            "text_delta" => payload.get("delta")?.get("text")?.as_str().map(str::to_string),
            _ => None,
        }
    }

    fn extract_full_text(&self, response: &Value) -> Option<String> {
        let blocks = response.get("content")?.as_array()?;
        let text = blocks
            .iter()
            .filter_map(|block| {
                if block.get("type")?.as_str()? == "text" {
                    block.get("text")?.as_str()
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join("");

        Some(text)
    }

    fn extract_usage(&self, response: &Value) -> Option<(u32, u32)> {
        let usage = response.get("usage")?;
        let input = usage.get("input_tokens")?.as_u64()? as u32;
        let output = usage.get("output_tokens")?.as_u64()? as u32;
        Some((input, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_text_delta_from_content_block_delta() {
        let adapter = AnthropicAdapter;
        let event = UpstreamEvent {
            event: Some("content_block_delta".to_string()),
            data: r#"{"index":0,"delta":{"type":"text_delta","text":"hi"}}"#.to_string(),
        };
        assert_eq!(adapter.extract_stream_delta(&event).as_deref(), Some("hi"));
    }

    #[test]
    fn ignores_non_text_deltas() {
        let adapter = AnthropicAdapter;
        let event = UpstreamEvent {
            event: Some("content_block_delta".to_string()),
            data: r#"{"index":0,"delta":{"type":"input_json_delta","partial_json":"{}"}}"#.to_string(),
        };
        assert!(adapter.extract_stream_delta(&event).is_none());
    }

    #[test]
    fn message_stop_ends_the_stream() {
        let adapter = AnthropicAdapter;
        let event = UpstreamEvent {
            event: Some("message_stop".to_string()),
            data: "{}".to_string(),
        };
        assert!(adapter.is_stream_done(&event));
    }

    #[test]
    fn extracts_full_text_from_content_blocks() {
        let adapter = AnthropicAdapter;
        let response = json!({"content": [{"type": "text", "text": "hello"}]});
        assert_eq!(adapter.extract_full_text(&response).as_deref(), Some("hello"));
    }
}
