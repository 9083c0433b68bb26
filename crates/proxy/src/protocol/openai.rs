//! OpenAI `chat/completions` dialect, grounded on the teacher's
//! `provider::openai` request/response shapes (model, messages, stream).

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Value, json};

use crate::model::{ClientRequest, Role};

use super::{ProtocolAdapter, UpstreamEvent};

pub struct OpenAiAdapter;

impl ProtocolAdapter for OpenAiAdapter {
    fn endpoint_path(&self) -> &'static str {
        "/chat/completions"
    }

    fn build_headers(&self, api_key: Option<&SecretString>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(key) = api_key {
            let value = format!("Bearer {}", key.expose_secret());
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(AUTHORIZATION, value);
            }
        }

        headers
    }

    fn build_body(&self, request: &ClientRequest, upstream_model: &str) -> Value {
        let mut messages = Vec::new();

        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system.as_text()}));
        }

        for message in &request.messages {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            messages.push(json!({"role": role, "content": message.content.flatten_to_text()}));
        }

        let mut body = json!({
            "model": upstream_model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "stream": request.stream,
        });

        let object = body.as_object_mut().expect("object literal");
        if let Some(temperature) = request.temperature {
            object.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(top_p) = request.top_p {
            object.insert("top_p".to_string(), json!(top_p));
        }
        if let Some(stop) = &request.stop_sequences {
            object.insert("stop".to_string(), json!(stop));
        }

        body
    }

    fn is_stream_done(&self, event: &UpstreamEvent) -> bool {
        event.data.trim() == "[DONE]"
    }

    fn extract_stream_delta(&self, event: &UpstreamEvent) -> Option<String> {
        if self.is_stream_done(event) {
            return None;
        }

        let chunk: Value = serde_json::from_str(&event.data).ok()?;
        chunk
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("content")?
            .as_str()
            .map(str::to_string)
    }

    fn extract_stream_reasoning_delta(&self, event: &UpstreamEvent) -> Option<String> {
        if self.is_stream_done(event) {
            return None;
        }

        let chunk: Value = serde_json::from_str(&event.data).ok()?;
        chunk
            .get("choices")?
            .get(0)?
            .get("delta")?
            .get("reasoning_content")?
            .as_str()
            .map(str::to_string)
    }

    fn extract_full_text(&self, response: &Value) -> Option<String> {
        response
            .get("choices")?
            .get(0)?
            .get("message")?
            .get("content")?
            .as_str()
            .map(str::to_string)
    }

    fn extract_usage(&self, response: &Value) -> Option<(u32, u32)> {
        let usage = response.get("usage")?;
        let prompt = usage.get("prompt_tokens")?.as_u64()? as u32;
        let completion = usage.get("completion_tokens")?.as_u64()? as u32;
        Some((prompt, completion))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Message, MessageContent};

    #[test]
    fn extracts_delta_text() {
        let adapter = OpenAiAdapter;
        let event = UpstreamEvent {
            event: None,
            data: r#"{"choices":[{"delta":{"content":"hel"}}]}"#.to_string(),
        };
        assert_eq!(adapter.extract_stream_delta(&event).as_deref(), Some("hel"));
    }

    #[test]
    fn done_marker_is_not_a_delta() {
        let adapter = OpenAiAdapter;
        let event = UpstreamEvent {
            event: None,
            data: "[DONE]".to_string(),
        };
        assert!(adapter.is_stream_done(&event));
        assert!(adapter.extract_stream_delta(&event).is_none());
    }

    #[test]
    fn builds_body_with_system_prompt_first() {
        let adapter = OpenAiAdapter;
        let request = ClientRequest {
            model: "gpt-4o".to_string(),
            messages: vec![Message {
                role: Role::User,
                content: MessageContent::Text("hi".to_string()),
            }],
            system: Some(crate::model::SystemPrompt::Text("be nice".to_string())),
            tools: None,
            max_tokens: 50,
            temperature: None,
            top_p: None,
            stream: false,
            thinking: None,
            stop_sequences: None,
            metadata: None,
            tool_choice: None,
        };

        let body = adapter.build_body(&request, "gpt-4o-mini");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "user");
        assert_eq!(body["model"], "gpt-4o-mini");
    }
}
