//! C2 — prompt injector.

use serde_json::Value;

use crate::{
    model::{ClientRequest, SystemPrompt, ToolDef},
    trigger::TriggerDelimiter,
};

/// Builds the `<function_list>` XML catalog for a tool set, HTML-escaping
/// descriptions on `<`/`>` (spec §4.2). Empty input renders the fixed
/// `<function_list>None</function_list>` skeleton.
pub fn render_catalog(tools: &[ToolDef]) -> String {
    if tools.is_empty() {
        return "<function_list>None</function_list>".to_string();
    }

    let mut xml = String::from("<function_list>");

    for (index, tool) in tools.iter().enumerate() {
        let required = tool.required();

        xml.push_str(&format!("<tool id=\"{index}\">"));
        xml.push_str(&format!("<name>{}</name>", escape(&tool.name)));
        xml.push_str(&format!("<description>{}</description>", escape(&tool.description)));

        xml.push_str("<required>");
        for name in &required {
            xml.push_str(&format!("<param>{}</param>", escape(name)));
        }
        xml.push_str("</required>");

        xml.push_str("<parameters>");
        for (name, schema) in tool.properties() {
            let ty = schema.get("type").and_then(Value::as_str).unwrap_or("any");
            let description = schema.get("description").and_then(Value::as_str);
            let is_required = required.contains(&name);

            xml.push_str("<parameter>");
            xml.push_str(&format!("<name>{}</name>", escape(&name)));
            xml.push_str(&format!("<type>{}</type>", escape(ty)));
            xml.push_str(&format!("<required>{is_required}</required>"));

            if let Some(description) = description {
                xml.push_str(&format!("<description>{}</description>", escape(description)));
            }

            if let Some(values) = schema.get("enum") {
                xml.push_str(&format!("<enum>{}</enum>", escape(&values.to_string())));
            }

            xml.push_str("</parameter>");
        }
        xml.push_str("</parameters>");

        xml.push_str("</tool>");
    }

    xml.push_str("</function_list>");
    xml
}

fn escape(value: &str) -> String {
    value.replace('<', "&lt;").replace('>', "&gt;")
}

const INSTRUCTION_TEMPLATE: &str = concat!(
    "You have access to the following tools:\n\n",
    "{tools_list}\n\n",
    "When you decide to use a tool, follow this protocol exactly:\n",
    "1. Do not say anything else while you are selecting a tool — stay silent.\n",
    "2. On its own line, immediately before the invocation, print exactly: {trigger_signal}\n",
    "3. Follow it with a single <invoke name=\"tool_name\"> block containing one\n",
    "   <parameter name=\"param_name\">value</parameter> element per argument.\n",
    "   Encode any complex (non-scalar) parameter value as a JSON string.\n",
    "4. Stop generating immediately after the closing </invoke> tag.\n",
);

/// Renders the instruction template for one request, substituting the
/// per-request trigger signal and rendered tool catalog.
pub fn render_instructions(delimiter: &TriggerDelimiter, tools: &[ToolDef]) -> String {
    INSTRUCTION_TEMPLATE
        .replace("{trigger_signal}", &delimiter.tc_start)
        .replace("{tools_list}", &render_catalog(tools))
}

/// Enriches a client request with tools into one the upstream (which has no
/// native function-calling) can execute: a synthetic system prompt teaching
/// it the trigger+XML protocol, paired with a fresh delimiter.
///
/// Passes the request through unchanged, with no delimiter, when it declares
/// no tools (pure passthrough, spec §4.2).
pub fn enrich(request: &ClientRequest) -> (ClientRequest, Option<TriggerDelimiter>) {
    if !request.has_tools() {
        return (request.clone(), None);
    }

    let delimiter = TriggerDelimiter::generate();
    let tools = request.tools.clone().unwrap_or_default();
    let instructions = render_instructions(&delimiter, &tools);

    let mut enriched = request.clone();
    enriched.system = Some(match enriched.system {
        Some(existing) => SystemPrompt::Text(format!("{}\n\n{instructions}", existing.as_text())),
        None => SystemPrompt::Text(instructions),
    });

    (enriched, Some(delimiter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Message;

    fn weather_tool() -> ToolDef {
        ToolDef {
            name: "get_weather".to_string(),
            description: "Get the <current> weather".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "city": {"type": "string", "description": "The city name"}
                },
                "required": ["city"]
            }),
        }
    }

    #[test]
    fn empty_tools_render_none_skeleton() {
        assert_eq!(render_catalog(&[]), "<function_list>None</function_list>");
    }

    #[test]
    fn escapes_angle_brackets_in_descriptions() {
        let xml = render_catalog(&[weather_tool()]);
        assert!(xml.contains("Get the &lt;current&gt; weather"));
        assert!(!xml.contains("<current>"));
    }

    #[test]
    fn passthrough_when_no_tools() {
        let request = ClientRequest {
            model: "openai+gpt-4o".to_string(),
            messages: vec![Message {
                role: crate::model::Role::User,
                content: crate::model::MessageContent::Text("hi".to_string()),
            }],
            system: None,
            tools: None,
            max_tokens: 100,
            temperature: None,
            top_p: None,
            stream: false,
            thinking: None,
            stop_sequences: None,
            metadata: None,
            tool_choice: None,
        };

        let (enriched, delimiter) = enrich(&request);
        assert!(delimiter.is_none());
        assert!(enriched.system.is_none());
    }

    #[test]
    fn enrichment_sets_delimiter_and_system_prompt() {
        let mut request_messages = vec![Message {
            role: crate::model::Role::User,
            content: crate::model::MessageContent::Text("weather?".to_string()),
        }];
        let request = ClientRequest {
            model: "openai+gpt-4o".to_string(),
            messages: std::mem::take(&mut request_messages),
            system: None,
            tools: Some(vec![weather_tool()]),
            max_tokens: 100,
            temperature: None,
            top_p: None,
            stream: false,
            thinking: None,
            stop_sequences: None,
            metadata: None,
            tool_choice: None,
        };

        let (enriched, delimiter) = enrich(&request);
        let delimiter = delimiter.expect("tools present, delimiter required");

        let system_text = enriched.system.unwrap().as_text();
        assert!(system_text.contains(&delimiter.tc_start));
        assert!(system_text.contains("get_weather"));
    }
}
