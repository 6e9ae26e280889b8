use anyhow::{anyhow, Result};
use bytes::BytesMut;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use super::base::{ProviderEvent, Usage};
use crate::models::message::{ImageContent, Message, MessageContent};
use crate::models::tool::Tool;

/// Convert internal Message format to OpenAI's API message specification
pub fn messages_to_openai_spec(messages: &[Message]) -> Vec<Value> {
    let mut messages_spec = Vec::new();

    for message in messages {
        let mut converted = json!({
            "role": message.role
        });

        let mut text_parts = Vec::new();
        let mut image_parts = Vec::new();
        let mut output = Vec::new();

        for content in &message.content {
            match content {
                MessageContent::Text(text) => {
                    if !text.is_empty() {
                        text_parts.push(text.clone());
                    }
                }
                MessageContent::Image(image) => image_parts.push(convert_image(image)),
                MessageContent::ToolRequest(request) => match &request.tool_call {
                    Ok(tool_call) => {
                        let sanitized_name = sanitize_function_name(&tool_call.name);
                        if let Some(object) = converted.as_object_mut() {
                            let tool_calls = object.entry("tool_calls").or_insert(json!([]));
                            if let Some(array) = tool_calls.as_array_mut() {
                                array.push(json!({
                                    "id": request.id,
                                    "type": "function",
                                    "function": {
                                        "name": sanitized_name,
                                        "arguments": tool_call.arguments.to_string(),
                                    }
                                }));
                            }
                        }
                    }
                    Err(e) => {
                        output.push(json!({
                            "role": "tool",
                            "content": format!("Error: {}", e),
                            "tool_call_id": request.id
                        }));
                    }
                },
                MessageContent::ToolResponse(response) => {
                    let content = match &response.output {
                        Ok(text) => text.clone(),
                        // A tool error is shown as output so the model can interpret it
                        Err(e) => format!("The tool call returned the following error:\n{}", e),
                    };
                    output.push(json!({
                        "role": "tool",
                        "content": content,
                        "tool_call_id": response.id
                    }));
                }
            }
        }

        if image_parts.is_empty() {
            if !text_parts.is_empty() {
                converted["content"] = json!(text_parts.join("\n"));
            }
        } else {
            let mut parts: Vec<Value> = text_parts
                .into_iter()
                .map(|text| json!({"type": "text", "text": text}))
                .collect();
            parts.extend(image_parts);
            converted["content"] = json!(parts);
        }

        if converted.get("content").is_some() || converted.get("tool_calls").is_some() {
            output.insert(0, converted);
        }
        messages_spec.extend(output);
    }

    messages_spec
}

/// Convert an image into an OpenAI image_url part
pub fn convert_image(image: &ImageContent) -> Value {
    json!({
        "type": "image_url",
        "image_url": {
            "url": format!("data:{};base64,{}", image.mime_type, image.data)
        }
    })
}

/// Convert internal Tool format to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> Result<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(anyhow!("Duplicate tool name: {}", tool.name));
        }

        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

pub fn sanitize_function_name(name: &str) -> String {
    let re = Regex::new(r"[^a-zA-Z0-9_-]").expect("valid regex");
    re.replace_all(name, "_").to_string()
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

/// Folds OpenAI `chat.completion.chunk` payloads into provider events.
///
/// Tool call deltas arrive split across chunks keyed by index; they are only
/// emitted once the choice reports a finish reason so consumers always see a
/// complete name and argument string. The closing `Finish` event waits for
/// [`ChunkAccumulator::finish`] since usage arrives in a trailing chunk.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    tool_calls: BTreeMap<u64, PartialToolCall>,
    usage: Usage,
    reason: Option<String>,
    finished: bool,
}

impl ChunkAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one decoded `data:` payload
    pub fn push(&mut self, chunk: &Value) -> Result<Vec<ProviderEvent>> {
        if let Some(error) = chunk.get("error") {
            return Err(anyhow!("OpenAI API error: {}", error));
        }

        if let Some(usage) = chunk.get("usage").filter(|u| !u.is_null()) {
            self.usage = parse_usage(usage);
        }

        let mut events = Vec::new();
        let Some(choice) = chunk.get("choices").and_then(|c| c.get(0)) else {
            return Ok(events);
        };

        let delta = &choice["delta"];
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            if !text.is_empty() {
                events.push(ProviderEvent::Text(text.to_string()));
            }
        }

        if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for call in calls {
                let index = call.get("index").and_then(Value::as_u64).unwrap_or(0);
                let partial = self.tool_calls.entry(index).or_default();
                if let Some(id) = call.get("id").and_then(Value::as_str) {
                    partial.id = id.to_string();
                }
                if let Some(name) = call["function"].get("name").and_then(Value::as_str) {
                    partial.name.push_str(name);
                }
                if let Some(args) = call["function"].get("arguments").and_then(Value::as_str) {
                    partial.arguments.push_str(args);
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.reason = Some(reason.to_string());
            events.extend(self.flush_tool_calls());
        }

        Ok(events)
    }

    fn flush_tool_calls(&mut self) -> Vec<ProviderEvent> {
        std::mem::take(&mut self.tool_calls)
            .into_values()
            .map(|call| ProviderEvent::ToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            })
            .collect()
    }

    /// End of stream: flush pending tool calls and report completion, using
    /// `default_reason` if the backend never sent one. Idempotent.
    pub fn finish(&mut self, default_reason: &str) -> Vec<ProviderEvent> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        let mut events = self.flush_tool_calls();
        events.push(ProviderEvent::Finish {
            reason: self
                .reason
                .take()
                .unwrap_or_else(|| default_reason.to_string()),
            usage: self.usage.clone(),
        });
        events
    }
}

fn parse_usage(usage: &Value) -> Usage {
    let read = |key: &str| usage.get(key).and_then(Value::as_i64).map(|v| v as i32);
    let input_tokens = read("prompt_tokens");
    let output_tokens = read("completion_tokens");
    let total_tokens = read("total_tokens").or(match (input_tokens, output_tokens) {
        (Some(input), Some(output)) => Some(input + output),
        _ => None,
    });
    Usage::new(input_tokens, output_tokens, total_tokens)
}

/// Split buffered SSE bytes into complete `data:` payloads, leaving any partial line in `buffer`
pub fn drain_sse_data(buffer: &mut BytesMut) -> Vec<String> {
    let mut payloads = Vec::new();
    while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
        let line = buffer.split_to(newline + 1);
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches(['\r', '\n']);
        if let Some(data) = line.strip_prefix("data:") {
            payloads.push(data.trim_start().to_string());
        }
    }
    payloads
}
