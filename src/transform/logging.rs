//! Best-effort reverse mapping from the wire-schema request body back to
//! generic chat messages. Exists purely so request logs read as a
//! conversation; malformed shapes are logged and skipped, never failed.

use serde_json::Value;
use tracing::debug;

use crate::models::chat::{ContentPart, RawMessage, Role, ToolCall};

/// Reconstruct a readable message history from a wire request body.
pub fn messages_from_wire(body: &Value) -> Vec<RawMessage> {
    let mut messages = Vec::new();

    let Some(input) = body.get("input") else {
        return messages;
    };

    match input {
        Value::String(text) => messages.push(RawMessage::user_text(text.clone())),
        Value::Array(items) => {
            // Consecutive function_call items are grouped into one
            // synthetic assistant message carrying those tool calls.
            let mut pending_calls: Vec<ToolCall> = Vec::new();

            for item in items {
                if let Some(call) = parse_function_call(item) {
                    pending_calls.push(call);
                    continue;
                }

                flush_calls(&mut pending_calls, &mut messages);

                match convert_item(item) {
                    Some(message) => messages.push(message),
                    None => debug!(item = %item, "Skipping unrecognized input item in log mapping"),
                }
            }

            flush_calls(&mut pending_calls, &mut messages);
        }
        other => debug!(input = %other, "Unexpected input shape in log mapping"),
    }

    messages
}

fn flush_calls(pending: &mut Vec<ToolCall>, messages: &mut Vec<RawMessage>) {
    if pending.is_empty() {
        return;
    }

    let mut message = RawMessage::new(Role::Assistant, Vec::new());
    message.tool_calls = Some(std::mem::take(pending));
    messages.push(message);
}

fn parse_function_call(item: &Value) -> Option<ToolCall> {
    if item.get("type").and_then(Value::as_str) != Some("function_call") {
        return None;
    }

    Some(ToolCall {
        id: item
            .get("call_id")
            .or_else(|| item.get("id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        name: item.get("name").and_then(Value::as_str)?.to_string(),
        arguments: item
            .get("arguments")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

fn convert_item(item: &Value) -> Option<RawMessage> {
    match item.get("type").and_then(Value::as_str) {
        Some("message") | None => {
            let role = match item.get("role").and_then(Value::as_str)? {
                "system" | "developer" => Role::System,
                "user" => Role::User,
                "assistant" => Role::Assistant,
                _ => return None,
            };

            let content = match item.get("content") {
                Some(Value::String(text)) => vec![ContentPart::text(text.clone())],
                Some(Value::Array(parts)) => parts.iter().filter_map(convert_part).collect(),
                _ => Vec::new(),
            };

            Some(RawMessage::new(role, content))
        }
        Some("function_call_output") => {
            let mut message = RawMessage::new(
                Role::Tool,
                vec![ContentPart::text(
                    item.get("output")
                        .and_then(Value::as_str)
                        .unwrap_or_default(),
                )],
            );
            message.tool_call_id = item
                .get("call_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(message)
        }
        Some("reasoning") => Some(RawMessage::new(
            Role::Assistant,
            vec![ContentPart::Thinking {
                id: item
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                encrypted_content: item
                    .get("encrypted_content")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }],
        )),
        _ => None,
    }
}

fn convert_part(part: &Value) -> Option<ContentPart> {
    match part.get("type").and_then(Value::as_str)? {
        "input_text" | "output_text" | "text" => Some(ContentPart::text(
            part.get("text").and_then(Value::as_str)?.to_string(),
        )),
        "refusal" => Some(ContentPart::text(
            part.get("refusal").and_then(Value::as_str)?.to_string(),
        )),
        "input_image" => Some(ContentPart::Image {
            url: part
                .get("image_url")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        _ => Some(ContentPart::Opaque { data: part.clone() }),
    }
}
