use std::io::{self, BufRead};

use serde_json::Value;
use tracing::debug;

use crate::message::{Message, MessageKind, ResultMetadata, Role, TerminalResult};

/// Reads `reader` line by line and invokes `on_message` once per recognized event,
/// in stream order. Blank lines, lines that are not JSON and `system` events are
/// skipped without invoking the callback. Only read errors are returned.
pub fn parse<R, F>(reader: R, mut on_message: F) -> io::Result<()>
where
    R: BufRead,
    F: FnMut(Message),
{
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) if err.kind() == io::ErrorKind::InvalidData => {
                debug!("skipping non-utf8 stream line: {err}");
                continue;
            }
            Err(err) => return Err(err),
        };
        if let Some(message) = classify_line(&line) {
            on_message(message);
        }
    }
    Ok(())
}

pub fn classify_line(line: &str) -> Option<Message> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(err) => {
            debug!("skipping undecodable stream line: {err}");
            return None;
        }
    };
    let message = classify_value(value);
    if matches!(message.kind(), MessageKind::System { .. }) {
        return None;
    }
    Some(message)
}

/// Maps one decoded event to its message variant. Shapes that are recognized at the
/// top level but malformed inside become `MessageKind::Unknown`.
pub fn classify_value(value: Value) -> Message {
    let kind = match value.get("type").and_then(Value::as_str) {
        Some("system") => Some(MessageKind::System {
            message: string_field(&value, "message")
                .or_else(|| string_field(&value, "subtype"))
                .unwrap_or_default(),
        }),
        Some("assistant") => classify_chat(&value, Role::Assistant),
        Some("user") => classify_chat(&value, Role::User),
        Some("tool_use") => tool_invocation(&value),
        Some("tool_result") => tool_outcome(&value),
        Some("result") => Some(MessageKind::TerminalResult(terminal_result(&value))),
        _ => None,
    };
    Message::new(kind.unwrap_or(MessageKind::Unknown), value)
}

/// Latest resumption token carried by a raw event, if any.
pub fn extract_session_id(value: &Value) -> Option<String> {
    value
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string)
}

fn classify_chat(value: &Value, role: Role) -> Option<MessageKind> {
    let content = value.get("message")?.get("content")?;
    let item = match content {
        Value::String(text) => {
            return Some(MessageKind::Text {
                role,
                text: text.clone(),
            });
        }
        Value::Array(items) => items.first()?,
        _ => return None,
    };
    match item.get("type").and_then(Value::as_str)? {
        "text" => Some(MessageKind::Text {
            role,
            text: item.get("text")?.as_str()?.to_string(),
        }),
        "tool_use" => tool_invocation(item),
        "tool_result" => tool_outcome(item),
        _ => None,
    }
}

fn tool_invocation(item: &Value) -> Option<MessageKind> {
    Some(MessageKind::ToolInvocation {
        id: string_field(item, "id").unwrap_or_default(),
        name: string_field(item, "name")?,
        input: item
            .get("input")
            .cloned()
            .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
    })
}

fn tool_outcome(item: &Value) -> Option<MessageKind> {
    let tool_use_id = string_field(item, "tool_use_id")?;
    let output = match item.get("content") {
        Some(content) => content_text(content),
        None => String::new(),
    };
    Some(MessageKind::ToolOutcome {
        tool_use_id,
        output,
        is_error: item.get("is_error").and_then(Value::as_bool).unwrap_or(false),
    })
}

fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| {
                    if item.get("type").and_then(Value::as_str) == Some("image") {
                        Some("[image]".to_string())
                    } else {
                        item.get("text").and_then(Value::as_str).map(ToString::to_string)
                    }
                })
                .collect();
            if parts.is_empty() {
                content.to_string()
            } else {
                parts.join("\n")
            }
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn terminal_result(value: &Value) -> TerminalResult {
    let subtype = value.get("subtype").and_then(Value::as_str);
    let is_error = value.get("is_error").and_then(Value::as_bool).unwrap_or(false);
    let success = subtype == Some("success") && !is_error;
    let content = string_field(value, "result").unwrap_or_default();
    let metadata = match serde_json::from_value::<ResultMetadata>(value.clone()) {
        Ok(metadata) => metadata,
        Err(err) => {
            debug!("result metadata has unexpected shape: {err}");
            ResultMetadata {
                session_id: extract_session_id(value),
                ..ResultMetadata::default()
            }
        }
    };
    TerminalResult {
        error: (!success).then(|| result_error_message(value, subtype)),
        content,
        success,
        metadata,
    }
}

fn result_error_message(value: &Value, subtype: Option<&str>) -> String {
    let from_errors = value
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
        .and_then(Value::as_str)
        .filter(|text| !text.is_empty());
    let raw = ["result", "error", "message"]
        .iter()
        .find_map(|key| {
            value
                .get(*key)
                .and_then(Value::as_str)
                .filter(|text| !text.is_empty())
        })
        .or(from_errors);
    match (raw, subtype) {
        (Some(text), _) => embedded_error_message(text).unwrap_or_else(|| text.to_string()),
        (None, Some(subtype)) if subtype != "success" => format!("agent reported {subtype}"),
        _ => "Unknown error".to_string(),
    }
}

/// Pulls `error.message` out of strings like `402 {"type":"error","error":{...}}`.
fn embedded_error_message(raw: &str) -> Option<String> {
    let json_str = raw.find('{').map(|idx| &raw[idx..])?;
    let parsed: Value = serde_json::from_str(json_str).ok()?;
    parsed
        .get("error")
        .and_then(|err| err.get("message"))
        .and_then(Value::as_str)
        .or_else(|| parsed.get("message").and_then(Value::as_str))
        .map(ToString::to_string)
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(ToString::to_string)
}

#[cfg(test)]
#[path = "../tests/unit/stream_tests.rs"]
mod tests;
