use serde_json::Value;

use crate::message::{Message, MessageKind};

const MAX_INPUT_CHARS: usize = 160;
const MAX_OUTPUT_LINES: usize = 8;

/// Turns a message into sink-ready text. Richer per-tool renderers plug in here.
pub trait Formatter: Send + Sync {
    fn format(&self, message: &Message) -> String;
}

/// ANSI-free one-record-per-message rendering.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFormatter;

impl Formatter for PlainFormatter {
    fn format(&self, message: &Message) -> String {
        match message.kind() {
            MessageKind::Text { role, text } => format!("{}: {}", role.as_str(), text.trim_end()),
            MessageKind::ToolInvocation { name, input, .. } => {
                format!("-> {name}({})", summarize_input(input))
            }
            MessageKind::ToolOutcome {
                output, is_error, ..
            } => {
                let label = if *is_error { "<- error" } else { "<- result" };
                let body = truncate_lines(output.trim_end(), MAX_OUTPUT_LINES);
                if body.is_empty() {
                    label.to_string()
                } else {
                    format!("{label}: {body}")
                }
            }
            MessageKind::TerminalResult(result) => {
                if result.success {
                    format!("result: {}", result.content)
                } else {
                    format!(
                        "result (failed): {}",
                        result.error.as_deref().unwrap_or(&result.content)
                    )
                }
            }
            MessageKind::System { message } => format!("system: {message}"),
            MessageKind::Unknown => format!(
                "unrecognized event: {}",
                message.event_type().unwrap_or("<untyped>")
            ),
        }
    }
}

fn summarize_input(input: &Value) -> String {
    let text = match input {
        Value::Object(map) if map.is_empty() => return String::new(),
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| match value {
                Value::String(text) => format!("{key}={text}"),
                other => format!("{key}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    truncate_chars(&text.replace('\n', " "), MAX_INPUT_CHARS)
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max).collect();
    out.push_str("...");
    out
}

fn truncate_lines(text: &str, max: usize) -> String {
    let total = text.lines().count();
    if total <= max {
        return text.to_string();
    }
    let mut out = text.lines().take(max).collect::<Vec<_>>().join("\n");
    out.push_str(&format!("\n... ({} more lines)", total - max));
    out
}
