//! Typed model for every event shape the agent emits on its stream-json output.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Assistant,
    User,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Assistant => "assistant",
            Self::User => "user",
        }
    }
}

/// One decoded stream event. The timestamp and raw payload are fixed at creation.
#[derive(Debug, Clone)]
pub struct Message {
    created_at: DateTime<Utc>,
    raw: Value,
    kind: MessageKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text {
        role: Role,
        text: String,
    },
    ToolInvocation {
        id: String,
        name: String,
        input: Value,
    },
    ToolOutcome {
        tool_use_id: String,
        output: String,
        is_error: bool,
    },
    TerminalResult(TerminalResult),
    System {
        message: String,
    },
    Unknown,
}

impl Message {
    pub fn new(kind: MessageKind, raw: Value) -> Self {
        Self {
            created_at: Utc::now(),
            raw,
            kind,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn kind(&self) -> &MessageKind {
        &self.kind
    }

    pub fn into_kind(self) -> MessageKind {
        self.kind
    }

    /// Equality ignoring the creation timestamp.
    pub fn same_content(&self, other: &Self) -> bool {
        self.kind == other.kind && self.raw == other.raw
    }

    pub fn terminal_result(&self) -> Option<&TerminalResult> {
        match &self.kind {
            MessageKind::TerminalResult(result) => Some(result),
            _ => None,
        }
    }

    /// The `type` field of the raw payload, if any.
    pub fn event_type(&self) -> Option<&str> {
        self.raw.get("type").and_then(Value::as_str)
    }
}

/// The single event that concludes one conversation attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalResult {
    pub content: String,
    pub success: bool,
    pub error: Option<String>,
    pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResultMetadata {
    #[serde(deserialize_with = "lenient")]
    pub session_id: Option<String>,
    #[serde(deserialize_with = "lenient")]
    pub num_turns: Option<u32>,
    #[serde(deserialize_with = "lenient")]
    pub duration_ms: Option<u64>,
    #[serde(deserialize_with = "lenient")]
    pub duration_api_ms: Option<u64>,
    #[serde(deserialize_with = "lenient")]
    pub total_cost_usd: Option<f64>,
    #[serde(deserialize_with = "lenient")]
    pub usage: Option<Usage>,
    #[serde(rename = "modelUsage", deserialize_with = "lenient")]
    pub model_usage: BTreeMap<String, ModelUsage>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    #[serde(deserialize_with = "lenient")]
    pub input_tokens: u64,
    #[serde(deserialize_with = "lenient")]
    pub output_tokens: u64,
    #[serde(deserialize_with = "lenient")]
    pub cache_creation_input_tokens: u64,
    #[serde(deserialize_with = "lenient")]
    pub cache_read_input_tokens: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelUsage {
    #[serde(deserialize_with = "lenient")]
    pub input_tokens: u64,
    #[serde(deserialize_with = "lenient")]
    pub output_tokens: u64,
    #[serde(deserialize_with = "lenient")]
    pub cache_read_input_tokens: u64,
    #[serde(deserialize_with = "lenient")]
    pub cache_creation_input_tokens: u64,
    #[serde(rename = "costUSD", deserialize_with = "lenient")]
    pub cost_usd: f64,
}

/// Decodes one field on its own; `null` or a mistyped value becomes the default so a
/// single bad field never discards its siblings.
fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = Value::deserialize(deserializer)?;
    Ok(T::deserialize(value).unwrap_or_default())
}

impl ResultMetadata {
    /// Input tokens from `usage`, or the per-model sum when `usage` is absent.
    pub fn input_tokens(&self) -> u64 {
        match &self.usage {
            Some(usage) => usage.input_tokens,
            None => self.model_usage.values().map(|m| m.input_tokens).sum(),
        }
    }

    pub fn output_tokens(&self) -> u64 {
        match &self.usage {
            Some(usage) => usage.output_tokens,
            None => self.model_usage.values().map(|m| m.output_tokens).sum(),
        }
    }

    pub fn cost_usd(&self) -> f64 {
        self.total_cost_usd.unwrap_or(0.0)
    }
}
