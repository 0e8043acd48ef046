use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ConductorError, Result};
use crate::formatter::Formatter;
use crate::isolation::IsolationScriptBuilder;
use crate::message::{Message, MessageKind, ResultMetadata, TerminalResult};
use crate::output::{ConversationSummary, OutputSink};
use crate::process::{AgentCommand, ProcessSession};
use crate::stream::extract_session_id;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Created,
    Running,
    Succeeded,
    Failed,
}

/// Derived metrics reported once a conversation reaches a terminal state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationStats {
    pub duration: Duration,
    pub cost_usd: f64,
    pub num_turns: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub per_model: Vec<ModelTokens>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelTokens {
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// One prompt-to-result exchange with the agent. Single use.
pub struct Conversation {
    id: Uuid,
    session: ProcessSession,
    sink: Arc<dyn OutputSink>,
    formatter: Arc<dyn Formatter>,
    state: ConversationState,
    messages: Vec<Message>,
    result: Option<TerminalResult>,
    metadata: ResultMetadata,
    session_id: Option<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

impl fmt::Debug for Conversation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conversation")
            .field("id", &self.id)
            .field("directory", &self.directory())
            .field("state", &self.state)
            .field("messages", &self.messages.len())
            .field("session_id", &self.session_id)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl Conversation {
    pub fn new(
        directory: impl Into<PathBuf>,
        command: AgentCommand,
        sink: Arc<dyn OutputSink>,
        formatter: Arc<dyn Formatter>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            session: ProcessSession::new(directory, command),
            sink,
            formatter,
            state: ConversationState::Created,
            messages: Vec::new(),
            result: None,
            metadata: ResultMetadata::default(),
            session_id: None,
            started_at: None,
            ended_at: None,
            error: None,
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationScriptBuilder) -> Self {
        self.session = self.session.with_isolation(isolation);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn directory(&self) -> &Path {
        self.session.directory()
    }

    pub fn command(&self) -> &AgentCommand {
        self.session.command()
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn result(&self) -> Option<&TerminalResult> {
        self.result.as_ref()
    }

    pub fn metadata(&self) -> &ResultMetadata {
        &self.metadata
    }

    /// Latest resumption token observed on any event, even without a terminal result.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.result.as_ref().is_some_and(|result| result.success)
    }

    /// Runs `prompt` to completion. Process failures are recorded, reported to the sink
    /// and returned; an agent-reported failure returns `Ok` with `is_success() == false`.
    pub fn execute(&mut self, prompt: &str) -> Result<&Self> {
        if self.state != ConversationState::Created {
            return Err(ConductorError::AlreadyExecuted);
        }
        self.state = ConversationState::Running;
        self.started_at = Some(Utc::now());
        info!(conversation = %self.id, dir = %self.directory().display(), "conversation started");

        let _ = self.sink.write_info(&format!(
            "conversation {} in {}",
            self.id,
            self.directory().display()
        ));
        let _ = self.sink.write_user_message(prompt);

        let session = self.session.clone();
        let outcome = session.run(prompt, |message| self.accept(message));

        self.ended_at = Some(Utc::now());
        if let Err(err) = &outcome {
            self.error = Some(err.to_string());
        }
        self.state = if self.is_success() {
            ConversationState::Succeeded
        } else {
            ConversationState::Failed
        };
        self.report_stats();
        if let Err(err) = outcome {
            let _ = self.sink.write_error(&err.to_string());
            return Err(err);
        }
        if let Some(result) = self.result.as_ref().filter(|result| !result.success) {
            let _ = self
                .sink
                .write_error(result.error.as_deref().unwrap_or("agent reported failure"));
        }
        Ok(self)
    }

    fn accept(&mut self, message: Message) {
        if let Some(token) = extract_session_id(message.raw()) {
            self.session_id = Some(token);
        }
        match message.kind() {
            MessageKind::TerminalResult(result) => {
                if self.result.is_none() {
                    self.metadata = result.metadata.clone();
                    self.result = Some(result.clone());
                } else {
                    debug!(conversation = %self.id, "ignoring extra result event");
                }
            }
            MessageKind::Text { .. }
            | MessageKind::ToolInvocation { .. }
            | MessageKind::ToolOutcome { .. }
            | MessageKind::System { .. }
            | MessageKind::Unknown => {
                let text = self.formatter.format(&message);
                if !text.is_empty() {
                    let _ = self.sink.write_message(&text);
                }
            }
        }
        self.messages.push(message);
    }

    pub fn stats(&self) -> ConversationStats {
        let duration = match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => (end - start).to_std().unwrap_or_default(),
            _ => Duration::ZERO,
        };
        ConversationStats {
            duration,
            cost_usd: self.metadata.cost_usd(),
            num_turns: self.metadata.num_turns.unwrap_or(0),
            input_tokens: self.metadata.input_tokens(),
            output_tokens: self.metadata.output_tokens(),
            per_model: self
                .metadata
                .model_usage
                .iter()
                .map(|(model, usage)| ModelTokens {
                    model: model.clone(),
                    input_tokens: usage.input_tokens,
                    output_tokens: usage.output_tokens,
                })
                .collect(),
        }
    }

    pub fn summary(&self) -> ConversationSummary {
        let stats = self.stats();
        let duration_ms = u64::try_from(stats.duration.as_millis()).unwrap_or(u64::MAX);
        ConversationSummary {
            conversation_id: self.id.to_string(),
            success: self.is_success(),
            num_turns: stats.num_turns,
            duration_ms,
            duration_seconds: stats.duration.as_secs_f64(),
            total_cost_usd: stats.cost_usd,
            input_tokens: stats.input_tokens,
            output_tokens: stats.output_tokens,
            session_id: self.session_id.clone(),
            error: self.error.clone().or_else(|| {
                self.result
                    .as_ref()
                    .filter(|result| !result.success)
                    .and_then(|result| result.error.clone())
            }),
        }
    }

    fn report_stats(&self) {
        let stats = self.stats();
        let status = if self.is_success() { "success" } else { "failed" };
        let sink = &self.sink;
        let _ = sink.write_divider();
        let _ = sink.write_stat("status", status);
        let _ = sink.write_stat("duration", &format!("{:.2}s", stats.duration.as_secs_f64()));
        let _ = sink.write_stat("turns", &stats.num_turns.to_string());
        let _ = sink.write_stat("cost", &format!("${:.4}", stats.cost_usd));
        let _ = sink.write_stat(
            "tokens",
            &format!("{} in / {} out", stats.input_tokens, stats.output_tokens),
        );
        for model in &stats.per_model {
            let _ = sink.write_stat(
                &format!("tokens[{}]", model.model),
                &format!("{} in / {} out", model.input_tokens, model.output_tokens),
            );
        }
        if let Some(session_id) = &self.session_id {
            let _ = sink.write_stat("session", session_id);
        }
        let _ = sink.record_summary(&self.summary());
    }
}

#[cfg(test)]
#[path = "../tests/unit/conversation_tests.rs"]
mod tests;
