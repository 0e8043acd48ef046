use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::conversation::Conversation;
use crate::error::{ConductorError, Result};
use crate::formatter::Formatter;
use crate::isolation::IsolationScriptBuilder;
use crate::output::{ConversationSummary, OutputSink};
use crate::process::{AgentCommand, RESUME_FLAG, strip_resume_options};

/// Re-runs a prompt with `--resume <token>` until a conversation succeeds or the
/// attempt budget is spent.
pub struct RetryCoordinator {
    directory: PathBuf,
    program: String,
    sink: Arc<dyn OutputSink>,
    formatter: Arc<dyn Formatter>,
    isolation: IsolationScriptBuilder,
    max_attempts: u32,
    attempts: u32,
    last_session_id: Option<String>,
    last_summary: Option<ConversationSummary>,
    diagnostics: Vec<String>,
}

impl RetryCoordinator {
    pub fn new(
        directory: impl Into<PathBuf>,
        program: impl Into<String>,
        sink: Arc<dyn OutputSink>,
        formatter: Arc<dyn Formatter>,
    ) -> Self {
        Self {
            directory: directory.into(),
            program: program.into(),
            sink,
            formatter,
            isolation: IsolationScriptBuilder::new(),
            max_attempts: 3,
            attempts: 0,
            last_session_id: None,
            last_summary: None,
            diagnostics: Vec::new(),
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationScriptBuilder) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_session_id(&self) -> Option<&str> {
        self.last_session_id.as_deref()
    }

    /// Summary of the most recent attempt, successful or not.
    pub fn last_summary(&self) -> Option<&ConversationSummary> {
        self.last_summary.as_ref()
    }

    pub fn diagnostics(&self) -> &[String] {
        &self.diagnostics
    }

    /// Options for the next attempt: the caller's options with any resume flag
    /// removed, prefixed by `--resume <token>` when a token is known.
    pub fn options_for_attempt(&self, attempt: u32, options: &[String]) -> Vec<String> {
        if attempt <= 1 {
            return options.to_vec();
        }
        let stripped = strip_resume_options(options);
        match &self.last_session_id {
            Some(token) => {
                let mut resumed = vec![RESUME_FLAG.to_string(), token.clone()];
                resumed.extend(stripped);
                resumed
            }
            None => stripped,
        }
    }

    /// Returns the first successful conversation, or the last attempt's error once the
    /// budget is spent. Configuration errors are returned immediately.
    pub fn run_with_retry(&mut self, prompt: &str, options: &[String]) -> Result<Conversation> {
        self.attempts = 0;
        self.last_session_id = None;
        self.last_summary = None;
        self.diagnostics.clear();
        let mut last_error: Option<ConductorError> = None;
        for attempt in 1..=self.max_attempts {
            self.attempts = attempt;
            let attempt_options = self.options_for_attempt(attempt, options);
            if attempt > 1 {
                let notice = match &self.last_session_id {
                    Some(token) => format!(
                        "retrying (attempt {attempt}/{}) with resume token {token}",
                        self.max_attempts
                    ),
                    None => format!(
                        "retrying (attempt {attempt}/{}) without a resume token",
                        self.max_attempts
                    ),
                };
                warn!("{notice}");
                let _ = self.sink.write_info(&notice);
            }

            let command = AgentCommand::new(self.program.clone()).with_options(attempt_options);
            let mut conversation = Conversation::new(
                self.directory.clone(),
                command,
                self.sink.clone(),
                self.formatter.clone(),
            )
            .with_isolation(self.isolation.clone());

            let outcome = conversation.execute(prompt).map(|_| ());
            if let Some(token) = conversation.session_id() {
                self.last_session_id = Some(token.to_string());
            }
            self.last_summary = Some(conversation.summary());
            match outcome {
                Ok(()) if conversation.is_success() => {
                    info!(attempt, "conversation succeeded");
                    return Ok(conversation);
                }
                Ok(()) => {
                    let reason = conversation
                        .summary()
                        .error
                        .unwrap_or_else(|| "agent produced no successful result".to_string());
                    self.diagnostics.push(format!("attempt {attempt}: {reason}"));
                    last_error = Some(ConductorError::AgentFailed(reason));
                }
                Err(err) if err.is_configuration() => return Err(err),
                Err(err) => {
                    self.diagnostics.push(format!("attempt {attempt}: {err}"));
                    last_error = Some(err);
                }
            }
        }
        warn!(attempts = self.attempts, "all attempts failed");
        Err(last_error
            .unwrap_or_else(|| ConductorError::AgentFailed("no attempts were made".to_string())))
    }
}

#[cfg(test)]
#[path = "../tests/unit/retry_tests.rs"]
mod tests;
