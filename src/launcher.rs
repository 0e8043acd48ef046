use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::config::ConductorConfig;
use crate::error::Result;
use crate::formatter::{Formatter, PlainFormatter};
use crate::isolation::IsolationScriptBuilder;
use crate::output::{ConsoleSink, ConversationSummary, LogFileSink, Multiplexer, OutputSink};
use crate::retry::RetryCoordinator;

/// Starts conversations that share one output sink, and records each outcome in an
/// append-only session list. Clones share the sink and the list.
#[derive(Clone)]
pub struct Launcher {
    program: String,
    default_options: Vec<String>,
    max_attempts: u32,
    isolation: IsolationScriptBuilder,
    sink: Arc<dyn OutputSink>,
    formatter: Arc<dyn Formatter>,
    sessions: Arc<Mutex<Vec<ConversationSummary>>>,
}

impl Launcher {
    pub fn new(config: &ConductorConfig, sink: Arc<dyn OutputSink>) -> Self {
        Self {
            program: config.agent.program.clone(),
            default_options: config.agent.args.clone(),
            max_attempts: config.retry.max_attempts,
            isolation: IsolationScriptBuilder::new()
                .with_shell(config.isolation.shell.clone())
                .with_extra_unset_env(config.isolation.unset_env.clone()),
            sink,
            formatter: Arc::new(PlainFormatter),
            sessions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = formatter;
        self
    }

    pub fn sink(&self) -> &Arc<dyn OutputSink> {
        &self.sink
    }

    /// Runs `prompt` in `directory` with retry, blocking until a terminal state.
    pub fn run(
        &self,
        directory: &Path,
        prompt: &str,
        options: &[String],
    ) -> Result<ConversationSummary> {
        let mut all_options = self.default_options.clone();
        all_options.extend(options.iter().cloned());

        let mut coordinator = RetryCoordinator::new(
            directory,
            self.program.clone(),
            self.sink.clone(),
            self.formatter.clone(),
        )
        .with_isolation(self.isolation.clone())
        .with_max_attempts(self.max_attempts);

        let outcome = coordinator.run_with_retry(prompt, &all_options);
        if let Some(summary) = coordinator.last_summary() {
            self.record(summary.clone());
        }
        outcome.map(|conversation| conversation.summary())
    }

    /// Runs [`Launcher::run`] on a new thread.
    pub fn spawn(
        &self,
        directory: PathBuf,
        prompt: String,
        options: Vec<String>,
    ) -> thread::JoinHandle<Result<ConversationSummary>> {
        let launcher = self.clone();
        thread::spawn(move || launcher.run(&directory, &prompt, &options))
    }

    pub fn sessions(&self) -> Vec<ConversationSummary> {
        self.sessions
            .lock()
            .map(|sessions| sessions.clone())
            .unwrap_or_default()
    }

    pub fn close(&self) -> std::io::Result<()> {
        self.sink.close()
    }

    fn record(&self, summary: ConversationSummary) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.push(summary);
        }
    }
}

/// Builds the sink stack from configuration: an optional live console and an
/// optional persistent log, fanned out through a [`Multiplexer`].
pub fn build_sink(
    config: &ConductorConfig,
    console: bool,
    log_file: Option<PathBuf>,
) -> Arc<dyn OutputSink> {
    let mut multiplexer = Multiplexer::default();
    if console {
        multiplexer.push(Arc::new(ConsoleSink::stdout(config.output.color)));
    }
    if let Some(path) = log_file.or_else(|| config.output.log_file.clone()) {
        multiplexer.push(Arc::new(LogFileSink::new(path)));
    }
    Arc::new(multiplexer)
}

#[cfg(test)]
#[path = "../tests/unit/launcher_tests.rs"]
mod tests;
