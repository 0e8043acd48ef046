use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};

use crossterm::style::Stylize;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

const DIVIDER: &str = "----------------------------------------";

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07]*\x07").expect("valid ANSI pattern")
});

/// Destination for formatted conversation records. Implementations must tolerate
/// interleaved calls from several conversations running on different threads.
pub trait OutputSink: Send + Sync {
    fn write_message(&self, text: &str) -> io::Result<()>;
    fn write_user_message(&self, text: &str) -> io::Result<()>;
    fn write_stat(&self, label: &str, value: &str) -> io::Result<()>;
    fn write_error(&self, text: &str) -> io::Result<()>;
    fn write_info(&self, text: &str) -> io::Result<()>;
    fn write_divider(&self) -> io::Result<()>;

    /// Finalized metadata of a conversation. Sinks that persist a summary keep the
    /// latest one; the default ignores it.
    fn record_summary(&self, _summary: &ConversationSummary) -> io::Result<()> {
        Ok(())
    }

    /// Idempotent; safe when the underlying resource was never opened.
    fn close(&self) -> io::Result<()>;
}

/// Finalized metadata of one conversation, as persisted on the last log line.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub success: bool,
    pub num_turns: u32,
    pub duration_ms: u64,
    pub duration_seconds: f64,
    pub total_cost_usd: f64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn strip_ansi(text: &str) -> String {
    ANSI_ESCAPE.replace_all(text, "").into_owned()
}

/// Live display on a terminal (stdout by default).
pub struct ConsoleSink {
    writer: Mutex<Box<dyn Write + Send>>,
    color: bool,
}

impl ConsoleSink {
    pub fn stdout(color: bool) -> Self {
        Self::with_writer(Box::new(io::stdout()), color)
    }

    pub fn with_writer(writer: Box<dyn Write + Send>, color: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            color,
        }
    }

    fn emit(&self, line: String) -> io::Result<()> {
        let mut writer = lock(&self.writer);
        writeln!(writer, "{line}")?;
        writer.flush()
    }
}

impl OutputSink for ConsoleSink {
    fn write_message(&self, text: &str) -> io::Result<()> {
        self.emit(text.to_string())
    }

    fn write_user_message(&self, text: &str) -> io::Result<()> {
        let line = format!("> {text}");
        self.emit(if self.color { line.cyan().bold().to_string() } else { line })
    }

    fn write_stat(&self, label: &str, value: &str) -> io::Result<()> {
        let line = if self.color {
            format!("{} {value}", format!("{label}:").dark_grey())
        } else {
            format!("{label}: {value}")
        };
        self.emit(line)
    }

    fn write_error(&self, text: &str) -> io::Result<()> {
        let line = format!("error: {text}");
        self.emit(if self.color { line.red().to_string() } else { line })
    }

    fn write_info(&self, text: &str) -> io::Result<()> {
        self.emit(if self.color { text.dark_grey().to_string() } else { text.to_string() })
    }

    fn write_divider(&self) -> io::Result<()> {
        self.emit(if self.color { DIVIDER.dark_grey().to_string() } else { DIVIDER.to_string() })
    }

    fn close(&self) -> io::Result<()> {
        lock(&self.writer).flush()
    }
}

enum LogFileState {
    Pending,
    Open(BufWriter<File>),
    Closed,
}

/// Append-only, ANSI-free log. The file is opened on first write; the latest
/// [`ConversationSummary`] is written as a single JSON line on close.
pub struct LogFileSink {
    path: PathBuf,
    state: Mutex<LogFileState>,
    summary: Mutex<Option<ConversationSummary>>,
}

impl LogFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(LogFileState::Pending),
            summary: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, prefix: &str, text: &str) -> io::Result<()> {
        let mut state = lock(&self.state);
        if matches!(*state, LogFileState::Pending) {
            *state = LogFileState::Open(open_append(&self.path)?);
        }
        let LogFileState::Open(writer) = &mut *state else {
            return Err(io::Error::other("log file sink is closed"));
        };
        let clean = strip_ansi(text);
        let mut lines = clean.lines();
        let first = lines.next().unwrap_or_default();
        writeln!(writer, "  {prefix}{first}")?;
        for line in lines {
            writeln!(writer, "  {line}")?;
        }
        writer.flush()
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

impl OutputSink for LogFileSink {
    fn write_message(&self, text: &str) -> io::Result<()> {
        self.append("", text)
    }

    fn write_user_message(&self, text: &str) -> io::Result<()> {
        self.append("> ", text)
    }

    fn write_stat(&self, label: &str, value: &str) -> io::Result<()> {
        self.append("", &format!("{label}: {value}"))
    }

    fn write_error(&self, text: &str) -> io::Result<()> {
        self.append("ERROR: ", text)
    }

    fn write_info(&self, text: &str) -> io::Result<()> {
        self.append("", text)
    }

    fn write_divider(&self) -> io::Result<()> {
        self.append("", DIVIDER)
    }

    fn record_summary(&self, summary: &ConversationSummary) -> io::Result<()> {
        *lock(&self.summary) = Some(summary.clone());
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        let previous = std::mem::replace(&mut *lock(&self.state), LogFileState::Closed);
        let summary = lock(&self.summary).take();
        let mut writer = match (previous, summary.is_some()) {
            (LogFileState::Open(writer), _) => writer,
            (LogFileState::Pending, true) => open_append(&self.path)?,
            _ => return Ok(()),
        };
        if let Some(summary) = summary {
            let line = serde_json::to_string(&summary).map_err(io::Error::other)?;
            writeln!(writer, "{line}")?;
        }
        writer.flush()
    }
}

/// Reads the trailing summary line of a persistent log.
pub fn read_log_summary(path: &Path) -> io::Result<Option<ConversationSummary>> {
    let text = fs::read_to_string(path)?;
    let Some(line) = text.lines().rev().find(|line| !line.trim().is_empty()) else {
        return Ok(None);
    };
    if !line.starts_with('{') {
        return Ok(None);
    }
    serde_json::from_str(line)
        .map(Some)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkRecord {
    Message(String),
    UserMessage(String),
    Stat { label: String, value: String },
    Error(String),
    Info(String),
    Divider,
    Summary(ConversationSummary),
}

/// Captures records for tests and embedding.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<SinkRecord>>,
    closed: Mutex<bool>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        lock(&self.records).clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                SinkRecord::Message(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                SinkRecord::Error(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn infos(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter_map(|record| match record {
                SinkRecord::Info(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn stat(&self, label: &str) -> Option<String> {
        self.records()
            .into_iter()
            .rev()
            .find_map(|record| match record {
                SinkRecord::Stat { label: found, value } if found == label => Some(value),
                _ => None,
            })
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }

    fn push(&self, record: SinkRecord) -> io::Result<()> {
        lock(&self.records).push(record);
        Ok(())
    }
}

impl OutputSink for MemorySink {
    fn write_message(&self, text: &str) -> io::Result<()> {
        self.push(SinkRecord::Message(text.to_string()))
    }

    fn write_user_message(&self, text: &str) -> io::Result<()> {
        self.push(SinkRecord::UserMessage(text.to_string()))
    }

    fn write_stat(&self, label: &str, value: &str) -> io::Result<()> {
        self.push(SinkRecord::Stat {
            label: label.to_string(),
            value: value.to_string(),
        })
    }

    fn write_error(&self, text: &str) -> io::Result<()> {
        self.push(SinkRecord::Error(text.to_string()))
    }

    fn write_info(&self, text: &str) -> io::Result<()> {
        self.push(SinkRecord::Info(text.to_string()))
    }

    fn write_divider(&self) -> io::Result<()> {
        self.push(SinkRecord::Divider)
    }

    fn record_summary(&self, summary: &ConversationSummary) -> io::Result<()> {
        self.push(SinkRecord::Summary(summary.clone()))
    }

    fn close(&self) -> io::Result<()> {
        *lock(&self.closed) = true;
        Ok(())
    }
}

/// Forwards every call to all wrapped sinks. A failing sink is logged and skipped;
/// the remaining sinks still receive the record and the call itself succeeds.
#[derive(Default)]
pub struct Multiplexer {
    sinks: Vec<Arc<dyn OutputSink>>,
}

impl Multiplexer {
    pub fn new(sinks: Vec<Arc<dyn OutputSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn OutputSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }

    fn each<F>(&self, operation: &str, mut call: F) -> io::Result<()>
    where
        F: FnMut(&dyn OutputSink) -> io::Result<()>,
    {
        for (index, sink) in self.sinks.iter().enumerate() {
            if let Err(err) = call(sink.as_ref()) {
                warn!(sink = index, "output sink {operation} failed: {err}");
            }
        }
        Ok(())
    }
}

impl OutputSink for Multiplexer {
    fn write_message(&self, text: &str) -> io::Result<()> {
        self.each("write_message", |sink| sink.write_message(text))
    }

    fn write_user_message(&self, text: &str) -> io::Result<()> {
        self.each("write_user_message", |sink| sink.write_user_message(text))
    }

    fn write_stat(&self, label: &str, value: &str) -> io::Result<()> {
        self.each("write_stat", |sink| sink.write_stat(label, value))
    }

    fn write_error(&self, text: &str) -> io::Result<()> {
        self.each("write_error", |sink| sink.write_error(text))
    }

    fn write_info(&self, text: &str) -> io::Result<()> {
        self.each("write_info", |sink| sink.write_info(text))
    }

    fn write_divider(&self) -> io::Result<()> {
        self.each("write_divider", |sink| sink.write_divider())
    }

    fn record_summary(&self, summary: &ConversationSummary) -> io::Result<()> {
        self.each("record_summary", |sink| sink.record_summary(summary))
    }

    fn close(&self) -> io::Result<()> {
        self.each("close", |sink| sink.close())
    }
}

#[cfg(test)]
#[path = "../tests/unit/output_tests.rs"]
mod tests;
