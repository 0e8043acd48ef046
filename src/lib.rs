//! Drives an interactive coding agent CLI as a subprocess, decodes its stream-json
//! output into typed messages and renders the conversation to pluggable sinks.

pub mod config;
pub mod conversation;
pub mod error;
pub mod formatter;
pub mod isolation;
pub mod launcher;
pub mod logging;
pub mod message;
pub mod output;
pub mod process;
pub mod retry;
pub mod stream;

pub use config::ConductorConfig;
pub use conversation::{Conversation, ConversationState, ConversationStats};
pub use error::{ConductorError, Result};
pub use formatter::{Formatter, PlainFormatter};
pub use launcher::Launcher;
pub use message::{Message, MessageKind, TerminalResult};
pub use output::{ConversationSummary, MemorySink, Multiplexer, OutputSink};
pub use retry::RetryCoordinator;

#[cfg(test)]
#[path = "../tests/unit/support.rs"]
pub(crate) mod test_support;
