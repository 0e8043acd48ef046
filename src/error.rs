use std::io;
use std::path::PathBuf;

/// Errors surfaced by conversations, the retry coordinator and the launcher.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    #[error("working directory does not exist: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("option {0} is managed by agent-conductor and cannot be passed explicitly")]
    ManagedFlag(String),

    #[error("conversation has already been executed")]
    AlreadyExecuted,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to launch agent process: {0}")]
    Spawn(#[source] io::Error),

    #[error("agent process exited with status {code}: {stderr}")]
    ProcessFailed { code: i32, stderr: String },

    #[error("agent reported failure: {0}")]
    AgentFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConductorError {
    /// Errors detected before any process is spawned. These are never retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::DirectoryNotFound(_) | Self::ManagedFlag(_) | Self::AlreadyExecuted | Self::Config(_)
        )
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_configuration() { 2 } else { 1 }
    }
}

pub type Result<T, E = ConductorError> = std::result::Result<T, E>;
