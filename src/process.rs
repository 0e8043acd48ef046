use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStderr, Stdio};
use std::thread;

use tracing::{debug, warn};

use crate::error::{ConductorError, Result};
use crate::isolation::IsolationScriptBuilder;
use crate::message::Message;
use crate::stream;

/// Arguments always passed to the agent, ahead of caller-supplied options.
pub const MANAGED_PREFIX: &[&str] = &["-p", "--verbose", "--output-format", "stream-json"];

/// Flags the conductor controls; callers may not pass them again.
const MANAGED_FLAGS: &[&str] = &["--verbose", "--output-format"];

pub const RESUME_FLAG: &str = "--resume";
const RESUME_SHORT_FLAG: &str = "-r";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCommand {
    pub program: String,
    pub options: Vec<String>,
}

impl Default for AgentCommand {
    fn default() -> Self {
        Self::new("claude")
    }
}

impl AgentCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            options: Vec::new(),
        }
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    /// Full argv: program, managed prefix, then caller options.
    pub fn argv(&self) -> Vec<String> {
        let mut argv = Vec::with_capacity(1 + MANAGED_PREFIX.len() + self.options.len());
        argv.push(self.program.clone());
        argv.extend(MANAGED_PREFIX.iter().map(ToString::to_string));
        argv.extend(self.options.iter().cloned());
        argv
    }

    pub fn validate(&self) -> Result<()> {
        validate_options(&self.options)
    }

    /// Resumption token from a `--resume` option, if one is present.
    pub fn resume_token(&self) -> Option<&str> {
        let mut iter = self.options.iter();
        while let Some(option) = iter.next() {
            if let Some(value) = option.strip_prefix("--resume=") {
                return Some(value);
            }
            if option == RESUME_FLAG || option == RESUME_SHORT_FLAG {
                return iter.next().map(String::as_str);
            }
        }
        None
    }
}

/// Rejects options that duplicate flags in [`MANAGED_PREFIX`].
pub fn validate_options(options: &[String]) -> Result<()> {
    for option in options {
        let flag = option.split('=').next().unwrap_or(option);
        if MANAGED_FLAGS.contains(&flag) {
            return Err(ConductorError::ManagedFlag(option.clone()));
        }
    }
    Ok(())
}

/// Removes every resume option (and its value) from `options`.
pub fn strip_resume_options(options: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(options.len());
    let mut iter = options.iter();
    while let Some(option) = iter.next() {
        if option == RESUME_FLAG || option == RESUME_SHORT_FLAG {
            let _ = iter.next();
            continue;
        }
        if option.starts_with("--resume=") {
            continue;
        }
        out.push(option.clone());
    }
    out
}

/// Drives one agent subprocess from spawn to exit.
#[derive(Debug, Clone)]
pub struct ProcessSession {
    directory: PathBuf,
    command: AgentCommand,
    isolation: IsolationScriptBuilder,
}

impl ProcessSession {
    pub fn new(directory: impl Into<PathBuf>, command: AgentCommand) -> Self {
        Self {
            directory: directory.into(),
            command,
            isolation: IsolationScriptBuilder::new(),
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationScriptBuilder) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn command(&self) -> &AgentCommand {
        &self.command
    }

    /// Checks everything that must hold before a process may be spawned.
    pub fn preflight(&self) -> Result<()> {
        if !self.directory.is_dir() {
            return Err(ConductorError::DirectoryNotFound(self.directory.clone()));
        }
        self.command.validate()
    }

    /// Spawns the agent, writes `prompt` to its stdin and delivers each decoded stream
    /// event to `on_message` until stdout closes. A non-zero exit is returned as
    /// [`ConductorError::ProcessFailed`] even if a result was already delivered.
    pub fn run<F>(&self, prompt: &str, on_message: F) -> Result<()>
    where
        F: FnMut(Message),
    {
        self.preflight()?;
        let script = self
            .isolation
            .build(&self.directory, &self.command.argv())?;

        let mut command = script.command();
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = command.spawn().map_err(ConductorError::Spawn)?;
        debug!(pid = child.id(), dir = %self.directory.display(), "agent process started");

        let stderr_reader = child.stderr.take().map(spawn_stderr_reader);

        if let Some(mut stdin) = child.stdin.take() {
            match stdin.write_all(prompt.as_bytes()) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                    debug!("agent closed stdin before the prompt was fully written");
                }
                Err(err) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(err.into());
                }
            }
        }

        let parse_result = match child.stdout.take() {
            Some(stdout) => stream::parse(BufReader::new(stdout), on_message),
            None => Ok(()),
        };
        if let Err(err) = &parse_result {
            warn!("reading agent output failed: {err}");
            let _ = child.kill();
        }

        let status = child.wait()?;
        let stderr_text = stderr_reader
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        parse_result?;

        if !status.success() {
            let code = status.code().unwrap_or(-1);
            return Err(ConductorError::ProcessFailed {
                code,
                stderr: stderr_text.trim().to_string(),
            });
        }
        if !stderr_text.trim().is_empty() {
            debug!(stderr = %stderr_text.trim(), "agent wrote to stderr");
        }
        Ok(())
    }
}

fn spawn_stderr_reader(stderr: ChildStderr) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut text = String::new();
        let mut bytes = Vec::new();
        if BufReader::new(stderr).read_to_end(&mut bytes).is_ok() {
            text = String::from_utf8_lossy(&bytes).into_owned();
        }
        text
    })
}

#[cfg(test)]
#[path = "../tests/unit/process_tests.rs"]
mod tests;
