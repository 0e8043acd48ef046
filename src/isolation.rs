use std::env;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
#[cfg(unix)]
use std::{fs::Permissions, os::unix::fs::PermissionsExt};

use tracing::{debug, warn};

/// Shells whose syntax the generated script relies on (`cd`, `unset`, `export`, `exec`).
const RECOGNIZED_SHELLS: &[&str] = &["bash", "zsh", "sh", "dash", "ksh"];
const FALLBACK_SHELL: &str = "/bin/sh";

/// Variables that leak the caller's previous location or toolchain setup.
pub const DEFAULT_UNSET_ENV: &[&str] = &[
    "OLDPWD",
    "INIT_CWD",
    "CARGO_MANIFEST_DIR",
    "CARGO_TARGET_DIR",
    "CARGO_PKG_NAME",
    "RUSTUP_TOOLCHAIN",
    "BUNDLE_GEMFILE",
    "BUNDLE_BIN_PATH",
    "RUBYOPT",
    "RUBYLIB",
    "VIRTUAL_ENV",
    "npm_config_prefix",
];

static SCRIPT_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Default)]
pub struct IsolationScriptBuilder {
    shell_override: Option<String>,
    extra_unset_env: Vec<String>,
}

impl IsolationScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_shell(mut self, shell: Option<String>) -> Self {
        self.shell_override = shell;
        self
    }

    pub fn with_extra_unset_env(mut self, names: Vec<String>) -> Self {
        self.extra_unset_env = names;
        self
    }

    /// Writes an executable script that enters `target_dir`, scrubs the environment and
    /// execs `command`. The returned guard deletes the script when dropped. The target
    /// directory is expected to have been validated by the caller.
    pub fn build(&self, target_dir: &Path, command: &[String]) -> io::Result<IsolationScript> {
        let shell = self.resolve_shell();
        let text = self.render(&shell, target_dir, command);
        let path = write_executable_script(&text)?;
        debug!(script = %path.display(), shell = %shell, "wrote isolation script");
        Ok(IsolationScript { path, shell })
    }

    pub fn render(&self, shell: &str, target_dir: &Path, command: &[String]) -> String {
        let dir = shell_quote(&target_dir.to_string_lossy());
        let mut text = format!("#!{shell}\ncd {dir} || exit 1\n");
        for name in self.unset_names() {
            text.push_str(&format!("unset {name}\n"));
        }
        text.push_str(&format!("export PWD={dir}\n"));
        let quoted: Vec<String> = command.iter().map(|arg| shell_quote(arg)).collect();
        text.push_str(&format!("exec {}\n", quoted.join(" ")));
        text
    }

    /// Interpreter for the script: the configured override, then `$SHELL` when it is a
    /// recognized shell that exists, then `bash`/`sh` from `PATH`, then `/bin/sh`.
    pub fn resolve_shell(&self) -> String {
        if let Some(shell) = self.shell_override.as_deref()
            && let Some(found) = usable_shell(shell)
        {
            return found;
        }
        if let Ok(shell) = env::var("SHELL")
            && let Some(found) = usable_shell(&shell)
        {
            return found;
        }
        for candidate in ["bash", "sh"] {
            if let Ok(path) = which::which(candidate) {
                return path.to_string_lossy().into_owned();
            }
        }
        FALLBACK_SHELL.to_string()
    }

    fn unset_names(&self) -> Vec<String> {
        let mut names: Vec<String> = DEFAULT_UNSET_ENV.iter().map(ToString::to_string).collect();
        for name in &self.extra_unset_env {
            let name = name.trim();
            if is_env_name(name) && !names.iter().any(|existing| existing == name) {
                names.push(name.to_string());
            }
        }
        names
    }
}

/// A generated script on disk. Removed when dropped, on every exit path.
#[derive(Debug)]
pub struct IsolationScript {
    path: PathBuf,
    shell: String,
}

impl IsolationScript {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn shell(&self) -> &str {
        &self.shell
    }

    /// Runs the script through its interpreter rather than exec'ing the freshly written
    /// file, which can fail with ETXTBSY while another thread is forking.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.shell);
        command.arg(&self.path);
        command
    }
}

impl Drop for IsolationScript {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!("failed to remove isolation script {}: {err}", self.path.display());
        }
    }
}

/// Single-quotes `value` so it survives shell re-parsing unchanged.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn usable_shell(shell: &str) -> Option<String> {
    let shell = shell.trim();
    let name = Path::new(shell).file_name()?.to_str()?;
    if !RECOGNIZED_SHELLS.contains(&name) {
        return None;
    }
    if Path::new(shell).is_absolute() {
        return Path::new(shell).is_file().then(|| shell.to_string());
    }
    which::which(shell)
        .ok()
        .map(|path| path.to_string_lossy().into_owned())
}

fn is_env_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|ch: char| ch.is_ascii_digit())
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn write_executable_script(text: &str) -> io::Result<PathBuf> {
    let dir = env::temp_dir();
    let pid = std::process::id();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    for attempt in 0..16u8 {
        let counter = SCRIPT_COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = dir.join(format!("agent-conductor-{pid}-{nanos}-{counter}-{attempt}.sh"));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                let mut writer = BufWriter::new(file);
                let written = writer
                    .write_all(text.as_bytes())
                    .and_then(|()| writer.flush())
                    .and_then(|()| make_executable(&path));
                if let Err(err) = written {
                    let _ = fs::remove_file(&path);
                    return Err(err);
                }
                return Ok(path);
            }
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(err) => return Err(err),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "failed to allocate isolation script file name",
    ))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    fs::set_permissions(path, Permissions::from_mode(0o700))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
#[path = "../tests/unit/isolation_tests.rs"]
mod tests;
