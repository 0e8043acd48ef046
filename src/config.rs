use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{ConductorError, Result};

pub const DEFAULT_CONFIG_TOML: &str = r#"
[agent]
program = "claude"
args = []

[retry]
max_attempts = 3

[isolation]
unset_env = []

[output]
color = true
"#;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub agent: AgentConfig,
    pub retry: RetryConfig,
    pub isolation: IsolationConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    pub shell: Option<String>,
    pub unset_env: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub log_file: Option<PathBuf>,
    pub color: bool,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            retry: RetryConfig::default(),
            isolation: IsolationConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: Vec::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            color: true,
        }
    }
}

impl ConductorConfig {
    /// Loads the user config from `path`, or from `$HOME/.agent-conductor/config.toml`
    /// when no path is given. A missing default file yields the built-in defaults; a
    /// missing explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let override_text = match path {
            Some(path) => Some(fs::read_to_string(path).map_err(|err| {
                ConductorError::Config(format!("failed to read {}: {err}", path.display()))
            })?),
            None => match default_config_file_path() {
                Some(path) => match fs::read_to_string(&path) {
                    Ok(text) => Some(text),
                    Err(err) if err.kind() == io::ErrorKind::NotFound => None,
                    Err(err) => return Err(err.into()),
                },
                None => None,
            },
        };
        Self::from_toml_str(override_text.as_deref().unwrap_or_default())
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let mut merged = parse_toml_table(DEFAULT_CONFIG_TOML)?;
        merge_toml_tables(&mut merged, parse_toml_table(text)?);
        let config = merged
            .try_into::<Self>()
            .map_err(|err| ConductorError::Config(err.to_string()))?;
        config.validated()
    }

    fn validated(mut self) -> Result<Self> {
        let program = self.agent.program.trim().to_string();
        if program.is_empty() {
            return Err(ConductorError::Config(
                "agent.program must not be empty".to_string(),
            ));
        }
        self.agent.program = program;
        self.agent.args = self
            .agent
            .args
            .into_iter()
            .map(|arg| arg.trim().to_string())
            .filter(|arg| !arg.is_empty())
            .collect();
        self.retry.max_attempts = self.retry.max_attempts.max(1);
        self.isolation.shell = self
            .isolation
            .shell
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        Ok(self)
    }
}

pub fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

pub fn default_config_file_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".agent-conductor").join("config.toml"))
}

fn parse_toml_table(text: &str) -> Result<toml::Value> {
    if text.trim().is_empty() {
        return Ok(toml::Value::Table(toml::map::Map::new()));
    }
    toml::from_str(text).map_err(|err| ConductorError::Config(err.to_string()))
}

fn merge_toml_tables(base: &mut toml::Value, override_value: toml::Value) {
    match (base, override_value) {
        (toml::Value::Table(base_map), toml::Value::Table(override_map)) => {
            for (key, override_item) in override_map {
                if let Some(base_item) = base_map.get_mut(&key) {
                    merge_toml_tables(base_item, override_item);
                } else {
                    base_map.insert(key, override_item);
                }
            }
        }
        (base_slot, override_item) => {
            *base_slot = override_item;
        }
    }
}

#[cfg(test)]
#[path = "../tests/unit/config_tests.rs"]
mod tests;
