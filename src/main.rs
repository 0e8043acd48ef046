use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use agent_conductor::config::ConductorConfig;
use agent_conductor::launcher::{Launcher, build_sink};
use agent_conductor::{ConductorError, logging};
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

/// Run a coding agent CLI in an isolated directory and stream its conversation.
#[derive(Debug, Parser)]
#[command(name = "agent-conductor", version)]
struct Cli {
    /// Prompt to send; read from --prompt-file or stdin when omitted.
    prompt: Option<String>,

    /// Working directory for the agent.
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Read the prompt from a file.
    #[arg(long, conflicts_with = "prompt")]
    prompt_file: Option<PathBuf>,

    /// Agent executable, overriding `agent.program`.
    #[arg(long)]
    agent: Option<String>,

    /// Config file (defaults to ~/.agent-conductor/config.toml).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Append an ANSI-free transcript to this file.
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(long)]
    max_attempts: Option<u32>,

    #[arg(long)]
    no_color: bool,

    #[arg(long, value_enum, default_value = "human")]
    output: OutputFormat,

    /// Debug-level diagnostics on stderr.
    #[arg(short, long)]
    verbose: bool,

    /// Extra options passed through to the agent.
    #[arg(last = true)]
    agent_args: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("agent-conductor: {err}");
            ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(1))
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, ConductorError> {
    let mut config = ConductorConfig::load(cli.config.as_deref())?;
    if let Some(program) = cli.agent.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        config.agent.program = program.to_string();
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.retry.max_attempts = max_attempts.max(1);
    }
    if cli.no_color {
        config.output.color = false;
    }

    let prompt = read_prompt(cli.prompt, cli.prompt_file)?;
    let directory = match cli.dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };

    let console = cli.output == OutputFormat::Human;
    let sink = build_sink(&config, console, cli.log_file);
    let launcher = Launcher::new(&config, sink);
    let outcome = launcher.run(&directory, &prompt, &cli.agent_args);
    if let Err(err) = launcher.close() {
        eprintln!("agent-conductor: failed to close output: {err}");
    }

    let sessions = launcher.sessions();
    if cli.output == OutputFormat::Json
        && let Some(summary) = sessions.last()
    {
        println!("{}", serde_json::to_string_pretty(summary)?);
    }

    match outcome {
        Ok(summary) if summary.success => Ok(ExitCode::SUCCESS),
        Ok(_) => Ok(ExitCode::FAILURE),
        Err(err) => Err(err),
    }
}

fn read_prompt(prompt: Option<String>, prompt_file: Option<PathBuf>) -> Result<String, ConductorError> {
    let text = match (prompt, prompt_file) {
        (Some(prompt), _) => prompt,
        (None, Some(path)) => std::fs::read_to_string(&path).map_err(|err| {
            ConductorError::Config(format!("failed to read prompt file {}: {err}", path.display()))
        })?,
        (None, None) => {
            let mut text = String::new();
            io::stdin().read_to_string(&mut text)?;
            text
        }
    };
    if text.trim().is_empty() {
        return Err(ConductorError::Config("prompt is empty".to_string()));
    }
    Ok(text)
}
