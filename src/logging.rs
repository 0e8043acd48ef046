use std::io;

use tracing_subscriber::EnvFilter;

pub const LOG_ENV_VAR: &str = "AGENT_CONDUCTOR_LOG";

/// Installs the diagnostics subscriber on stderr. Conversation output never goes
/// through here; it is written to the configured output sinks.
pub fn init(verbose: bool) {
    let default_directive = if verbose { "agent_conductor=debug" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}
