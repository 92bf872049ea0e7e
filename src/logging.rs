//! SF-016: Process logging via tracing-subscriber.
//!
//! Diagnostic events go to stderr. The run log written by the orchestrator
//! is a separate artifact and is always plain text.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Compact text: timestamp LEVEL message fields
    Compact,
    /// JSON Lines
    Json,
}

/// Build the filter from a base level plus quiet defaults for dependencies.
pub fn build_env_filter(level: &str) -> Result<EnvFilter, String> {
    let mut directives = vec![level.to_string()];
    for (target, lvl) in [("rusqlite", "warn"), ("tokio", "warn")] {
        directives.push(format!("{}={}", target, lvl));
    }
    let filter_str = directives.join(",");
    EnvFilter::try_new(&filter_str)
        .map_err(|e| format!("invalid log filter '{}': {}", filter_str, e))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(level: &str, format: LogFormat) -> Result<(), String> {
    let filter = build_env_filter(level)?;
    let layer = match format {
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
    };
    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| format!("cannot install logger: {}", e))
}
