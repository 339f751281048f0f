// src/logging.rs

//! Logging setup for `fleetrun` using `tracing` + `tracing-subscriber`.
//!
//! The `--log-level` flag wins. Otherwise `FLEETRUN_LOG` is read as a full
//! `EnvFilter` directive string (e.g. `debug` or `fleetrun::dispatch=trace`).
//! With neither, `fleetrun` logs at `info`.
//!
//! The HTTP stack (`reqwest`, `hyper`, `rustls`) is capped at `warn` unless a
//! directive names it explicitly. Output goes to STDERR; run summaries own
//! stdout.

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, EnvFilter};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "FLEETRUN_LOG";

const NOISY_TARGETS: &[&str] = &["reqwest", "hyper", "hyper_util", "rustls", "h2"];

/// Initialise the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<()> {
    let directives = match cli_level {
        Some(lvl) => level_name(lvl).to_string(),
        None => std::env::var(LOG_ENV)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "info".to_string()),
    };

    let filter = build_filter(&directives)?;

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}"))?;

    Ok(())
}

/// Parse user directives and append the HTTP-stack caps the user did not
/// override.
pub fn build_filter(directives: &str) -> Result<EnvFilter> {
    let mut filter = EnvFilter::try_new(directives)
        .with_context(|| format!("invalid log filter {directives:?}"))?;

    for target in NOISY_TARGETS {
        let named = directives
            .split(',')
            .any(|d| d.trim().starts_with(target));
        if !named {
            let directive = format!("{target}=warn")
                .parse()
                .with_context(|| format!("building directive for {target}"))?;
            filter = filter.add_directive(directive);
        }
    }

    Ok(filter)
}

fn level_name(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}
