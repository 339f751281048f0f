// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `fleetrun`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "fleetrun",
    version,
    about = "Run device test modules and workflows across a fleet of attached devices.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Fleetrun.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLEETRUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print workflows and resolved parameters, but don't
    /// contact the device command service.
    #[arg(long)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run a configured workflow.
    Run {
        /// Workflow name (`[workflow.<name>]` in the config).
        workflow: String,

        /// Target device id; repeat for several. Falls back to the
        /// workflow's devices, then to the persisted selection.
        #[arg(long = "device", value_name = "ID")]
        devices: Vec<String>,

        /// Cancel an already active run of this workflow instead of refusing.
        #[arg(long)]
        supersede: bool,
    },

    /// Dispatch a single module once.
    Module {
        /// Module id, e.g. `ping` or `enable_airplane_mode`.
        module: String,

        #[arg(long = "device", value_name = "ID")]
        devices: Vec<String>,
    },

    /// Query the device command service for a run status.
    Status {
        #[arg(long, value_name = "MODULE")]
        module: Option<String>,

        #[arg(long, value_name = "ID")]
        status_id: Option<String>,
    },
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
