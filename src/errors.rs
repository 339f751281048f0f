// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! Component errors (`ServiceError`, `DispatchError`, `ParamError`,
//! `RunnerError`, `HistoryError`) live next to the code that produces them;
//! `FleetrunError` is what configuration loading and the CLI surface return.

use thiserror::Error;

use crate::workflow::RunnerError;

#[derive(Error, Debug)]
pub enum FleetrunError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FleetrunError>;
