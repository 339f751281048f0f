// src/config/validate.rs

use std::collections::HashSet;

use crate::catalog::ModuleKind;
use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{FleetrunError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::FleetrunError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_engine(cfg)?;
    validate_devices(cfg)?;
    validate_workflows(cfg)?;
    Ok(())
}

fn validate_engine(cfg: &RawConfigFile) -> Result<()> {
    let engine = &cfg.engine;

    if engine.batch_size == 0 {
        return Err(FleetrunError::ConfigError(
            "[engine].batch_size must be >= 1 (got 0)".to_string(),
        ));
    }
    if engine.max_attempts == 0 {
        return Err(FleetrunError::ConfigError(
            "[engine].max_attempts must be >= 1 (got 0)".to_string(),
        ));
    }
    if engine.max_in_flight_batches == 0 {
        return Err(FleetrunError::ConfigError(
            "[engine].max_in_flight_batches must be >= 1 (got 0)".to_string(),
        ));
    }
    if engine.pause_poll_ms == 0 || engine.progress_tick_ms == 0 {
        return Err(FleetrunError::ConfigError(
            "[engine].pause_poll_ms and progress_tick_ms must be >= 1".to_string(),
        ));
    }

    Ok(())
}

fn validate_devices(cfg: &RawConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for device in &cfg.device {
        if device.id.trim().is_empty() {
            return Err(FleetrunError::ConfigError(
                "[[device]] entries must have a non-empty id".to_string(),
            ));
        }
        if !seen.insert(device.id.as_str()) {
            return Err(FleetrunError::ConfigError(format!(
                "device '{}' is listed more than once",
                device.id
            )));
        }
    }
    Ok(())
}

fn validate_workflows(cfg: &RawConfigFile) -> Result<()> {
    for (name, workflow) in cfg.workflow.iter() {
        if workflow.steps.is_empty() {
            return Err(FleetrunError::ConfigError(format!(
                "workflow '{}' must have at least one step",
                name
            )));
        }
        if workflow.repeat_count == 0 {
            return Err(FleetrunError::ConfigError(format!(
                "workflow '{}': repeat_count must be >= 1 (got 0)",
                name
            )));
        }
        for (index, step) in workflow.steps.iter().enumerate() {
            if step.module.parse::<ModuleKind>().is_err() {
                return Err(FleetrunError::ConfigError(format!(
                    "workflow '{}' step {} uses unknown module '{}'",
                    name, index, step.module
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::config::loader::parse_and_validate;
    use crate::errors::FleetrunError;

    fn config_error(toml: &str) -> String {
        match parse_and_validate(toml) {
            Err(FleetrunError::ConfigError(msg)) => msg,
            other => panic!("expected a config error, got {other:?}"),
        }
    }

    #[test]
    fn rejects_zero_batch_size() {
        let msg = config_error("[engine]\nbatch_size = 0\n");
        assert!(msg.contains("batch_size"));
    }

    #[test]
    fn rejects_duplicate_devices() {
        let msg = config_error("[[device]]\nid = \"a\"\n\n[[device]]\nid = \"a\"\n");
        assert!(msg.contains("more than once"));
    }

    #[test]
    fn rejects_unknown_module_in_step() {
        let msg = config_error("[workflow.w]\nsteps = [{ module = \"teleport\" }]\n");
        assert!(msg.contains("teleport"));
    }
}
