// tests/config_loading.rs

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use fleetrun::catalog::{MemoryPreferences, ModuleKind, ParamOverrides};
use fleetrun::config::{load_and_validate, load_from_path, parse_and_validate};
use fleetrun::errors::FleetrunError;
use fleetrun::types::DurationUnit;
use fleetrun::workflow::Workflow;
use fleetrun_test_utils::{ConfigFileBuilder, WorkflowConfigBuilder};

type TestResult = Result<(), Box<dyn Error>>;

const SAMPLE: &str = r#"
[engine]
batch_size = 10
max_attempts = 4

[service]
base_url = "http://lab-host:9000/"

[preferences]
"ping.host" = "10.0.0.1"
"device.pixel.ping.count" = "2"

[[device]]
id = "pixel"

[[device]]
id = "galaxy"
eligible = false

[workflow.airplane]
steps = [
  { module = "enable_airplane_mode" },
  { module = "wait", seconds = 5 },
  { module = "disable_airplane_mode" },
]
repeat_count = 2

[workflow.soak]
steps = [{ module = "ping", host = "1.1.1.1", count = 3 }]
duration_value = 2
duration_unit = "hours"
devices = ["pixel"]
"#;

#[test]
fn loads_a_full_config_from_disk() -> TestResult {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("Fleetrun.toml");
    fs::write(&path, SAMPLE)?;

    let cfg = load_and_validate(&path)?;

    assert_eq!(cfg.engine.batch_size, 10);
    assert_eq!(cfg.engine.max_attempts, 4);
    assert_eq!(cfg.engine.inter_step_delay_ms, 2000);
    assert!(cfg.engine.combine_mixed_batches);
    assert_eq!(cfg.service.base_url, "http://lab-host:9000/");
    assert_eq!(cfg.service.request_timeout_secs, 30);
    assert_eq!(cfg.storage.history_path, PathBuf::from(".fleetrun/history.jsonl"));
    assert_eq!(cfg.device.len(), 2);
    assert!(cfg.device[0].eligible);
    assert!(!cfg.device[1].eligible);
    assert_eq!(cfg.preferences.get("ping.host").map(String::as_str), Some("10.0.0.1"));

    let soak = &cfg.workflow["soak"];
    assert_eq!(soak.repeat_count, 1);
    assert_eq!(soak.duration_value, 2);
    assert_eq!(soak.duration_unit, DurationUnit::Hours);
    assert_eq!(soak.devices.as_deref(), Some(&["pixel".to_string()][..]));
    assert_eq!(
        soak.steps[0].overrides,
        ParamOverrides::default().with_host("1.1.1.1").with_count(3)
    );
    Ok(())
}

#[test]
fn empty_file_uses_defaults() -> TestResult {
    let cfg = parse_and_validate("")?;
    assert_eq!(cfg.engine.batch_size, 50);
    assert_eq!(cfg.engine.max_in_flight_batches, 1);
    assert_eq!(cfg.service.base_url, "http://127.0.0.1:8420");
    assert!(cfg.workflow.is_empty());
    assert!(cfg.device.is_empty());
    Ok(())
}

#[test]
fn workflow_section_becomes_a_runnable_workflow() -> TestResult {
    let cfg = parse_and_validate(SAMPLE)?;
    let prefs = MemoryPreferences::from(cfg.preferences.clone());

    let workflow = Workflow::from_config("airplane", &cfg.workflow["airplane"], &prefs)?;

    assert_eq!(workflow.id, "airplane");
    assert_eq!(
        workflow.steps.iter().map(|s| s.module.kind).collect::<Vec<_>>(),
        vec![
            ModuleKind::EnableAirplaneMode,
            ModuleKind::Wait,
            ModuleKind::DisableAirplaneMode
        ]
    );
    assert_eq!(workflow.steps[1].overrides.seconds, Some(5));
    assert_eq!(workflow.repeat.repeat_count, 2);
    assert_eq!(workflow.repeat.duration_bound(), None);
    assert!(workflow.devices.is_none());
    Ok(())
}

#[test]
fn builder_config_round_trips_through_workflow() -> TestResult {
    let cfg = ConfigFileBuilder::new()
        .with_device("a")
        .with_unavailable_device("b")
        .with_preference("sms.number", "+4712345678")
        .with_workflow(
            "sms",
            WorkflowConfigBuilder::new()
                .step_with("send_sms", ParamOverrides::default().with_message("hello"))
                .duration(30, DurationUnit::Minutes)
                .devices(&["a", "b"])
                .build(),
        )
        .build();
    let prefs = MemoryPreferences::from(cfg.preferences.clone());

    let workflow = Workflow::from_config("sms", &cfg.workflow["sms"], &prefs)?;

    assert_eq!(workflow.repeat.duration_bound(), Some(std::time::Duration::from_secs(1800)));
    assert_eq!(workflow.devices, Some(vec!["a".to_string(), "b".to_string()]));
    Ok(())
}

#[test]
fn zero_repeat_count_is_rejected() {
    let err = parse_and_validate("[workflow.w]\nsteps = [{ module = \"reboot\" }]\nrepeat_count = 0\n")
        .unwrap_err();
    assert!(matches!(err, FleetrunError::ConfigError(msg) if msg.contains("repeat_count")));
}

#[test]
fn workflow_without_steps_is_rejected() {
    let err = parse_and_validate("[workflow.empty]\nrepeat_count = 1\n").unwrap_err();
    assert!(matches!(err, FleetrunError::ConfigError(msg) if msg.contains("at least one step")));
}

#[test]
fn bad_duration_unit_is_a_parse_error() {
    let err = parse_and_validate(
        "[workflow.w]\nsteps = [{ module = \"reboot\" }]\nduration_unit = \"fortnights\"\n",
    )
    .unwrap_err();
    assert!(matches!(err, FleetrunError::TomlError(_)));
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_from_path("/definitely/not/here/Fleetrun.toml").unwrap_err();
    assert!(matches!(err, FleetrunError::IoError(_)));
}
