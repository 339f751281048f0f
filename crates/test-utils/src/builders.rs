#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use fleetrun::catalog::ParamOverrides;
use fleetrun::config::{
    ConfigFile, EngineSection, RawConfigFile, StepConfig, WorkflowConfig,
};
use fleetrun::dispatch::{DispatcherConfig, ModuleDispatcher, RetryPolicy};
use fleetrun::history::MemoryHistory;
use fleetrun::targets::{DeviceTarget, MemorySelection, StaticInventory, TargetResolver};
use fleetrun::types::DurationUnit;
use fleetrun::workflow::{RunnerConfig, WorkflowRunner};

use crate::fake_service::FakeCommandService;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_engine(mut self, engine: EngineSection) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn with_device(mut self, id: &str) -> Self {
        self.config.device.push(DeviceTarget::eligible(id));
        self
    }

    pub fn with_unavailable_device(mut self, id: &str) -> Self {
        self.config.device.push(DeviceTarget::unavailable(id));
        self
    }

    pub fn with_preference(mut self, key: &str, value: &str) -> Self {
        self.config
            .preferences
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_workflow(mut self, name: &str, workflow: WorkflowConfig) -> Self {
        self.config.workflow.insert(name.to_string(), workflow);
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `WorkflowConfig`.
pub struct WorkflowConfigBuilder {
    workflow: WorkflowConfig,
}

impl WorkflowConfigBuilder {
    pub fn new() -> Self {
        Self {
            workflow: WorkflowConfig {
                steps: Vec::new(),
                repeat_count: 1,
                duration_value: 0,
                duration_unit: DurationUnit::Minutes,
                devices: None,
            },
        }
    }

    pub fn step(self, module: &str) -> Self {
        self.step_with(module, ParamOverrides::default())
    }

    pub fn step_with(mut self, module: &str, overrides: ParamOverrides) -> Self {
        self.workflow.steps.push(StepConfig {
            module: module.to_string(),
            overrides,
        });
        self
    }

    pub fn repeat(mut self, count: u32) -> Self {
        self.workflow.repeat_count = count;
        self
    }

    pub fn duration(mut self, value: u64, unit: DurationUnit) -> Self {
        self.workflow.duration_value = value;
        self.workflow.duration_unit = unit;
        self
    }

    pub fn devices(mut self, devices: &[&str]) -> Self {
        self.workflow.devices = Some(devices.iter().map(|d| d.to_string()).collect());
        self
    }

    pub fn build(self) -> WorkflowConfig {
        self.workflow
    }
}

impl Default for WorkflowConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Dispatcher settings with short retry delays.
pub fn fast_dispatcher_config() -> DispatcherConfig {
    DispatcherConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
        },
        ..DispatcherConfig::default()
    }
}

/// Everything a runner test needs, wired to a [`FakeCommandService`] and an
/// in-memory history.
pub struct Harness {
    pub service: FakeCommandService,
    pub inventory: StaticInventory,
    pub history: MemoryHistory,
    pub dispatcher: ModuleDispatcher,
    pub runner: WorkflowRunner,
}

impl Harness {
    /// All `devices` eligible and selected; default runner timing.
    pub fn new(devices: &[&str], service: FakeCommandService) -> Self {
        Self::with_configs(
            devices,
            service,
            fast_dispatcher_config(),
            RunnerConfig::default(),
        )
    }

    pub fn with_configs(
        devices: &[&str],
        service: FakeCommandService,
        dispatcher_config: DispatcherConfig,
        runner_config: RunnerConfig,
    ) -> Self {
        let inventory = StaticInventory::new(
            devices.iter().map(|id| DeviceTarget::eligible(*id)).collect(),
        );
        let history = MemoryHistory::new();
        let dispatcher = ModuleDispatcher::new(Arc::new(service.clone()), dispatcher_config);
        let resolver = TargetResolver::new(
            Arc::new(inventory.clone()),
            Arc::new(MemorySelection(ids(devices))),
        );
        let runner = WorkflowRunner::new(
            dispatcher.clone(),
            resolver,
            Arc::new(history.clone()),
            runner_config,
        );

        Self {
            service,
            inventory,
            history,
            dispatcher,
            runner,
        }
    }
}

/// Device ids as owned strings.
pub fn ids(devices: &[&str]) -> Vec<String> {
    devices.iter().map(|d| d.to_string()).collect()
}

/// Preferences as a sorted map.
pub fn prefs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
