#![allow(dead_code)]

pub use fleetrun_test_utils::builders::{ids, prefs};
pub use fleetrun_test_utils::{init_tracing, FakeCommandService, Harness};

use fleetrun::catalog::{MemoryPreferences, ModuleDescriptor, ModuleKind, ParamOverrides};
use fleetrun::dispatch::DispatchJob;

/// Owned pieces of a [`DispatchJob`], so tests can build one in a line.
pub struct JobParts {
    pub module: ModuleDescriptor,
    pub overrides: ParamOverrides,
    pub preferences: MemoryPreferences,
    pub devices: Vec<String>,
}

impl JobParts {
    pub fn new(kind: ModuleKind, devices: &[&str]) -> Self {
        Self {
            module: ModuleDescriptor::for_kind(kind),
            overrides: ParamOverrides::default(),
            preferences: MemoryPreferences::new(),
            devices: ids(devices),
        }
    }

    pub fn with_overrides(mut self, overrides: ParamOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_preferences(mut self, preferences: MemoryPreferences) -> Self {
        self.preferences = preferences;
        self
    }

    pub fn job(&self) -> DispatchJob<'_> {
        DispatchJob {
            module: &self.module,
            overrides: &self.overrides,
            preferences: &self.preferences,
            devices: &self.devices,
        }
    }
}
